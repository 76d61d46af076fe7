//! The permissioned guard on restricted module operations.

use std::sync::Arc;

use citadel::{Action, Address, ModuleError, Permission, Policy, PolicyError};

use crate::fixtures::{installed_payroll, kernel, keycode, trsry, Observer, Payroll, Treasury, DEPOSIT, WITHDRAW};

#[test]
fn granted_policy_passes_and_stranger_is_denied() {
    let (kernel, executor) = kernel();
    let (treasury, payroll) = installed_payroll(&kernel, executor);
    let stranger = Payroll::new(&kernel);

    assert_eq!(payroll.pay(30).expect("payroll may withdraw"), 70);

    let denied = treasury.withdraw(stranger.address(), 10);
    assert!(matches!(
        denied,
        Err(ModuleError::NotPermitted { keycode, ref operation, .. })
            if keycode == trsry() && *operation == WITHDRAW
    ));
    assert_eq!(treasury.balance(), 70);
}

#[test]
fn grant_covers_only_the_named_operation() {
    let (kernel, executor) = kernel();
    let (treasury, payroll) = installed_payroll(&kernel, executor);

    assert!(treasury.withdraw(payroll.address(), 1).is_ok());
    assert!(matches!(
        treasury.deposit(payroll.address(), 1),
        Err(ModuleError::NotPermitted { .. })
    ));
}

#[test]
fn executor_and_kernel_hold_no_implicit_grants() {
    let (kernel, executor) = kernel();
    let (treasury, _payroll) = installed_payroll(&kernel, executor);

    assert!(treasury.withdraw(executor, 1).is_err());
    assert!(treasury.withdraw(kernel.address(), 1).is_err());
    assert!(treasury.withdraw(Address::ZERO, 1).is_err());
}

#[test]
fn guard_reads_the_live_matrix() {
    let (kernel, executor) = kernel();
    let (treasury, payroll) = installed_payroll(&kernel, executor);
    let payroll_id = payroll.address();

    assert!(treasury.withdraw(payroll_id, 1).is_ok());

    kernel
        .execute_action(executor, Action::terminate(Arc::clone(&payroll)))
        .expect("terminate");
    assert!(treasury.withdraw(payroll_id, 1).is_err());

    kernel
        .execute_action(executor, Action::approve(Arc::clone(&payroll)))
        .expect("re-approve");
    assert!(treasury.withdraw(payroll_id, 1).is_ok());
}

#[test]
fn policy_call_without_grant_surfaces_module_error() {
    let (kernel, executor) = kernel();
    let (_treasury, _payroll) = installed_payroll(&kernel, executor);
    let depositor = Payroll::requesting(&kernel, vec![Permission::new(trsry(), DEPOSIT)]);
    kernel
        .execute_action(executor, Action::approve(Arc::clone(&depositor)))
        .expect("approve depositor");

    assert!(matches!(
        depositor.pay(5),
        Err(PolicyError::Module(ModuleError::NotPermitted { .. }))
    ));
}

#[test]
fn grants_are_per_policy() {
    let (kernel, executor) = kernel();
    let (treasury, _payroll) = installed_payroll(&kernel, executor);
    let observer = Observer::new(&kernel, Vec::new());
    kernel
        .execute_action(executor, Action::approve(Arc::clone(&observer)))
        .expect("approve observer");

    assert!(treasury.withdraw(observer.address(), 1).is_err());
}

#[test]
fn approved_policy_calls_through_and_unapproved_does_not() {
    let (kernel, executor) = kernel();
    let moda = keycode("MODA");
    let module = Treasury::with_keycode(&kernel, moda);
    let approved = Observer::new(&kernel, vec![Permission::new(moda, WITHDRAW)]);
    let never_approved = Observer::new(&kernel, vec![Permission::new(moda, WITHDRAW)]);
    kernel
        .execute_action(executor, Action::install(Arc::clone(&module)))
        .expect("install MODA");
    kernel
        .execute_action(executor, Action::approve(Arc::clone(&approved)))
        .expect("approve P");

    assert_eq!(module.withdraw(approved.address(), 25).expect("P may call"), 75);
    assert!(matches!(
        module.withdraw(never_approved.address(), 25),
        Err(ModuleError::NotPermitted { keycode, .. }) if keycode == moda
    ));
    assert_eq!(module.balance(), 75);
}
