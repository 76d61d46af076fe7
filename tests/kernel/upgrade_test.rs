//! UpgradeModule: rebinding and dependent refresh.

use std::sync::Arc;

use citadel::kernel::check_all_invariants;
use citadel::{Action, ActionKind, KernelError, KernelEvent, Module, Permission, Policy, PolicyError};

use crate::fixtures::{
    installed_payroll, kernel, keycode, trsry, Observer, Payroll, Treasury, DEPOSIT, WITHDRAW,
};

#[test]
fn upgrade_rebinds_and_refreshes_dependents_once() {
    let (kernel, executor) = kernel();
    let (old, payroll) = installed_payroll(&kernel, executor);
    let new = Treasury::new(&kernel);
    assert_eq!(payroll.refresh_count(), 1);

    let events = kernel
        .execute_action(executor, Action::upgrade(Arc::clone(&new)))
        .expect("upgrade");

    assert_eq!(
        events,
        vec![KernelEvent::ActionExecuted {
            action: ActionKind::UpgradeModule,
            target: new.address(),
        }]
    );
    assert_eq!(payroll.refresh_count(), 2);
    assert_eq!(payroll.cached_treasury(), Some(new.address()));

    let state = kernel.read().expect("read");
    assert_eq!(state.module_for_keycode(trsry()), Some(new.address()));
    assert_eq!(state.keycode_for_module(new.address()), Some(trsry()));
    assert_eq!(state.keycode_for_module(old.address()), None);
    assert!(check_all_invariants(state.state()).is_empty());
}

#[test]
fn grants_survive_upgrade() {
    let (kernel, executor) = kernel();
    let (old, payroll) = installed_payroll(&kernel, executor);
    let new = Treasury::new(&kernel);
    kernel
        .execute_action(executor, Action::upgrade(Arc::clone(&new)))
        .expect("upgrade");

    assert_eq!(payroll.pay(40).expect("pay through new treasury"), 60);
    assert_eq!(new.balance(), 60);
    assert_eq!(old.balance(), 100);
}

#[test]
fn upgrade_skips_unrelated_policies() {
    let (kernel, executor) = kernel();
    let (_old, payroll) = installed_payroll(&kernel, executor);
    let minter = Treasury::with_keycode(&kernel, keycode("MINTR"));
    kernel
        .execute_action(executor, Action::install(Arc::clone(&minter)))
        .expect("install minter");

    let upgraded = Treasury::with_keycode(&kernel, keycode("MINTR"));
    kernel
        .execute_action(executor, Action::upgrade(Arc::clone(&upgraded)))
        .expect("upgrade minter");

    assert_eq!(payroll.refresh_count(), 1);
}

#[test]
fn upgrade_refreshes_every_dependent() {
    let (kernel, executor) = kernel();
    let (_old, payroll) = installed_payroll(&kernel, executor);
    let observer = Observer::new(&kernel, vec![Permission::new(trsry(), DEPOSIT)]);
    kernel
        .execute_action(executor, Action::approve(Arc::clone(&observer)))
        .expect("approve observer");

    let new = Treasury::new(&kernel);
    kernel
        .execute_action(executor, Action::upgrade(Arc::clone(&new)))
        .expect("upgrade");

    assert_eq!(payroll.refresh_count(), 2);
    assert!(observer.has_dependency(trsry()));
}

#[test]
fn upgrade_of_missing_keycode_fails() {
    let (kernel, executor) = kernel();
    let treasury = Treasury::new(&kernel);

    let result = kernel.execute_action(executor, Action::upgrade(Arc::clone(&treasury)));

    assert!(matches!(result, Err(KernelError::ModuleNotInstalled(k)) if k == trsry()));
    assert!(kernel.read().expect("read").installed_keycodes().is_empty());
}

#[test]
fn upgrade_to_current_module_fails() {
    let (kernel, executor) = kernel();
    let (old, payroll) = installed_payroll(&kernel, executor);

    let result = kernel.execute_action(executor, Action::upgrade(Arc::clone(&old)));

    assert!(matches!(result, Err(KernelError::UpgradeToSameModule(_))));
    assert_eq!(payroll.refresh_count(), 1);
}

#[test]
fn failing_init_aborts_upgrade() {
    let (kernel, executor) = kernel();
    let (old, payroll) = installed_payroll(&kernel, executor);
    let broken = Treasury::failing_init(&kernel);

    let result = kernel.execute_action(executor, Action::upgrade(Arc::clone(&broken)));

    assert!(matches!(result, Err(KernelError::ModuleInit { .. })));
    assert_eq!(
        kernel.read().expect("read").module_for_keycode(trsry()),
        Some(old.address())
    );
    assert_eq!(payroll.refresh_count(), 1);
    assert_eq!(payroll.cached_treasury(), Some(old.address()));
}

#[test]
fn failing_refresh_rolls_back_upgrade() {
    let (kernel, executor) = kernel();
    let (old, payroll) = installed_payroll(&kernel, executor);
    let new = Treasury::new(&kernel);
    payroll.set_fail_refresh(true);

    let result = kernel.execute_action(executor, Action::upgrade(Arc::clone(&new)));

    assert!(matches!(
        result,
        Err(KernelError::DependencyRefresh {
            source: PolicyError::StateUnavailable(_),
            ..
        })
    ));
    let state = kernel.read().expect("read");
    assert_eq!(state.module_for_keycode(trsry()), Some(old.address()));
    assert_eq!(state.keycode_for_module(new.address()), None);
    assert_eq!(payroll.cached_treasury(), Some(old.address()));
}

#[test]
fn refreshed_dependents_are_restored_when_a_later_one_fails() {
    let (kernel, executor) = kernel();
    let (old, first) = installed_payroll(&kernel, executor);
    let second = Payroll::new(&kernel);
    kernel
        .execute_action(executor, Action::approve(Arc::clone(&second)))
        .expect("approve second");
    second.set_fail_refresh(true);

    let new = Treasury::new(&kernel);
    let result = kernel.execute_action(executor, Action::upgrade(Arc::clone(&new)));

    assert!(matches!(result, Err(KernelError::DependencyRefresh { policy, .. }) if policy == second.address()));
    assert_eq!(first.cached_treasury(), Some(old.address()));
    assert_eq!(first.pay(10).expect("old treasury still reachable"), 90);
    assert_eq!(new.balance(), 100);
}

#[test]
fn re_approval_forgets_dependencies_of_the_previous_cycle() {
    let (kernel, executor) = kernel();
    let treasury = Treasury::new(&kernel);
    kernel
        .execute_action(executor, Action::install(Arc::clone(&treasury)))
        .expect("install");
    let observer = Observer::new(&kernel, vec![Permission::new(trsry(), WITHDRAW)]);
    kernel
        .execute_action(executor, Action::approve(Arc::clone(&observer)))
        .expect("first approval");
    kernel
        .execute_action(executor, Action::terminate(Arc::clone(&observer)))
        .expect("terminate");

    observer.set_permissions(vec![Permission::new(keycode("MINTR"), "mint")]);
    kernel
        .execute_action(executor, Action::approve(Arc::clone(&observer)))
        .expect("second approval");
    assert!(!observer.has_dependency(trsry()));
    assert_eq!(observer.base().dependencies(), vec![keycode("MINTR")]);
    let before = observer.refresh_count();

    kernel
        .execute_action(executor, Action::upgrade(Treasury::new(&kernel)))
        .expect("upgrade");

    assert_eq!(observer.refresh_count(), before);
}

#[test]
fn init_of_a_rejected_upgrade_has_run() {
    let (kernel, executor) = kernel();
    let (old, payroll) = installed_payroll(&kernel, executor);
    let new = Treasury::new(&kernel);
    payroll.set_fail_refresh(true);

    let result = kernel.execute_action(executor, Action::upgrade(Arc::clone(&new)));

    assert!(matches!(result, Err(KernelError::DependencyRefresh { .. })));
    assert_eq!(new.init_count(), 1);
    assert_eq!(old.init_count(), 1);
    assert_eq!(
        kernel.read().expect("read").module_for_keycode(trsry()),
        Some(old.address())
    );
}
