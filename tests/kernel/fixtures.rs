//! Concrete modules and policies used across kernel tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use citadel::kernel::registry::ModuleRegistry;
use citadel::{
    Action, Address, Kernel, KernelHandle, Keycode, Module, ModuleBase, ModuleError,
    OperationId, Permission, Policy, PolicyBase, PolicyError, Version,
};

pub const WITHDRAW: OperationId = OperationId::new("withdraw");
pub const DEPOSIT: OperationId = OperationId::new("deposit");

pub fn keycode(text: &str) -> Keycode {
    Keycode::parse(text).expect("valid keycode")
}

pub fn trsry() -> Keycode {
    keycode("TRSRY")
}

/// Fresh kernel plus its executor identity.
pub fn kernel() -> (KernelHandle, Address) {
    let executor = Address::random();
    (Kernel::new(executor).into_handle(), executor)
}

/// A toy treasury with two restricted operations.
pub struct Treasury {
    base: ModuleBase,
    version: Version,
    balance: Mutex<u64>,
    fail_init: AtomicBool,
    inits: AtomicU64,
}

impl Treasury {
    pub fn new(kernel: &KernelHandle) -> Arc<Self> {
        Self::with_keycode(kernel, trsry())
    }

    pub fn with_keycode(kernel: &KernelHandle, keycode: Keycode) -> Arc<Self> {
        Arc::new(Self {
            base: ModuleBase::new(kernel, keycode),
            version: Version::new(1, 0),
            balance: Mutex::new(100),
            fail_init: AtomicBool::new(false),
            inits: AtomicU64::new(0),
        })
    }

    pub fn failing_init(kernel: &KernelHandle) -> Arc<Self> {
        let treasury = Self::new(kernel);
        treasury.fail_init.store(true, Ordering::SeqCst);
        treasury
    }

    pub fn withdraw(&self, caller: Address, amount: u64) -> Result<u64, ModuleError> {
        self.base.permissioned(caller, &WITHDRAW)?;
        let mut balance = self.balance.lock().expect("test lock");
        *balance = balance.saturating_sub(amount);
        Ok(*balance)
    }

    pub fn deposit(&self, caller: Address, amount: u64) -> Result<u64, ModuleError> {
        self.base.permissioned(caller, &DEPOSIT)?;
        let mut balance = self.balance.lock().expect("test lock");
        *balance = balance.saturating_add(amount);
        Ok(*balance)
    }

    pub fn balance(&self) -> u64 {
        *self.balance.lock().expect("test lock")
    }

    pub fn init_count(&self) -> u64 {
        self.inits.load(Ordering::SeqCst)
    }
}

impl Module for Treasury {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn version(&self) -> Version {
        self.version
    }

    fn on_init(&self) -> Result<(), ModuleError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(ModuleError::InitFailed {
                keycode: self.keycode(),
                reason: "refusing to start".to_owned(),
            });
        }
        Ok(())
    }
}

/// A policy that pays out of the treasury.
pub struct Payroll {
    base: PolicyBase,
    permissions: Vec<Permission>,
    treasury: Mutex<Option<Arc<Treasury>>>,
    refreshes: AtomicU64,
    fail_refresh: AtomicBool,
}

impl Payroll {
    pub fn new(kernel: &KernelHandle) -> Arc<Self> {
        Self::requesting(kernel, vec![Permission::new(trsry(), WITHDRAW)])
    }

    pub fn requesting(kernel: &KernelHandle, permissions: Vec<Permission>) -> Arc<Self> {
        Arc::new(Self {
            base: PolicyBase::new(kernel.address()),
            permissions,
            treasury: Mutex::new(None),
            refreshes: AtomicU64::new(0),
            fail_refresh: AtomicBool::new(false),
        })
    }

    pub fn pay(&self, amount: u64) -> Result<u64, PolicyError> {
        let treasury = self
            .treasury
            .lock()
            .expect("test lock")
            .clone()
            .ok_or(PolicyError::DependencyUnresolved(trsry()))?;
        Ok(treasury.withdraw(self.address(), amount)?)
    }

    pub fn cached_treasury(&self) -> Option<Address> {
        self.treasury
            .lock()
            .expect("test lock")
            .as_ref()
            .map(|t| t.address())
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn set_fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }
}

impl Policy for Payroll {
    fn base(&self) -> &PolicyBase {
        &self.base
    }

    fn configure_dependencies(&self, modules: &ModuleRegistry) -> Result<Vec<Keycode>, PolicyError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(PolicyError::StateUnavailable("refresh disabled".to_owned()));
        }
        let treasury = self.base.get_module::<Treasury>(modules, trsry())?;
        *self.treasury.lock().expect("test lock") = Some(treasury);
        Ok(vec![trsry()])
    }

    fn request_permissions(&self) -> Vec<Permission> {
        self.permissions.clone()
    }
}

/// A policy with no dependencies that requests whatever it is given.
pub struct Observer {
    base: PolicyBase,
    permissions: Mutex<Vec<Permission>>,
    refreshes: AtomicU64,
}

impl Observer {
    pub fn new(kernel: &KernelHandle, permissions: Vec<Permission>) -> Arc<Self> {
        Arc::new(Self {
            base: PolicyBase::new(kernel.address()),
            permissions: Mutex::new(permissions),
            refreshes: AtomicU64::new(0),
        })
    }

    pub fn set_permissions(&self, permissions: Vec<Permission>) {
        *self.permissions.lock().expect("test lock") = permissions;
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl Policy for Observer {
    fn base(&self) -> &PolicyBase {
        &self.base
    }

    fn configure_dependencies(&self, _modules: &ModuleRegistry) -> Result<Vec<Keycode>, PolicyError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn request_permissions(&self) -> Vec<Permission> {
        self.permissions.lock().expect("test lock").clone()
    }
}

/// Install the treasury and approve payroll; returns both.
pub fn installed_payroll(kernel: &KernelHandle, executor: Address) -> (Arc<Treasury>, Arc<Payroll>) {
    let treasury = Treasury::new(kernel);
    let payroll = Payroll::new(kernel);
    kernel
        .execute_action(executor, Action::install(Arc::clone(&treasury)))
        .expect("install treasury");
    kernel
        .execute_action(executor, Action::approve(Arc::clone(&payroll)))
        .expect("approve payroll");
    (treasury, payroll)
}
