//! Generic module and policy implementations driven by manifest declarations.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::kernel::registry::ModuleRegistry;
use crate::kernel::KernelHandle;
use crate::module::{Module, ModuleBase, ModuleError};
use crate::policy::{Policy, PolicyBase, PolicyError};
use crate::types::{Address, Keycode, OperationId, Permission, Version};

/// A module whose restricted operations only count successful calls.
#[derive(Debug)]
pub struct DeclaredModule {
    base: ModuleBase,
    version: Version,
    operations: BTreeSet<OperationId>,
    calls: Mutex<HashMap<OperationId, u64>>,
    inits: AtomicU64,
}

impl DeclaredModule {
    /// Deploy a module exporting `keycode` with the given operations.
    pub fn new(
        kernel: &KernelHandle,
        keycode: Keycode,
        version: Version,
        operations: impl IntoIterator<Item = OperationId>,
    ) -> Self {
        Self {
            base: ModuleBase::new(kernel, keycode),
            version,
            operations: operations.into_iter().collect(),
            calls: Mutex::new(HashMap::new()),
            inits: AtomicU64::new(0),
        }
    }

    /// Run the restricted operation `operation` on behalf of `caller`.
    ///
    /// Returns how many times the operation has now succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::UnknownOperation`] for undeclared operations
    /// and [`ModuleError::NotPermitted`] when the caller lacks the grant.
    pub fn invoke(&self, caller: Address, operation: &OperationId) -> Result<u64, ModuleError> {
        if !self.operations.contains(operation) {
            return Err(ModuleError::UnknownOperation {
                keycode: self.keycode(),
                operation: operation.clone(),
            });
        }
        self.base.permissioned(caller, operation)?;

        let mut calls = self
            .calls
            .lock()
            .map_err(|e| ModuleError::StateUnavailable(format!("call counter poisoned: {e}")))?;
        let count = calls.entry(operation.clone()).or_insert(0);
        *count = count.saturating_add(1);
        Ok(*count)
    }

    /// Successful invocations of `operation` so far.
    pub fn call_count(&self, operation: &OperationId) -> u64 {
        self.calls
            .lock()
            .map(|calls| calls.get(operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// How many times the kernel ran this module's init hook.
    pub fn init_count(&self) -> u64 {
        self.inits.load(Ordering::SeqCst)
    }

    /// Declared operations, sorted.
    pub fn operations(&self) -> impl Iterator<Item = &OperationId> {
        self.operations.iter()
    }
}

impl Module for DeclaredModule {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn version(&self) -> Version {
        self.version
    }

    fn on_init(&self) -> Result<(), ModuleError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A policy that depends on every keycode it requests a permission on.
#[derive(Debug)]
pub struct DeclaredPolicy {
    base: PolicyBase,
    permissions: Vec<Permission>,
    resolved: Mutex<HashMap<Keycode, Arc<DeclaredModule>>>,
    refreshes: AtomicU64,
}

impl DeclaredPolicy {
    /// Deploy a policy governed by `kernel` requesting `permissions`.
    pub fn new(kernel: Address, permissions: Vec<Permission>) -> Self {
        Self {
            base: PolicyBase::new(kernel),
            permissions,
            resolved: Mutex::new(HashMap::new()),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Distinct keycodes this policy relies on, sorted.
    pub fn required_keycodes(&self) -> Vec<Keycode> {
        let keycodes: BTreeSet<Keycode> = self.permissions.iter().map(|p| p.keycode).collect();
        keycodes.into_iter().collect()
    }

    /// Call `operation` on the cached module for `keycode`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::DependencyUnresolved`] if the module was never
    /// resolved, or the module's error.
    pub fn call(&self, keycode: Keycode, operation: &OperationId) -> Result<u64, PolicyError> {
        let module = self
            .resolved
            .lock()
            .map_err(|e| PolicyError::StateUnavailable(format!("module cache poisoned: {e}")))?
            .get(&keycode)
            .cloned()
            .ok_or(PolicyError::DependencyUnresolved(keycode))?;
        Ok(module.invoke(self.address(), operation)?)
    }

    /// Address of the module cached for `keycode`.
    pub fn cached_module(&self, keycode: Keycode) -> Option<Address> {
        self.resolved
            .lock()
            .ok()
            .and_then(|cache| cache.get(&keycode).map(|m| m.address()))
    }

    /// How many times the kernel refreshed this policy's dependencies.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl Policy for DeclaredPolicy {
    fn base(&self) -> &PolicyBase {
        &self.base
    }

    fn configure_dependencies(&self, modules: &ModuleRegistry) -> Result<Vec<Keycode>, PolicyError> {
        let keycodes = self.required_keycodes();
        let mut fresh = HashMap::with_capacity(keycodes.len());
        for keycode in &keycodes {
            let module = self.base.get_module::<DeclaredModule>(modules, *keycode)?;
            fresh.insert(*keycode, module);
        }

        *self
            .resolved
            .lock()
            .map_err(|e| PolicyError::StateUnavailable(format!("module cache poisoned: {e}")))? =
            fresh;
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(keycodes)
    }

    fn request_permissions(&self) -> Vec<Permission> {
        self.permissions.clone()
    }
}
