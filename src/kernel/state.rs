//! Kernel state: everything a lifecycle action may mutate.
//!
//! `KernelState` is cheap to clone (instances are behind `Arc`), which lets
//! the kernel stage an action on a copy and swap it in only on success.

use crate::kernel::permissions::PermissionMatrix;
use crate::kernel::registry::{ModuleRegistry, PolicyRegistry};
use crate::types::Address;

/// All shared state owned by the kernel.
#[derive(Debug, Clone)]
pub struct KernelState {
    /// Identity allowed to issue lifecycle actions.
    pub executor: Address,
    /// Keycode/address bindings of live modules.
    pub modules: ModuleRegistry,
    /// Approved policies.
    pub policies: PolicyRegistry,
    /// Grants consulted by module guards.
    pub permissions: PermissionMatrix,
}

impl KernelState {
    /// Fresh state with no modules, no policies and the given executor.
    pub fn new(executor: Address) -> Self {
        Self {
            executor,
            modules: ModuleRegistry::new(),
            policies: PolicyRegistry::new(),
            permissions: PermissionMatrix::new(),
        }
    }
}
