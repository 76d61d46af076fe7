//! Capability consumers.
//!
//! A policy declares the `(keycode, operation)` pairs it needs and caches
//! handles to the modules it depends on. The kernel drives it through three
//! kernel-only callbacks ([`Policy::update_dependencies`],
//! [`Policy::clear_dependencies`] and [`Policy::register_dependency`]) plus
//! the read-only [`Policy::request_permissions`].

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::kernel::registry::ModuleRegistry;
use crate::module::{Module, ModuleError};
use crate::types::{Address, Keycode, Permission};

/// Errors raised by policies.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// A kernel-only entry point was called by someone else.
    #[error("only the kernel may call {entry_point}, not {caller}")]
    OnlyKernel {
        /// Identity that attempted the call.
        caller: Address,
        /// Name of the entry point.
        entry_point: &'static str,
    },

    /// No module is bound to the keycode.
    #[error("module {0} does not exist")]
    ModuleDoesNotExist(Keycode),

    /// The module bound to the keycode is not of the expected type.
    #[error("module {0} is not of the expected type")]
    ModuleTypeMismatch(Keycode),

    /// The policy has not resolved a module it needs.
    #[error("dependency {0} has not been resolved")]
    DependencyUnresolved(Keycode),

    /// Policy-local state could not be accessed.
    #[error("policy state unavailable: {0}")]
    StateUnavailable(String),

    /// A module call made by the policy failed.
    #[error(transparent)]
    Module(#[from] ModuleError),
}

/// Shared state every policy embeds.
#[derive(Debug)]
pub struct PolicyBase {
    address: Address,
    kernel: Address,
    dependencies: Mutex<BTreeSet<Keycode>>,
}

impl PolicyBase {
    /// Create the base for a freshly deployed policy governed by `kernel`.
    pub fn new(kernel: Address) -> Self {
        Self {
            address: Address::random(),
            kernel,
            dependencies: Mutex::new(BTreeSet::new()),
        }
    }

    /// Identity of this policy instance.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Identity of the governing kernel.
    pub fn kernel(&self) -> Address {
        self.kernel
    }

    /// Fail unless `caller` is the kernel.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::OnlyKernel`] for any other caller.
    pub fn ensure_kernel(&self, caller: Address, entry_point: &'static str) -> Result<(), PolicyError> {
        if caller != self.kernel {
            return Err(PolicyError::OnlyKernel {
                caller,
                entry_point,
            });
        }
        Ok(())
    }

    /// Record that this policy depends on `keycode`. Kernel only.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::OnlyKernel`] for non-kernel callers.
    pub fn register_dependency(&self, caller: Address, keycode: Keycode) -> Result<(), PolicyError> {
        self.ensure_kernel(caller, "register_dependency")?;
        self.dependencies
            .lock()
            .map_err(|e| PolicyError::StateUnavailable(format!("dependency lock poisoned: {e}")))?
            .insert(keycode);
        Ok(())
    }

    /// Forget every registered dependency. Kernel only.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::OnlyKernel`] for non-kernel callers.
    pub fn clear_dependencies(&self, caller: Address) -> Result<(), PolicyError> {
        self.ensure_kernel(caller, "clear_dependencies")?;
        self.dependencies
            .lock()
            .map_err(|e| PolicyError::StateUnavailable(format!("dependency lock poisoned: {e}")))?
            .clear();
        Ok(())
    }

    /// Whether `keycode` was registered as a dependency.
    pub fn has_dependency(&self, keycode: Keycode) -> bool {
        self.dependencies
            .lock()
            .map(|deps| deps.contains(&keycode))
            .unwrap_or(false)
    }

    /// All registered dependencies, sorted.
    pub fn dependencies(&self) -> Vec<Keycode> {
        self.dependencies
            .lock()
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Resolve the address currently bound to `keycode`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::ModuleDoesNotExist`] if nothing is bound.
    pub fn get_module_address(
        &self,
        modules: &ModuleRegistry,
        keycode: Keycode,
    ) -> Result<Address, PolicyError> {
        modules
            .address_of(keycode)
            .ok_or(PolicyError::ModuleDoesNotExist(keycode))
    }

    /// Resolve the concrete module currently bound to `keycode`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::ModuleDoesNotExist`] if nothing is bound and
    /// [`PolicyError::ModuleTypeMismatch`] if the module is not an `M`.
    pub fn get_module<M: Module>(
        &self,
        modules: &ModuleRegistry,
        keycode: Keycode,
    ) -> Result<Arc<M>, PolicyError> {
        modules
            .get(keycode)
            .ok_or(PolicyError::ModuleDoesNotExist(keycode))?
            .downcast::<M>()
            .ok_or(PolicyError::ModuleTypeMismatch(keycode))
    }
}

/// A capability consumer the kernel can approve and terminate.
pub trait Policy: Send + Sync {
    /// The embedded base state.
    fn base(&self) -> &PolicyBase;

    /// Re-resolve and cache the modules this policy relies on.
    ///
    /// Runs while the kernel holds its write lock; read bindings from
    /// `modules` only. Returns the keycodes that were resolved.
    ///
    /// # Errors
    ///
    /// Any error aborts the approval or upgrade that triggered it.
    fn configure_dependencies(&self, modules: &ModuleRegistry) -> Result<Vec<Keycode>, PolicyError>;

    /// The exact `(keycode, operation)` pairs this policy needs.
    fn request_permissions(&self) -> Vec<Permission>;

    /// Identity of this policy instance.
    fn address(&self) -> Address {
        self.base().address()
    }

    /// Kernel-only entry point wrapping [`Policy::configure_dependencies`].
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::OnlyKernel`] for non-kernel callers, or the
    /// error from `configure_dependencies`.
    fn update_dependencies(
        &self,
        caller: Address,
        modules: &ModuleRegistry,
    ) -> Result<Vec<Keycode>, PolicyError> {
        self.base().ensure_kernel(caller, "update_dependencies")?;
        self.configure_dependencies(modules)
    }

    /// Kernel-only: mark `keycode` as a declared dependency.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::OnlyKernel`] for non-kernel callers.
    fn register_dependency(&self, caller: Address, keycode: Keycode) -> Result<(), PolicyError> {
        self.base().register_dependency(caller, keycode)
    }

    /// Kernel-only: drop the dependencies of the previous approval cycle.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::OnlyKernel`] for non-kernel callers.
    fn clear_dependencies(&self, caller: Address) -> Result<(), PolicyError> {
        self.base().clear_dependencies(caller)
    }

    /// Whether `keycode` was registered as a dependency.
    fn has_dependency(&self, keycode: Keycode) -> bool {
        self.base().has_dependency(keycode)
    }
}
