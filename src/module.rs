//! Capability providers.
//!
//! A module exports one [`Keycode`] and any number of restricted operations.
//! Each restricted operation starts by calling [`ModuleBase::permissioned`],
//! which consults the kernel's permission matrix for the caller.
//!
//! ```ignore
//! const WITHDRAW: OperationId = OperationId::new("withdraw");
//!
//! impl Treasury {
//!     pub fn withdraw(&self, caller: Address, amount: u64) -> Result<u64, ModuleError> {
//!         self.base.permissioned(caller, &WITHDRAW)?;
//!         // ...
//!     }
//! }
//! ```

use tracing::warn;

use crate::kernel::KernelHandle;
use crate::types::{Address, Keycode, OperationId, Version};

/// Errors raised by modules and their guard.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// The caller holds no grant for this operation.
    #[error("{caller} is not permitted to call {keycode}.{operation}")]
    NotPermitted {
        /// Identity that attempted the call.
        caller: Address,
        /// Keycode of the module.
        keycode: Keycode,
        /// The restricted operation.
        operation: OperationId,
    },

    /// A kernel-only entry point was called by someone else.
    #[error("only the kernel may call {entry_point}, not {caller}")]
    OnlyKernel {
        /// Identity that attempted the call.
        caller: Address,
        /// Name of the entry point.
        entry_point: &'static str,
    },

    /// The module does not expose the named operation.
    #[error("module {keycode} has no operation '{operation}'")]
    UnknownOperation {
        /// Keycode of the module.
        keycode: Keycode,
        /// The operation that was asked for.
        operation: OperationId,
    },

    /// The kernel could not be consulted.
    #[error("kernel unavailable: {0}")]
    KernelUnavailable(String),

    /// Module-local state could not be accessed.
    #[error("module state unavailable: {0}")]
    StateUnavailable(String),

    /// The module's init hook refused to run.
    #[error("module {keycode} failed to initialise: {reason}")]
    InitFailed {
        /// Keycode of the module.
        keycode: Keycode,
        /// Why initialisation failed.
        reason: String,
    },
}

/// Shared state every module embeds.
#[derive(Debug, Clone)]
pub struct ModuleBase {
    address: Address,
    keycode: Keycode,
    kernel: KernelHandle,
}

impl ModuleBase {
    /// Create the base for a freshly deployed module exporting `keycode`.
    pub fn new(kernel: &KernelHandle, keycode: Keycode) -> Self {
        Self {
            address: Address::random(),
            keycode,
            kernel: kernel.clone(),
        }
    }

    /// Identity of this module instance.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Keycode this module exports.
    pub fn keycode(&self) -> Keycode {
        self.keycode
    }

    /// Kernel this module answers to.
    pub fn kernel(&self) -> &KernelHandle {
        &self.kernel
    }

    /// Guard for restricted operations.
    ///
    /// Checks `(caller, self.keycode, operation)` against the live permission
    /// matrix. Nothing is cached; every call is checked afresh.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::NotPermitted`] if the entry is not granted and
    /// [`ModuleError::KernelUnavailable`] if the kernel lock is poisoned.
    pub fn permissioned(&self, caller: Address, operation: &OperationId) -> Result<(), ModuleError> {
        let granted = self
            .kernel
            .has_permission(caller, self.keycode, operation)
            .map_err(|e| ModuleError::KernelUnavailable(e.to_string()))?;
        if !granted {
            warn!(
                caller = %caller,
                keycode = %self.keycode,
                operation = %operation,
                "restricted call denied"
            );
            return Err(ModuleError::NotPermitted {
                caller,
                keycode: self.keycode,
                operation: operation.clone(),
            });
        }
        Ok(())
    }

    /// Fail unless `caller` is the kernel.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::OnlyKernel`] for any other caller.
    pub fn ensure_kernel(&self, caller: Address, entry_point: &'static str) -> Result<(), ModuleError> {
        if caller != self.kernel.address() {
            return Err(ModuleError::OnlyKernel {
                caller,
                entry_point,
            });
        }
        Ok(())
    }
}

/// A capability provider the kernel can install and upgrade.
pub trait Module: Send + Sync + 'static {
    /// The embedded base state.
    fn base(&self) -> &ModuleBase;

    /// Informational `(major, minor)` version.
    fn version(&self) -> Version;

    /// Keycode this module exports. Fixed for the lifetime of the instance.
    fn keycode(&self) -> Keycode {
        self.base().keycode()
    }

    /// Identity of this module instance.
    fn address(&self) -> Address {
        self.base().address()
    }

    /// Kernel-only hook run when the module is installed or upgraded to.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::OnlyKernel`] for non-kernel callers, or
    /// whatever [`Module::on_init`] returns.
    fn init(&self, caller: Address) -> Result<(), ModuleError> {
        self.base().ensure_kernel(caller, "init")?;
        self.on_init()
    }

    /// Module-specific initialisation, e.g. migrating state from a prior
    /// version. Runs while the kernel holds its write lock, so it must not
    /// call back into the [`KernelHandle`].
    ///
    /// On upgrade the hook runs before dependent policies are refreshed. If
    /// a refresh then fails the upgrade is rolled back, but whatever the hook
    /// did to this instance stays done. Keep it idempotent.
    ///
    /// # Errors
    ///
    /// An error aborts the install or upgrade.
    fn on_init(&self) -> Result<(), ModuleError> {
        Ok(())
    }
}
