//! Lifecycle actions the executor can issue to the kernel.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::kernel::registry::ModuleHandle;
use crate::module::Module;
use crate::policy::Policy;
use crate::types::Address;

/// Discriminant of an [`Action`], used in events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Bind a new module to an unused keycode.
    InstallModule,
    /// Replace the module bound to an existing keycode.
    UpgradeModule,
    /// Grant a policy its requested permissions.
    ApprovePolicy,
    /// Revoke a policy's permissions and remove it.
    TerminatePolicy,
    /// Hand executor rights to another identity.
    ChangeExecutor,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InstallModule => "install_module",
            Self::UpgradeModule => "upgrade_module",
            Self::ApprovePolicy => "approve_policy",
            Self::TerminatePolicy => "terminate_policy",
            Self::ChangeExecutor => "change_executor",
        };
        f.write_str(name)
    }
}

/// A lifecycle action together with its target.
#[derive(Clone)]
pub enum Action {
    /// Install a module under the keycode it exports.
    InstallModule(ModuleHandle),
    /// Replace the module bound to the keycode this module exports.
    UpgradeModule(ModuleHandle),
    /// Approve a policy.
    ApprovePolicy(Arc<dyn Policy>),
    /// Terminate a policy.
    TerminatePolicy(Arc<dyn Policy>),
    /// Make the given identity the executor.
    ChangeExecutor(Address),
}

impl Action {
    /// Install `module`.
    pub fn install<M: Module>(module: Arc<M>) -> Self {
        Self::InstallModule(ModuleHandle::new(module))
    }

    /// Upgrade to `module`.
    pub fn upgrade<M: Module>(module: Arc<M>) -> Self {
        Self::UpgradeModule(ModuleHandle::new(module))
    }

    /// Approve `policy`.
    pub fn approve<P: Policy + 'static>(policy: Arc<P>) -> Self {
        Self::ApprovePolicy(policy)
    }

    /// Terminate `policy`.
    pub fn terminate<P: Policy + 'static>(policy: Arc<P>) -> Self {
        Self::TerminatePolicy(policy)
    }

    /// The action's discriminant.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::InstallModule(_) => ActionKind::InstallModule,
            Self::UpgradeModule(_) => ActionKind::UpgradeModule,
            Self::ApprovePolicy(_) => ActionKind::ApprovePolicy,
            Self::TerminatePolicy(_) => ActionKind::TerminatePolicy,
            Self::ChangeExecutor(_) => ActionKind::ChangeExecutor,
        }
    }

    /// Identity the action targets.
    pub fn target(&self) -> Address {
        match self {
            Self::InstallModule(module) | Self::UpgradeModule(module) => module.address(),
            Self::ApprovePolicy(policy) | Self::TerminatePolicy(policy) => policy.address(),
            Self::ChangeExecutor(address) => *address,
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("kind", &self.kind())
            .field("target", &self.target())
            .finish()
    }
}
