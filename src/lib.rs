//! Citadel: a capability-based access-control kernel.
//!
//! The [`kernel::Kernel`] tracks installed capability providers
//! ([`module::Module`]), approved capability consumers
//! ([`policy::Policy`]), and the permission matrix that gates every
//! restricted module operation. A single executor identity drives all
//! lifecycle changes through [`kernel::Kernel::execute_action`].
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod kernel;
pub mod module;
pub mod policy;

pub mod manifest;

pub use kernel::{Action, ActionKind, Kernel, KernelError, KernelEvent, KernelHandle};
pub use module::{Module, ModuleBase, ModuleError};
pub use policy::{Policy, PolicyBase, PolicyError};
pub use types::{Address, Keycode, KeycodeError, OperationId, Permission, Version};
