//! Kernel core: the sole owner and mutator of shared state.
//!
//! The executor drives the kernel through [`Kernel::execute_action`]. Each
//! action is staged on a copy of [`KernelState`], checked, and only then
//! committed together with its events. A failed action leaves no trace.

pub mod action;
pub mod audit;
pub mod invariants;
pub mod permissions;
pub mod registry;
pub mod state;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::module::ModuleError;
use crate::policy::{Policy, PolicyError};
use crate::types::{Address, Keycode, OperationId, Permission};

pub use action::{Action, ActionKind};
pub use audit::{AuditLogger, KernelEvent};
pub use invariants::{check_all_invariants, InvariantViolation};
pub use registry::{ApprovedPolicy, ModuleHandle, ModuleRegistry, PolicyRegistry};
pub use state::KernelState;

/// Kernel error: a lifecycle action was refused.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Only the executor may issue lifecycle actions.
    #[error("{caller} is not the executor")]
    NotExecutor {
        /// Identity that attempted the action.
        caller: Address,
    },
    /// The keycode already has a live module.
    #[error("module {0} is already installed")]
    ModuleAlreadyInstalled(Keycode),
    /// Upgrade of a keycode with no live module.
    #[error("module {0} is not installed; nothing to upgrade")]
    ModuleNotInstalled(Keycode),
    /// Upgrade to the module that is already bound.
    #[error("module {0} is already at the requested address")]
    UpgradeToSameModule(Keycode),
    /// The module's init hook failed.
    #[error("module {keycode} rejected initialisation")]
    ModuleInit {
        /// Keycode being installed or upgraded.
        keycode: Keycode,
        /// Underlying module error.
        #[source]
        source: ModuleError,
    },
    /// The policy is already approved.
    #[error("policy {0} is already approved")]
    PolicyAlreadyApproved(Address),
    /// The policy is not approved.
    #[error("policy {0} is not approved")]
    PolicyNotApproved(Address),
    /// A policy failed to refresh its dependencies.
    #[error("policy {policy} failed to refresh dependencies")]
    DependencyRefresh {
        /// The policy.
        policy: Address,
        /// Underlying policy error.
        #[source]
        source: PolicyError,
    },
    /// A policy callback failed.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// The staged state broke an invariant.
    #[error("action would violate kernel invariants: {}", format_violations(.0))]
    InvariantViolated(Vec<InvariantViolation>),
    /// The kernel lock is poisoned.
    #[error("kernel lock poisoned: {0}")]
    LockPoisoned(String),
}

fn format_violations(violations: &[InvariantViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// The central authority over modules, policies and permissions.
#[derive(Debug)]
pub struct Kernel {
    address: Address,
    state: KernelState,
    audit: Option<Arc<AuditLogger>>,
    check_invariants: bool,
}

impl Kernel {
    /// Create a kernel with `executor` as the initial executor.
    pub fn new(executor: Address) -> Self {
        Self {
            address: Address::random(),
            state: KernelState::new(executor),
            audit: None,
            check_invariants: true,
        }
    }

    /// Attach an audit sink for committed events.
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Enable or disable the post-action invariant check.
    pub fn with_invariant_checks(mut self, enabled: bool) -> Self {
        self.check_invariants = enabled;
        self
    }

    /// Move the kernel behind a lock so modules can consult it.
    pub fn into_handle(self) -> KernelHandle {
        KernelHandle {
            address: self.address,
            inner: Arc::new(RwLock::new(self)),
        }
    }

    // ── Queries ──

    /// The kernel's own identity.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Current executor.
    pub fn executor(&self) -> Address {
        self.state.executor
    }

    /// Read-only view of the full state.
    pub fn state(&self) -> &KernelState {
        &self.state
    }

    /// Module bindings.
    pub fn modules(&self) -> &ModuleRegistry {
        &self.state.modules
    }

    /// Address bound to `keycode`, if any.
    pub fn module_for_keycode(&self, keycode: Keycode) -> Option<Address> {
        self.state.modules.address_of(keycode)
    }

    /// Keycode bound to `module`, if any.
    pub fn keycode_for_module(&self, module: Address) -> Option<Keycode> {
        self.state.modules.keycode_of(module)
    }

    /// Handle of the module bound to `keycode`.
    pub fn module(&self, keycode: Keycode) -> Option<ModuleHandle> {
        self.state.modules.get(keycode).cloned()
    }

    /// Installed keycodes, sorted.
    pub fn installed_keycodes(&self) -> Vec<Keycode> {
        self.state.modules.keycodes()
    }

    /// Whether `policy` may call `operation` on `keycode`.
    pub fn has_permission(&self, policy: Address, keycode: Keycode, operation: &OperationId) -> bool {
        self.state.permissions.is_granted(policy, keycode, operation)
    }

    /// Every permission currently granted to `policy`.
    pub fn granted_permissions(&self, policy: Address) -> Vec<Permission> {
        self.state.permissions.granted_to(policy)
    }

    /// Approved policies in registry order.
    pub fn all_policies(&self) -> Vec<Address> {
        self.state.policies.addresses().to_vec()
    }

    /// Whether `policy` is approved.
    pub fn is_policy_approved(&self, policy: Address) -> bool {
        self.state.policies.contains(policy)
    }

    // ── Dispatch ──

    /// Execute a lifecycle action on behalf of `caller`.
    ///
    /// Returns the events the action committed, ending with
    /// [`KernelEvent::ActionExecuted`].
    ///
    /// # Errors
    ///
    /// Returns [`KernelError`] if `caller` is not the executor or the action
    /// is refused. State is unchanged on error.
    pub fn execute_action(
        &mut self,
        caller: Address,
        action: Action,
    ) -> Result<Vec<KernelEvent>, KernelError> {
        let kind = action.kind();
        let target = action.target();

        if caller != self.state.executor {
            warn!(caller = %caller, action = %kind, "lifecycle action from non-executor");
            return Err(KernelError::NotExecutor { caller });
        }

        let mut staged = self.state.clone();
        let mut events = Vec::new();
        let kernel = self.address;

        let result = match action {
            Action::InstallModule(module) => install_module(&mut staged, kernel, module),
            Action::UpgradeModule(module) => upgrade_module(&mut staged, kernel, module),
            Action::ApprovePolicy(policy) => {
                approve_policy(&mut staged, kernel, policy, &mut events)
            }
            Action::TerminatePolicy(policy) => {
                terminate_policy(&mut staged, policy, &mut events)
            }
            Action::ChangeExecutor(executor) => {
                staged.executor = executor;
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(action = %kind, target = %target, error = %e, "action rejected");
            return Err(e);
        }

        if self.check_invariants {
            let violations = check_all_invariants(&staged);
            if !violations.is_empty() {
                warn!(action = %kind, target = %target, count = violations.len(), "invariant check failed");
                return Err(KernelError::InvariantViolated(violations));
            }
        }

        events.push(KernelEvent::ActionExecuted {
            action: kind,
            target,
        });
        self.state = staged;
        self.emit(&events);
        info!(action = %kind, target = %target, "action executed");

        Ok(events)
    }

    fn emit(&self, events: &[KernelEvent]) {
        for event in events {
            if let KernelEvent::PermissionsUpdated {
                policy,
                keycode,
                operation,
                granted,
            } = event
            {
                debug!(policy = %policy, keycode = %keycode, operation = %operation, granted, "permissions updated");
            }
            if let Some(audit) = &self.audit {
                if let Err(e) = audit.log(event) {
                    warn!(error = %e, "failed to write audit entry");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Action handlers
// ---------------------------------------------------------------------------

fn init_module(kernel: Address, module: &ModuleHandle) -> Result<(), KernelError> {
    module
        .module()
        .init(kernel)
        .map_err(|source| KernelError::ModuleInit {
            keycode: module.keycode(),
            source,
        })
}

fn install_module(
    state: &mut KernelState,
    kernel: Address,
    module: ModuleHandle,
) -> Result<(), KernelError> {
    let keycode = module.keycode();
    if state.modules.contains(keycode) {
        return Err(KernelError::ModuleAlreadyInstalled(keycode));
    }

    state.modules.bind(keycode, module.clone());
    init_module(kernel, &module)?;

    debug!(keycode = %keycode, module = %module.address(), version = %module.version(), "module bound");
    Ok(())
}

fn upgrade_module(
    state: &mut KernelState,
    kernel: Address,
    module: ModuleHandle,
) -> Result<(), KernelError> {
    let keycode = module.keycode();
    let current = state
        .modules
        .address_of(keycode)
        .ok_or(KernelError::ModuleNotInstalled(keycode))?;
    if current == module.address() {
        return Err(KernelError::UpgradeToSameModule(keycode));
    }

    let previous = state.modules.clone();
    state.modules.bind(keycode, module.clone());
    init_module(kernel, &module)?;

    debug!(keycode = %keycode, from = %current, to = %module.address(), "module rebound");
    refresh_dependents(state, kernel, keycode, &previous)
}

/// Visit every approved policy that depends on `keycode` exactly once.
///
/// On failure, policies already refreshed are pointed back at `previous`.
fn refresh_dependents(
    state: &KernelState,
    kernel: Address,
    keycode: Keycode,
    previous: &ModuleRegistry,
) -> Result<(), KernelError> {
    let dependents: Vec<Arc<dyn Policy>> = state
        .policies
        .iter()
        .filter(|entry| entry.policy.has_dependency(keycode))
        .map(|entry| Arc::clone(&entry.policy))
        .collect();

    for (index, policy) in dependents.iter().enumerate() {
        match policy.update_dependencies(kernel, &state.modules) {
            Ok(resolved) => {
                debug!(policy = %policy.address(), keycode = %keycode, resolved = ?resolved, "dependent refreshed");
            }
            Err(source) => {
                for done in dependents.iter().take(index.saturating_add(1)) {
                    if let Err(e) = done.update_dependencies(kernel, previous) {
                        warn!(policy = %done.address(), error = %e, "failed to restore dependencies");
                    }
                }
                return Err(KernelError::DependencyRefresh {
                    policy: policy.address(),
                    source,
                });
            }
        }
    }
    Ok(())
}

/// First occurrence of each permission, in request order.
fn distinct(permissions: impl IntoIterator<Item = Permission>) -> Vec<Permission> {
    let mut unique: Vec<Permission> = Vec::new();
    for permission in permissions {
        if !unique.contains(&permission) {
            unique.push(permission);
        }
    }
    unique
}

fn approve_policy(
    state: &mut KernelState,
    kernel: Address,
    policy: Arc<dyn Policy>,
    events: &mut Vec<KernelEvent>,
) -> Result<(), KernelError> {
    let address = policy.address();
    if state.policies.contains(address) {
        return Err(KernelError::PolicyAlreadyApproved(address));
    }

    policy.clear_dependencies(kernel)?;
    let resolved = policy
        .update_dependencies(kernel, &state.modules)
        .map_err(|source| KernelError::DependencyRefresh {
            policy: address,
            source,
        })?;
    debug!(policy = %address, resolved = ?resolved, "dependencies configured");

    let granted = distinct(policy.request_permissions());
    for permission in &granted {
        state.permissions.set(address, permission, true);
        policy.register_dependency(kernel, permission.keycode)?;
        events.push(KernelEvent::PermissionsUpdated {
            policy: address,
            keycode: permission.keycode,
            operation: permission.operation.clone(),
            granted: true,
        });
    }

    state.policies.insert(ApprovedPolicy { policy, granted });
    Ok(())
}

fn terminate_policy(
    state: &mut KernelState,
    policy: Arc<dyn Policy>,
    events: &mut Vec<KernelEvent>,
) -> Result<(), KernelError> {
    let address = policy.address();
    let entry = state
        .policies
        .remove(address)
        .ok_or(KernelError::PolicyNotApproved(address))?;

    let revoked = distinct(policy.request_permissions().into_iter().chain(entry.granted));
    for permission in revoked {
        state.permissions.set(address, &permission, false);
        events.push(KernelEvent::PermissionsUpdated {
            policy: address,
            keycode: permission.keycode,
            operation: permission.operation,
            granted: false,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Shared, lock-guarded access to a [`Kernel`].
///
/// Lifecycle actions take the write lock; module guards and queries take
/// the read lock.
#[derive(Clone)]
pub struct KernelHandle {
    address: Address,
    inner: Arc<RwLock<Kernel>>,
}

impl KernelHandle {
    /// The kernel's identity. Readable without taking the lock.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Execute a lifecycle action on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// See [`Kernel::execute_action`]; also [`KernelError::LockPoisoned`].
    pub fn execute_action(
        &self,
        caller: Address,
        action: Action,
    ) -> Result<Vec<KernelEvent>, KernelError> {
        self.write()?.execute_action(caller, action)
    }

    /// Whether `policy` may call `operation` on `keycode`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::LockPoisoned`] if the lock is poisoned.
    pub fn has_permission(
        &self,
        policy: Address,
        keycode: Keycode,
        operation: &OperationId,
    ) -> Result<bool, KernelError> {
        Ok(self.read()?.has_permission(policy, keycode, operation))
    }

    /// Read access for queries.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::LockPoisoned`] if the lock is poisoned.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, Kernel>, KernelError> {
        self.inner
            .read()
            .map_err(|e| KernelError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Kernel>, KernelError> {
        self.inner
            .write()
            .map_err(|e| KernelError::LockPoisoned(e.to_string()))
    }
}

impl std::fmt::Debug for KernelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelHandle")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
