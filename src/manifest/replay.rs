//! Replay a manifest against a fresh kernel.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::Config;
use crate::kernel::{Action, AuditLogger, Kernel, KernelEvent, KernelHandle};
use crate::manifest::declared::{DeclaredModule, DeclaredPolicy};
use crate::manifest::{Expectation, Manifest, Step, INITIAL_EXECUTOR};
use crate::policy::Policy;
use crate::types::{Address, Keycode, OperationId};

/// What happened when one step ran.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Zero-based step index.
    pub index: usize,
    /// Human-readable step summary.
    pub description: String,
    /// What the manifest expected.
    pub expected: Expectation,
    /// Success detail or error message.
    pub result: Result<String, String>,
}

impl StepOutcome {
    /// Whether the outcome agrees with the expectation.
    pub fn matched(&self) -> bool {
        match self.expected {
            Expectation::Ok => self.result.is_ok(),
            Expectation::Error => self.result.is_err(),
        }
    }
}

/// Result of replaying a whole manifest.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    /// One entry per step, in order.
    pub outcomes: Vec<StepOutcome>,
    /// Every event the kernel committed, in order.
    pub events: Vec<KernelEvent>,
}

impl ReplayReport {
    /// Whether every step met its expectation.
    pub fn all_matched(&self) -> bool {
        self.outcomes.iter().all(StepOutcome::matched)
    }

    /// Steps whose outcome disagreed with the expectation.
    pub fn mismatches(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes.iter().filter(|o| !o.matched())
    }
}

/// Deployed collaborators and named identities for one replay.
struct World {
    kernel: KernelHandle,
    modules: HashMap<String, Arc<DeclaredModule>>,
    policies: HashMap<String, Arc<DeclaredPolicy>>,
    identities: HashMap<String, Address>,
}

impl World {
    fn identity(&mut self, name: &str) -> Address {
        if let Some(policy) = self.policies.get(name) {
            return policy.address();
        }
        *self
            .identities
            .entry(name.to_owned())
            .or_insert_with(Address::random)
    }

    fn module(&self, name: &str) -> anyhow::Result<Arc<DeclaredModule>> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown module '{name}'"))
    }

    fn policy(&self, name: &str) -> anyhow::Result<Arc<DeclaredPolicy>> {
        self.policies
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown policy '{name}'"))
    }
}

/// Replay `manifest` against a fresh kernel configured by `config`.
///
/// Step failures are recorded in the report, not returned as errors.
///
/// # Errors
///
/// Returns an error if the manifest is invalid or the audit file cannot be
/// opened.
pub fn run_manifest(manifest: &Manifest, config: &Config) -> anyhow::Result<ReplayReport> {
    manifest.validate()?;

    let executor = Address::random();
    let mut kernel = Kernel::new(executor).with_invariant_checks(config.kernel.check_invariants);
    if let Some(path) = &config.audit.path {
        let audit = AuditLogger::new(path)
            .with_context(|| format!("failed to open audit log at {}", path.display()))?;
        kernel = kernel.with_audit(Arc::new(audit));
    }
    let handle = kernel.into_handle();

    let modules = manifest
        .modules
        .iter()
        .map(|spec| {
            let operations = spec.operations.iter().cloned().map(OperationId::from);
            let module = DeclaredModule::new(&handle, spec.keycode, spec.version(), operations);
            (spec.name.clone(), Arc::new(module))
        })
        .collect();
    let policies = manifest
        .policies
        .iter()
        .map(|spec| {
            let policy = DeclaredPolicy::new(handle.address(), spec.permissions.clone());
            (spec.name.clone(), Arc::new(policy))
        })
        .collect();

    let mut world = World {
        kernel: handle,
        modules,
        policies,
        identities: HashMap::from([(INITIAL_EXECUTOR.to_owned(), executor)]),
    };

    let mut report = ReplayReport::default();
    for (index, spec) in manifest.steps.iter().enumerate() {
        let issuer = match &spec.issuer {
            Some(name) => world.identity(name),
            None => world.kernel.read()?.executor(),
        };

        let result = run_step(&mut world, issuer, &spec.step, &mut report.events)
            .map_err(|e| format!("{e:#}"));

        let outcome = StepOutcome {
            index,
            description: spec.step.to_string(),
            expected: spec.expect,
            result,
        };
        if outcome.matched() {
            info!(step = index, description = %outcome.description, "step matched expectation");
        } else {
            warn!(step = index, description = %outcome.description, expected = %outcome.expected, "step did not match expectation");
        }
        report.outcomes.push(outcome);
    }

    Ok(report)
}

fn run_step(
    world: &mut World,
    issuer: Address,
    step: &Step,
    events: &mut Vec<KernelEvent>,
) -> anyhow::Result<String> {
    let action = match step {
        Step::Install { module } => Action::install(world.module(module)?),
        Step::Upgrade { module } => Action::upgrade(world.module(module)?),
        Step::Approve { policy } => Action::approve(world.policy(policy)?),
        Step::Terminate { policy } => Action::terminate(world.policy(policy)?),
        Step::ChangeExecutor { to } => Action::ChangeExecutor(world.identity(to)),
        Step::Call {
            caller,
            keycode,
            operation,
        } => return call(world, caller, *keycode, &OperationId::from(operation.clone())),
    };

    let committed = world.kernel.execute_action(issuer, action)?;
    let detail = format!("{} event(s)", committed.len());
    events.extend(committed);
    Ok(detail)
}

fn call(
    world: &mut World,
    caller: &str,
    keycode: Keycode,
    operation: &OperationId,
) -> anyhow::Result<String> {
    let cached = world
        .policies
        .get(caller)
        .filter(|policy| policy.cached_module(keycode).is_some())
        .cloned();
    let count = if let Some(policy) = cached {
        policy.call(keycode, operation)?
    } else {
        // Unresolved policies and plain identities go straight to the live module.
        let address = world.identity(caller);
        let module = world
            .kernel
            .read()?
            .module(keycode)
            .ok_or_else(|| anyhow::anyhow!("module {keycode} is not installed"))?
            .downcast::<DeclaredModule>()
            .ok_or_else(|| anyhow::anyhow!("module {keycode} is not a declared module"))?;
        module.invoke(address, operation)?
    };
    Ok(format!("call #{count}"))
}
