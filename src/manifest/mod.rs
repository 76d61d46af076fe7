//! Declarative kernel scenarios.
//!
//! A manifest declares generic modules and policies plus a scripted list of
//! lifecycle actions and restricted calls. [`run_manifest`] replays it
//! against a fresh kernel and reports whether each step met its expectation.
//!
//! ```toml
//! [[modules]]
//! name = "treasury"
//! keycode = "TRSRY"
//! operations = ["withdraw"]
//!
//! [[policies]]
//! name = "payroll"
//! permissions = [{ keycode = "TRSRY", operation = "withdraw" }]
//!
//! [[steps]]
//! action = "install"
//! module = "treasury"
//!
//! [[steps]]
//! action = "approve"
//! policy = "payroll"
//!
//! [[steps]]
//! action = "call"
//! caller = "payroll"
//! keycode = "TRSRY"
//! operation = "withdraw"
//! ```

pub mod declared;
pub mod replay;

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::types::{Keycode, Permission, Version};

pub use declared::{DeclaredModule, DeclaredPolicy};
pub use replay::{run_manifest, ReplayReport, StepOutcome};

/// Name of the identity that starts out as executor.
pub const INITIAL_EXECUTOR: &str = "executor";

/// Errors from manifest parsing and validation.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The TOML could not be parsed.
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    /// Two modules share a name.
    #[error("duplicate module name '{0}'")]
    DuplicateModule(String),

    /// Two policies share a name.
    #[error("duplicate policy name '{0}'")]
    DuplicatePolicy(String),

    /// A step names a module that is not declared.
    #[error("step {step}: unknown module '{name}'")]
    UnknownModule {
        /// Zero-based step index.
        step: usize,
        /// The missing name.
        name: String,
    },

    /// A step names a policy that is not declared.
    #[error("step {step}: unknown policy '{name}'")]
    UnknownPolicy {
        /// Zero-based step index.
        step: usize,
        /// The missing name.
        name: String,
    },
}

/// A full scenario.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    /// Modules available for install and upgrade.
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,

    /// Policies available for approval.
    #[serde(default)]
    pub policies: Vec<PolicySpec>,

    /// Steps to replay, in order.
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

/// One declared module instance.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleSpec {
    /// Name steps refer to.
    pub name: String,
    /// Keycode the module exports.
    pub keycode: Keycode,
    /// `[major, minor]`.
    #[serde(default = "default_version")]
    pub version: (u8, u8),
    /// Restricted operations the module exposes.
    #[serde(default)]
    pub operations: Vec<String>,
}

impl ModuleSpec {
    /// The declared version as a [`Version`].
    pub fn version(&self) -> Version {
        Version::new(self.version.0, self.version.1)
    }
}

/// One declared policy instance.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicySpec {
    /// Name steps refer to.
    pub name: String,
    /// Permissions the policy requests.
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// What a step is expected to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    /// The step succeeds.
    #[default]
    Ok,
    /// The step fails.
    Error,
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// A step plus who issues it and what it should do.
#[derive(Debug, Clone, Deserialize)]
pub struct StepSpec {
    /// The step itself.
    #[serde(flatten)]
    pub step: Step,
    /// Identity issuing a lifecycle step; defaults to the current executor.
    #[serde(default, rename = "as")]
    pub issuer: Option<String>,
    /// Expected outcome.
    #[serde(default)]
    pub expect: Expectation,
}

/// A scripted action.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Install a declared module.
    Install {
        /// Module name.
        module: String,
    },
    /// Upgrade to a declared module.
    Upgrade {
        /// Module name.
        module: String,
    },
    /// Approve a declared policy.
    Approve {
        /// Policy name.
        policy: String,
    },
    /// Terminate a declared policy.
    Terminate {
        /// Policy name.
        policy: String,
    },
    /// Hand executor rights to a named identity.
    ChangeExecutor {
        /// Identity name.
        to: String,
    },
    /// Invoke a restricted operation.
    Call {
        /// Policy name, or a plain identity name.
        caller: String,
        /// Module keycode.
        keycode: Keycode,
        /// Operation name.
        operation: String,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install { module } => write!(f, "install {module}"),
            Self::Upgrade { module } => write!(f, "upgrade {module}"),
            Self::Approve { policy } => write!(f, "approve {policy}"),
            Self::Terminate { policy } => write!(f, "terminate {policy}"),
            Self::ChangeExecutor { to } => write!(f, "change executor to {to}"),
            Self::Call {
                caller,
                keycode,
                operation,
            } => write!(f, "{caller} calls {keycode}.{operation}"),
        }
    }
}

fn default_version() -> (u8, u8) {
    (1, 0)
}

impl Manifest {
    /// Parse a manifest from TOML text and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] on parse or validation failure.
    pub fn from_toml(text: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = toml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read, parse and validate a manifest file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest at {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid manifest at {}", path.display()))
    }

    /// Check names are unique and every step refers to something declared.
    ///
    /// # Errors
    ///
    /// Returns the first [`ManifestError`] found.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut modules = HashSet::new();
        for module in &self.modules {
            if !modules.insert(module.name.as_str()) {
                return Err(ManifestError::DuplicateModule(module.name.clone()));
            }
        }
        let mut policies = HashSet::new();
        for policy in &self.policies {
            if !policies.insert(policy.name.as_str()) {
                return Err(ManifestError::DuplicatePolicy(policy.name.clone()));
            }
        }

        for (step, spec) in self.steps.iter().enumerate() {
            match &spec.step {
                Step::Install { module } | Step::Upgrade { module } => {
                    if !modules.contains(module.as_str()) {
                        return Err(ManifestError::UnknownModule {
                            step,
                            name: module.clone(),
                        });
                    }
                }
                Step::Approve { policy } | Step::Terminate { policy } => {
                    if !policies.contains(policy.as_str()) {
                        return Err(ManifestError::UnknownPolicy {
                            step,
                            name: policy.clone(),
                        });
                    }
                }
                Step::ChangeExecutor { .. } | Step::Call { .. } => {}
            }
        }
        Ok(())
    }

    /// Module spec by name.
    pub fn module(&self, name: &str) -> Option<&ModuleSpec> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Policy spec by name.
    pub fn policy(&self, name: &str) -> Option<&PolicySpec> {
        self.policies.iter().find(|p| p.name == name)
    }
}
