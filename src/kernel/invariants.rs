//! Runtime-checkable kernel invariants.
//!
//! 1. **Binding inverse**: keycode → module and module → keycode are mutual
//!    inverses, and each bound module exports the keycode it is bound under.
//! 2. **Registry uniqueness**: every approved policy appears exactly once.
//! 3. **Grant ownership**: only approved policies hold granted permissions.

use std::collections::HashSet;

use crate::kernel::state::KernelState;

/// An invariant violation with details.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub description: String,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.description)
    }
}

/// Check all kernel invariants.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_all_invariants(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    violations.extend(check_binding_inverse(state));
    violations.extend(check_registry_uniqueness(state));
    violations.extend(check_grant_ownership(state));

    violations
}

fn check_binding_inverse(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let modules = &state.modules;

    for (keycode, handle) in modules.iter() {
        if modules.keycode_of(handle.address()) != Some(*keycode) {
            violations.push(InvariantViolation {
                invariant: "binding_inverse",
                description: format!(
                    "keycode {keycode} maps to {} but the reverse entry disagrees",
                    handle.address()
                ),
            });
        }
        if handle.keycode() != *keycode {
            violations.push(InvariantViolation {
                invariant: "binding_inverse",
                description: format!(
                    "module {} exports {} but is bound under {keycode}",
                    handle.address(),
                    handle.keycode()
                ),
            });
        }
    }

    for (address, keycode) in modules.reverse_iter() {
        if modules.address_of(*keycode) != Some(*address) {
            violations.push(InvariantViolation {
                invariant: "binding_inverse",
                description: format!(
                    "module {address} maps to {keycode} but the forward entry disagrees"
                ),
            });
        }
    }

    violations
}

fn check_registry_uniqueness(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let mut seen = HashSet::new();

    for address in state.policies.addresses() {
        if !seen.insert(*address) {
            violations.push(InvariantViolation {
                invariant: "registry_uniqueness",
                description: format!("policy {address} appears more than once"),
            });
        }
        if state.policies.get(*address).is_none() {
            violations.push(InvariantViolation {
                invariant: "registry_uniqueness",
                description: format!("policy {address} is listed without an entry"),
            });
        }
    }

    violations
}

fn check_grant_ownership(state: &KernelState) -> Vec<InvariantViolation> {
    state
        .permissions
        .holders()
        .into_iter()
        .filter(|policy| !state.policies.contains(*policy))
        .map(|policy| InvariantViolation {
            invariant: "grant_ownership",
            description: format!("policy {policy} holds grants but is not approved"),
        })
        .collect()
}
