//! Permission matrix: policy → keycode → operation → granted.

use std::collections::HashMap;

use crate::types::{Address, Keycode, OperationId, Permission};

/// Three-level grant table consulted by every restricted module call.
#[derive(Debug, Clone, Default)]
pub struct PermissionMatrix {
    grants: HashMap<Address, HashMap<Keycode, HashMap<OperationId, bool>>>,
}

impl PermissionMatrix {
    /// Create an empty matrix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `policy` may call `operation` on the module named `keycode`.
    pub fn is_granted(&self, policy: Address, keycode: Keycode, operation: &OperationId) -> bool {
        self.grants
            .get(&policy)
            .and_then(|by_keycode| by_keycode.get(&keycode))
            .and_then(|by_op| by_op.get(operation))
            .copied()
            .unwrap_or(false)
    }

    /// Set the granted flag for one entry.
    ///
    /// Revoking removes the entry, and any map it leaves empty, so the
    /// matrix only holds live grants.
    pub(crate) fn set(&mut self, policy: Address, permission: &Permission, granted: bool) {
        if granted {
            self.grants
                .entry(policy)
                .or_default()
                .entry(permission.keycode)
                .or_default()
                .insert(permission.operation.clone(), true);
            return;
        }

        let Some(by_keycode) = self.grants.get_mut(&policy) else {
            return;
        };
        if let Some(by_op) = by_keycode.get_mut(&permission.keycode) {
            by_op.remove(&permission.operation);
            if by_op.is_empty() {
                by_keycode.remove(&permission.keycode);
            }
        }
        if by_keycode.is_empty() {
            self.grants.remove(&policy);
        }
    }

    /// Every entry currently granted to `policy`, sorted.
    pub fn granted_to(&self, policy: Address) -> Vec<Permission> {
        let mut granted: Vec<Permission> = self
            .grants
            .get(&policy)
            .into_iter()
            .flat_map(|by_keycode| by_keycode.iter())
            .flat_map(|(keycode, by_op)| {
                by_op
                    .iter()
                    .filter(|(_, granted)| **granted)
                    .map(|(op, _)| Permission::new(*keycode, op.clone()))
            })
            .collect();
        granted.sort();
        granted
    }

    /// Policies holding at least one granted entry.
    pub fn holders(&self) -> Vec<Address> {
        self.grants
            .iter()
            .filter(|(_, by_keycode)| {
                by_keycode
                    .values()
                    .any(|by_op| by_op.values().any(|granted| *granted))
            })
            .map(|(policy, _)| *policy)
            .collect()
    }
}
