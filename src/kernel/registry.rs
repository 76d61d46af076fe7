//! Module and policy registries owned by the kernel.
//!
//! [`ModuleRegistry`] keeps the keycode/address binding in both directions
//! and only exposes mutations that update both maps together.
//! [`PolicyRegistry`] keeps the set of approved policies in insertion order.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::module::Module;
use crate::policy::Policy;
use crate::types::{Address, Keycode, Permission, Version};

// ---------------------------------------------------------------------------
// Module handles
// ---------------------------------------------------------------------------

/// Cloneable handle to an installed (or installable) module.
///
/// Carries both the trait object the kernel talks to and a type-erased view
/// that lets a policy recover the concrete module type.
#[derive(Clone)]
pub struct ModuleHandle {
    module: Arc<dyn Module>,
    any: Arc<dyn Any + Send + Sync>,
}

impl ModuleHandle {
    /// Wrap a concrete module.
    pub fn new<M: Module>(module: Arc<M>) -> Self {
        Self {
            any: Arc::clone(&module) as Arc<dyn Any + Send + Sync>,
            module,
        }
    }

    /// The module as the kernel sees it.
    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    /// Recover the concrete module type, if it matches.
    pub fn downcast<M: Module>(&self) -> Option<Arc<M>> {
        Arc::clone(&self.any).downcast::<M>().ok()
    }

    /// Identity of the module instance.
    pub fn address(&self) -> Address {
        self.module.address()
    }

    /// Keycode the module exports.
    pub fn keycode(&self) -> Keycode {
        self.module.keycode()
    }

    /// Informational module version.
    pub fn version(&self) -> Version {
        self.module.version()
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("address", &self.address())
            .field("keycode", &self.keycode())
            .field("version", &self.version())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Module registry
// ---------------------------------------------------------------------------

/// Bidirectional keycode/address binding for live modules.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    by_keycode: HashMap<Keycode, ModuleHandle>,
    by_address: HashMap<Address, Keycode>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Address currently bound to `keycode`, if any.
    pub fn address_of(&self, keycode: Keycode) -> Option<Address> {
        self.by_keycode.get(&keycode).map(ModuleHandle::address)
    }

    /// Keycode currently bound to `address`, if any.
    pub fn keycode_of(&self, address: Address) -> Option<Keycode> {
        self.by_address.get(&address).copied()
    }

    /// Handle of the module currently bound to `keycode`.
    pub fn get(&self, keycode: Keycode) -> Option<&ModuleHandle> {
        self.by_keycode.get(&keycode)
    }

    /// Whether any module is bound to `keycode`.
    pub fn contains(&self, keycode: Keycode) -> bool {
        self.by_keycode.contains_key(&keycode)
    }

    /// All bound keycodes, sorted.
    pub fn keycodes(&self) -> Vec<Keycode> {
        let mut keycodes: Vec<Keycode> = self.by_keycode.keys().copied().collect();
        keycodes.sort();
        keycodes
    }

    /// Number of live modules.
    pub fn len(&self) -> usize {
        self.by_keycode.len()
    }

    /// Whether no module is installed.
    pub fn is_empty(&self) -> bool {
        self.by_keycode.is_empty()
    }

    /// Iterate over `(keycode, handle)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&Keycode, &ModuleHandle)> {
        self.by_keycode.iter()
    }

    /// Iterate over the reverse `(address, keycode)` map.
    pub fn reverse_iter(&self) -> impl Iterator<Item = (&Address, &Keycode)> {
        self.by_address.iter()
    }

    /// Bind `module` under `keycode`, replacing any prior binding.
    ///
    /// The previous module's reverse entry is cleared in the same call.
    /// Returns the handle that was bound before, if any.
    pub(crate) fn bind(&mut self, keycode: Keycode, module: ModuleHandle) -> Option<ModuleHandle> {
        let address = module.address();
        let previous = self.by_keycode.insert(keycode, module);
        if let Some(old) = &previous {
            self.by_address.remove(&old.address());
        }
        self.by_address.insert(address, keycode);
        previous
    }
}

// ---------------------------------------------------------------------------
// Policy registry
// ---------------------------------------------------------------------------

/// An approved policy together with the permissions granted to it.
#[derive(Clone)]
pub struct ApprovedPolicy {
    /// The policy instance.
    pub policy: Arc<dyn Policy>,
    /// Permissions the kernel granted when approving it.
    pub granted: Vec<Permission>,
}

impl fmt::Debug for ApprovedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovedPolicy")
            .field("address", &self.policy.address())
            .field("granted", &self.granted)
            .finish()
    }
}

/// Approved policies, unique by address.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    order: Vec<Address>,
    entries: HashMap<Address, ApprovedPolicy>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `address` is an approved policy.
    pub fn contains(&self, address: Address) -> bool {
        self.entries.contains_key(&address)
    }

    /// Approved policy entry for `address`.
    pub fn get(&self, address: Address) -> Option<&ApprovedPolicy> {
        self.entries.get(&address)
    }

    /// Addresses of approved policies in registry order.
    pub fn addresses(&self) -> &[Address] {
        &self.order
    }

    /// Approved policies in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &ApprovedPolicy> {
        self.order.iter().filter_map(|addr| self.entries.get(addr))
    }

    /// Number of approved policies.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no policy is approved.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Append a policy. Returns `false` and changes nothing if it is already present.
    pub(crate) fn insert(&mut self, entry: ApprovedPolicy) -> bool {
        let address = entry.policy.address();
        if self.entries.contains_key(&address) {
            return false;
        }
        self.order.push(address);
        self.entries.insert(address, entry);
        true
    }

    /// Remove a policy by swapping the last slot into its place.
    ///
    /// Stops at the first match. Returns the removed entry.
    pub(crate) fn remove(&mut self, address: Address) -> Option<ApprovedPolicy> {
        let slot = self.order.iter().position(|a| *a == address)?;
        self.order.swap_remove(slot);
        self.entries.remove(&address)
    }
}
