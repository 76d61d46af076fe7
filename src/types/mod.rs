//! Value types shared by the kernel, modules and policies.
//!
//! Everything here is plain data: identities, keycodes, operation names and
//! permission pairs. None of these types carry behavior beyond validation.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// Opaque identity of an actor: the kernel, the executor, a module or a policy.
///
/// Every call into the kernel or into a module carries the caller's
/// `Address`; authorization is decided on it alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(Uuid);

impl Address {
    /// The "absent" identity. Never assigned to a live component.
    pub const ZERO: Address = Address(Uuid::nil());

    /// Mint a fresh, unique identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Whether this is the [`Address::ZERO`] sentinel.
    pub fn is_zero(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Keycode
// ---------------------------------------------------------------------------

/// Width of a keycode in bytes.
pub const KEYCODE_LEN: usize = 5;

/// Errors from keycode validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeycodeError {
    /// The input was empty.
    #[error("keycode is empty")]
    Empty,

    /// The input was longer than [`KEYCODE_LEN`] bytes.
    #[error("keycode '{0}' is longer than {KEYCODE_LEN} bytes")]
    TooLong(String),

    /// A byte outside `A..=Z`, or a letter following zero padding.
    #[error("keycode '{input}' has invalid byte {byte:#04x} at position {position}")]
    InvalidByte {
        /// Lossy rendering of the offending input.
        input: String,
        /// The rejected byte.
        byte: u8,
        /// Zero-based position of the rejected byte.
        position: usize,
    },
}

/// Fixed-width identifier naming one installed module.
///
/// Keycodes are one to five upper-case ASCII letters, right-padded with zero
/// bytes. They compare and hash over the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Keycode([u8; KEYCODE_LEN]);

impl Keycode {
    /// Parse a keycode from text such as `"TRSRY"` or `"MODA"`.
    ///
    /// # Errors
    ///
    /// Returns [`KeycodeError`] if the text is empty, longer than five
    /// bytes, or contains anything but `A..=Z`.
    pub fn parse(text: &str) -> Result<Self, KeycodeError> {
        let raw = text.as_bytes();
        if raw.is_empty() {
            return Err(KeycodeError::Empty);
        }
        if raw.len() > KEYCODE_LEN {
            return Err(KeycodeError::TooLong(text.to_owned()));
        }
        let mut bytes = [0u8; KEYCODE_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Self::from_bytes(bytes)
    }

    /// Validate raw, zero-padded keycode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KeycodeError`] if the first byte is zero, a byte is not an
    /// upper-case letter, or a letter follows zero padding.
    pub fn from_bytes(bytes: [u8; KEYCODE_LEN]) -> Result<Self, KeycodeError> {
        let mut padding = false;
        for (position, &byte) in bytes.iter().enumerate() {
            let valid = match byte {
                0 if position == 0 => return Err(KeycodeError::Empty),
                0 => {
                    padding = true;
                    true
                }
                b'A'..=b'Z' => !padding,
                _ => false,
            };
            if !valid {
                return Err(KeycodeError::InvalidByte {
                    input: String::from_utf8_lossy(&bytes).into_owned(),
                    byte,
                    position,
                });
            }
        }
        Ok(Self(bytes))
    }

    /// The raw, zero-padded bytes.
    pub fn as_bytes(&self) -> &[u8; KEYCODE_LEN] {
        &self.0
    }

    /// The keycode letters without padding.
    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|b| *b == 0).unwrap_or(KEYCODE_LEN);
        // Validated as ASCII on construction.
        std::str::from_utf8(&self.0[..len]).unwrap_or_default()
    }
}

impl fmt::Display for Keycode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Keycode {
    type Err = KeycodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Keycode {
    type Error = KeycodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Keycode> for String {
    fn from(keycode: Keycode) -> Self {
        keycode.as_str().to_owned()
    }
}

// ---------------------------------------------------------------------------
// Operations and permissions
// ---------------------------------------------------------------------------

/// Name of one restricted entry point on a module.
///
/// Modules usually declare these as constants:
/// `const WITHDRAW: OperationId = OperationId::new("withdraw");`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Cow<'static, str>);

impl OperationId {
    /// Declare an operation from a static name.
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// The operation name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OperationId {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl From<&'static str> for OperationId {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A `(keycode, operation)` pair a policy asks to be granted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Permission {
    /// Module the operation lives on.
    pub keycode: Keycode,
    /// Restricted entry point on that module.
    pub operation: OperationId,
}

impl Permission {
    /// Build a permission request.
    pub fn new(keycode: Keycode, operation: impl Into<OperationId>) -> Self {
        Self {
            keycode,
            operation: operation.into(),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.keycode, self.operation)
    }
}

/// Informational `(major, minor)` module version. Not enforced by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Breaking-change counter.
    pub major: u8,
    /// Compatible-change counter.
    pub minor: u8,
}

impl Version {
    /// Build a version pair.
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
