//! Byte-to-string conversion registry.
//!
//! Every attached process owns one [`ConversionRegistry`]. It maps the type
//! name a client declared for a watch (e.g. `"Int32"`) to a function that
//! renders the raw bytes read from memory.
//!
//! Converters never fail the caller: an error returned by a converter, or a
//! panic inside a custom one, is turned into a diagnostic string.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

/// Signature of a conversion function: `(raw bytes, declared size) -> text`.
pub type ConvertFn = dyn Fn(&[u8], usize) -> Result<String, ConversionError> + Send + Sync;

/// Errors a converter may report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// Fewer bytes were available than the type needs
    #[error("{type_name} needs {needed} bytes, got {actual}")]
    TooShort {
        type_name: &'static str,
        needed: usize,
        actual: usize,
    },

    /// Any converter-specific failure
    #[error("{0}")]
    Custom(String),
}

impl ConversionError {
    pub fn custom(msg: impl fmt::Display) -> Self {
        Self::Custom(msg.to_string())
    }
}

// ============================================================================
// Base Types
// ============================================================================

/// Types every registry understands out of the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    AnsiString,
    Utf8String,
    HexPattern,
}

impl BaseType {
    pub const ALL: [BaseType; 14] = [
        BaseType::Bool,
        BaseType::Int8,
        BaseType::Int16,
        BaseType::Int32,
        BaseType::Int64,
        BaseType::UInt8,
        BaseType::UInt16,
        BaseType::UInt32,
        BaseType::UInt64,
        BaseType::Float32,
        BaseType::Float64,
        BaseType::AnsiString,
        BaseType::Utf8String,
        BaseType::HexPattern,
    ];

    /// Type name as sent on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            BaseType::Bool => "Bool",
            BaseType::Int8 => "Int8",
            BaseType::Int16 => "Int16",
            BaseType::Int32 => "Int32",
            BaseType::Int64 => "Int64",
            BaseType::UInt8 => "UInt8",
            BaseType::UInt16 => "UInt16",
            BaseType::UInt32 => "UInt32",
            BaseType::UInt64 => "UInt64",
            BaseType::Float32 => "Float32",
            BaseType::Float64 => "Float64",
            BaseType::AnsiString => "ANSIString",
            BaseType::Utf8String => "UTF8String",
            BaseType::HexPattern => "HEXPattern",
        }
    }

    /// Looks up a base type by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }

    /// Number of bytes a value of this type occupies, for fixed-width types.
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            BaseType::Bool | BaseType::Int8 | BaseType::UInt8 => Some(1),
            BaseType::Int16 | BaseType::UInt16 => Some(2),
            BaseType::Int32 | BaseType::UInt32 | BaseType::Float32 => Some(4),
            BaseType::Int64 | BaseType::UInt64 | BaseType::Float64 => Some(8),
            BaseType::AnsiString | BaseType::Utf8String | BaseType::HexPattern => None,
        }
    }

    /// Renders `raw` as this type.
    pub fn convert(self, raw: &[u8], declared_size: usize) -> Result<String, ConversionError> {
        let name = self.as_str();
        match self {
            BaseType::Bool => {
                let [byte] = fixed::<1>(name, raw)?;
                Ok((byte > 0).to_string())
            }
            BaseType::Int8 => Ok(i8::from_le_bytes(fixed(name, raw)?).to_string()),
            BaseType::Int16 => Ok(i16::from_le_bytes(fixed(name, raw)?).to_string()),
            BaseType::Int32 => Ok(i32::from_le_bytes(fixed(name, raw)?).to_string()),
            BaseType::Int64 => Ok(i64::from_le_bytes(fixed(name, raw)?).to_string()),
            BaseType::UInt8 => Ok(u8::from_le_bytes(fixed(name, raw)?).to_string()),
            BaseType::UInt16 => Ok(u16::from_le_bytes(fixed(name, raw)?).to_string()),
            BaseType::UInt32 => Ok(u32::from_le_bytes(fixed(name, raw)?).to_string()),
            BaseType::UInt64 => Ok(u64::from_le_bytes(fixed(name, raw)?).to_string()),
            BaseType::Float32 => Ok(f32::from_le_bytes(fixed(name, raw)?).to_string()),
            BaseType::Float64 => Ok(f64::from_le_bytes(fixed(name, raw)?).to_string()),
            BaseType::AnsiString => Ok(text(raw, declared_size).iter().map(|&b| char::from(b)).collect()),
            BaseType::Utf8String => Ok(String::from_utf8_lossy(text(raw, declared_size)).into_owned()),
            BaseType::HexPattern => Ok(hex_dump(raw)),
        }
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Copies the first `N` bytes, or reports how many were missing.
fn fixed<const N: usize>(type_name: &'static str, raw: &[u8]) -> Result<[u8; N], ConversionError> {
    raw.get(..N)
        .and_then(|bytes| <[u8; N]>::try_from(bytes).ok())
        .ok_or(ConversionError::TooShort {
            type_name,
            needed: N,
            actual: raw.len(),
        })
}

/// Text region: at most `declared_size` bytes, cut at the first NUL.
fn text(raw: &[u8], declared_size: usize) -> &[u8] {
    let limited = raw.get(..declared_size).unwrap_or(raw);
    let end = limited.iter().position(|&b| b == 0).unwrap_or(limited.len());
    limited.get(..end).unwrap_or(limited)
}

/// Space-separated lowercase hex, two digits per byte.
pub fn hex_dump(raw: &[u8]) -> String {
    raw.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Registry
// ============================================================================

/// Maps declared type names to conversion functions.
#[derive(Clone)]
pub struct ConversionRegistry {
    converters: HashMap<String, Arc<ConvertFn>>,
}

impl ConversionRegistry {
    /// Creates a registry with every [`BaseType`] registered.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for base in BaseType::ALL {
            registry.register(base.as_str(), move |raw: &[u8], size: usize| base.convert(raw, size));
        }
        registry
    }

    /// Creates a registry with no converters at all.
    pub fn empty() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    /// Registers a converter under `type_name`.
    ///
    /// The first registration for a name wins; returns `false` if the name
    /// was already taken.
    pub fn register<F>(&mut self, type_name: impl Into<String>, converter: F) -> bool
    where
        F: Fn(&[u8], usize) -> Result<String, ConversionError> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        if self.converters.contains_key(&type_name) {
            debug!(type_name = %type_name, "Converter already registered, keeping existing one");
            return false;
        }
        self.converters.insert(type_name, Arc::new(converter));
        true
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.converters.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.converters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Renders `raw` as `type_name`.
    ///
    /// Returns `None` for an unregistered type. A failing or panicking
    /// converter yields a diagnostic string instead of an error.
    pub fn convert(&self, type_name: &str, raw: &[u8], declared_size: usize) -> Option<String> {
        let converter = self.converters.get(type_name)?;

        let result = catch_unwind(AssertUnwindSafe(|| converter(raw, declared_size)));

        Some(match result {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => format!("Conversion function failed: {e}"),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                format!("Conversion function panicked: {reason}")
            }
        })
    }
}

impl Default for ConversionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConversionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
