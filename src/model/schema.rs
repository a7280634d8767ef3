//! Attribute schemas
//!
//! Each entity kind declares a static table of attributes instead of
//! deriving them at runtime. The table drives attribute access,
//! marshalling and unknown-field detection.

use serde_json::Value;

/// Value coercion applied on local writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coerce {
    Integer,
    Boolean,
    Text,
}

impl Coerce {
    /// Whether the value already has the target type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Text => value.is_string(),
        }
    }

    /// Convert `value` to the target type; `Err` carries a reason.
    pub fn apply(&self, value: Value) -> Result<Value, String> {
        if self.matches(&value) || value.is_null() {
            return Ok(value);
        }
        match (self, &value) {
            (Self::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("'{s}' is not an integer")),
            (Self::Integer, Value::Number(n)) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Value::from(f as i64)),
                _ => Err(format!("{n} is not an integer")),
            },
            (Self::Boolean, Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err(format!("'{s}' is not a boolean")),
            },
            (Self::Boolean, Value::Number(n)) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(format!("{n} is not a boolean")),
            },
            (Self::Text, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (Self::Text, Value::Bool(b)) => Ok(Value::String(b.to_string())),
            (_, other) => Err(format!("cannot coerce {other} to {self:?}")),
        }
    }
}

/// One declared attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    pub name: &'static str,
    /// Never sent back to the server
    pub readonly: bool,
    /// Marshalled only when set
    pub optional: bool,
    pub coerce: Option<Coerce>,
}

impl Attribute {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            readonly: false,
            optional: false,
            coerce: None,
        }
    }

    pub const fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub const fn coerce(mut self, coerce: Coerce) -> Self {
        self.coerce = Some(coerce);
        self
    }
}

/// Static description of one resource type
pub trait Kind: Send + Sync + 'static {
    /// Human-readable kind name (`instance`)
    const NAME: &'static str;
    /// Collection under `/1.0` (`instances`)
    const COLLECTION: &'static str;
    /// Attribute identifying an entity within its collection
    const KEY: &'static str;
    /// Declared attributes
    const SCHEMA: &'static [Attribute];
    /// API extension the daemon must advertise
    const EXTENSION: Option<&'static str> = None;

    /// Key of a freshly created entity, from the finished create operation
    /// metadata. Used when the create body does not carry the key.
    fn key_from_operation(_metadata: &Value) -> Option<String> {
        None
    }
}

/// Look up a declared attribute
pub fn attribute<K: Kind>(name: &str) -> Option<&'static Attribute> {
    K::SCHEMA.iter().find(|a| a.name == name)
}
