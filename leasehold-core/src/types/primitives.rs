use serde::{Deserialize, Serialize};

use crate::error::{LockError, LockResult};

/// Type string for mutually exclusive locks.
pub const LOCK_TYPE: &str = "lock";
/// Type string for presence (liveness) registrations.
pub const PRESENCE_TYPE: &str = "presence";

/// Numeric classifier carried alongside (or instead of) the type string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum TypeCode {
    #[default]
    Unknown,
    Lock,
    Presence,
}

impl TypeCode {
    /// The type string implied by the code; empty for `Unknown`.
    pub fn type_name(self) -> &'static str {
        match self {
            TypeCode::Unknown => "",
            TypeCode::Lock => LOCK_TYPE,
            TypeCode::Presence => PRESENCE_TYPE,
        }
    }
}

impl TryFrom<i32> for TypeCode {
    type Error = LockError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TypeCode::Unknown),
            1 => Ok(TypeCode::Lock),
            2 => Ok(TypeCode::Presence),
            _ => Err(LockError::InvalidType),
        }
    }
}

impl From<TypeCode> for i32 {
    fn from(code: TypeCode) -> Self {
        match code {
            TypeCode::Unknown => 0,
            TypeCode::Lock => 1,
            TypeCode::Presence => 2,
        }
    }
}

/// Checks that a type string and a type code describe the same kind of resource.
///
/// An `Unknown` code requires a known type string. A known code accepts an
/// empty string, or a string naming the same type.
pub fn validate_type(type_name: &str, type_code: TypeCode) -> LockResult<()> {
    match type_code {
        TypeCode::Unknown => {
            if type_name == LOCK_TYPE || type_name == PRESENCE_TYPE {
                Ok(())
            } else {
                Err(LockError::InvalidType)
            }
        }
        code => {
            if type_name.is_empty() || type_name == code.type_name() {
                Ok(())
            } else {
                Err(LockError::InvalidType)
            }
        }
    }
}

/// The durable, caller-visible identity of a coordination target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub key: String,
    /// Current holder; empty means unheld.
    #[serde(default)]
    pub owner: String,
    /// Opaque payload attached by the holder (e.g. its address).
    #[serde(default)]
    pub value: String,
    #[serde(default, rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub type_code: TypeCode,
}

impl Resource {
    pub fn new(
        key: impl Into<String>,
        owner: impl Into<String>,
        value: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            owner: owner.into(),
            value: value.into(),
            resource_type: resource_type.into(),
            type_code: TypeCode::Unknown,
        }
    }

    pub fn lock(key: impl Into<String>, owner: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, owner, value, LOCK_TYPE)
    }

    pub fn presence(
        key: impl Into<String>,
        owner: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::new(key, owner, value, PRESENCE_TYPE)
    }

    pub fn with_type_code(mut self, type_code: TypeCode) -> Self {
        self.type_code = type_code;
        self
    }

    /// The type string, falling back to the name implied by the type code.
    pub fn effective_type(&self) -> &str {
        if self.resource_type.is_empty() {
            self.type_code.type_name()
        } else {
            &self.resource_type
        }
    }

    pub fn validate_type(&self) -> LockResult<()> {
        validate_type(&self.resource_type, self.type_code)
    }
}

/// Optional type restriction for list and count operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeFilter {
    #[serde(default, rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub type_code: TypeCode,
}

impl TypeFilter {
    /// Matches every row regardless of type.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            type_code: TypeCode::Unknown,
        }
    }

    pub fn of_code(type_code: TypeCode) -> Self {
        Self {
            resource_type: String::new(),
            type_code,
        }
    }

    /// `None` when the filter matches every type.
    pub fn effective_type(&self) -> Option<&str> {
        let name = if self.resource_type.is_empty() {
            self.type_code.type_name()
        } else {
            &self.resource_type
        };
        (!name.is_empty()).then_some(name)
    }

    /// An empty filter is valid; otherwise the type string and code must agree.
    pub fn validate(&self) -> LockResult<()> {
        if self.resource_type.is_empty() && self.type_code == TypeCode::Unknown {
            return Ok(());
        }
        validate_type(&self.resource_type, self.type_code)
    }
}
