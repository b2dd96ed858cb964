use super::Value;
use std::fmt;

/// Lifecycle of an entity identifier.
///
/// ```text
/// Unassigned ──assign──> Assigned ──mark_persisted──> Persisted
///      │                                                 ^
///      └──────────── mark_persisted (generated) ─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierState {
    Unassigned,
    Assigned,
    Persisted,
}

impl fmt::Display for IdentifierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierState::Unassigned => write!(f, "UNASSIGNED"),
            IdentifierState::Assigned => write!(f, "ASSIGNED"),
            IdentifierState::Persisted => write!(f, "PERSISTED"),
        }
    }
}

/// Surrogate key value plus its persisted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    value: Option<Value>,
    state: IdentifierState,
}

impl Identifier {
    pub fn unassigned() -> Self {
        Self {
            value: None,
            state: IdentifierState::Unassigned,
        }
    }

    pub fn assigned(value: impl Into<Value>) -> Self {
        let value = value.into();
        if value.is_null() {
            return Self::unassigned();
        }
        Self {
            value: Some(value),
            state: IdentifierState::Assigned,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn state(&self) -> IdentifierState {
        self.state
    }

    pub fn is_persisted(&self) -> bool {
        self.state == IdentifierState::Persisted
    }

    /// Sets the value. Re-assigning the same value is a no-op; changing the
    /// value of a persisted identifier is refused and the current value returned.
    pub fn assign(&mut self, value: Value) -> std::result::Result<(), Value> {
        if self.state == IdentifierState::Persisted {
            return match &self.value {
                Some(current) if *current == value => Ok(()),
                Some(current) => Err(current.clone()),
                None => Err(Value::Null),
            };
        }
        self.value = if value.is_null() { None } else { Some(value) };
        self.state = if self.value.is_some() {
            IdentifierState::Assigned
        } else {
            IdentifierState::Unassigned
        };
        Ok(())
    }

    /// Flips to `Persisted`. Returns false when the identifier was already persisted.
    pub fn mark_persisted(&mut self) -> bool {
        if self.state == IdentifierState::Persisted {
            return false;
        }
        self.state = IdentifierState::Persisted;
        true
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Self::unassigned()
    }
}
