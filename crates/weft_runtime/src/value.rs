// SPDX-License-Identifier: MIT OR Apache-2.0
//! Values carried by portals, and the declared kind tags of the scene schema.

use crate::model::{GroupKey, ModelKey};
use serde::{Deserialize, Serialize};

/// The declared kind of value a portal carries.
///
/// Scene descriptions author `Model`/`Group` portal values as scene ids;
/// the loader resolves them to live references during initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// No declared kind
    #[default]
    Any,
    /// Boolean value
    Bool,
    /// Integer value
    Int,
    /// Floating point value
    Float,
    /// String value
    Str,
    /// Reference to a shared model
    Model,
    /// Reference to a model group
    Group,
}

/// A value held by a portal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent / unresolved
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// String
    Str(String),
    /// Resolved model reference (`None` when the authored id was dangling)
    Model(Option<ModelKey>),
    /// Resolved group reference (`None` when the authored id was dangling)
    Group(Option<GroupKey>),
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl Value {
    /// Whether this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The resolved model reference, if this is a resolved model value.
    pub fn as_model(&self) -> Option<ModelKey> {
        match self {
            Self::Model(m) => *m,
            _ => None,
        }
    }

    /// The resolved group reference, if this is a resolved group value.
    pub fn as_group(&self) -> Option<GroupKey> {
        match self {
            Self::Group(g) => *g,
            _ => None,
        }
    }
}
