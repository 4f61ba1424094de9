//! Named arguments for workflow starts and action invocations

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// A value carried by an argument
///
/// Implemented for every `Serialize + Debug` type, so engines hand over their
/// own typed values without converting them to JSON first. JSON conversion
/// can fail (maps with non-string keys, custom serializers that refuse);
/// [`coerce`](ArgumentValue::coerce) never does.
pub trait ArgumentValue: fmt::Debug + Send + Sync {
    /// Convert the value to JSON
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;

    /// Lossy string form of the value
    fn coerce(&self) -> String {
        format!("{:?}", self)
    }
}

impl<T> ArgumentValue for T
where
    T: Serialize + fmt::Debug + Send + Sync,
{
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Where an argument gets its value from
///
/// Exactly one source is populated for every argument.
#[derive(Debug, Clone)]
pub enum ArgumentSource {
    /// A literal value
    Value(Arc<dyn ArgumentValue>),

    /// The id of an earlier action whose result feeds this argument
    Reference(String),

    /// A selection path into the referenced result
    Selection(Arc<dyn ArgumentValue>),
}

/// A named input value
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub source: ArgumentSource,
}

impl Argument {
    /// Create an argument holding a literal value
    pub fn value(name: impl Into<String>, value: impl ArgumentValue + 'static) -> Self {
        Self {
            name: name.into(),
            source: ArgumentSource::Value(Arc::new(value)),
        }
    }

    /// Create an argument referencing another action's result
    pub fn reference(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ArgumentSource::Reference(reference.into()),
        }
    }

    /// Create an argument holding a selection
    pub fn selection(name: impl Into<String>, selection: impl ArgumentValue + 'static) -> Self {
        Self {
            name: name.into(),
            source: ArgumentSource::Selection(Arc::new(selection)),
        }
    }
}
