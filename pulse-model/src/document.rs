use crate::error::ModelResult;
use pulse_types::{EntityId, Properties};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An entity as exchanged with the backend.
///
/// Serialized as one JSON object: the id under `"@"`, every property as a
/// sibling key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "@")]
    pub id: EntityId,
    #[serde(flatten)]
    pub properties: Properties,
}

impl Document {
    /// Creates a document without properties.
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            properties: Properties::new(),
        }
    }

    /// Adds a property (builder style).
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Serializes to JSON.
    pub fn to_json(&self) -> ModelResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a document and checks its id.
    pub fn from_json(json: &str) -> ModelResult<Self> {
        let document: Self = serde_json::from_str(json)?;
        EntityId::parse(document.id.as_str())?;
        Ok(document)
    }
}
