// Field Registry - static `entity_type.field_name -> FieldId` mapping
//
// Change-log rows reference the mutated field by numeric id. The registry is
// built once from configuration at startup and handed to the extractor; a
// field that is not registered simply means "not tracked" and every stage
// report degrades to empty results.

use crate::config::FieldBinding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// FIELD IDENTITY
// ============================================================================

/// Identifier of a tracked field, as stored in `tracking_values.field_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldId(pub i64);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One registered field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: FieldId,

    /// Entity type the field belongs to (e.g., "crm.lead")
    pub model: String,

    /// Field name on that entity type (e.g., "stage_id")
    pub name: String,
}

impl FieldDefinition {
    pub fn new(id: i64, model: impl Into<String>, name: impl Into<String>) -> Self {
        FieldDefinition {
            id: FieldId(id),
            model: model.into(),
            name: name.into(),
        }
    }

    /// Dotted key used for lookups and log output ("crm.lead.stage_id")
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.model, &self.name)
    }
}

fn qualified_name(model: &str, name: &str) -> String {
    format!("{}.{}", model, name)
}

// ============================================================================
// FIELD REGISTRY
// ============================================================================

/// Catalog of tracked fields, keyed by `model.field`
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: HashMap<String, FieldDefinition>,
}

impl FieldRegistry {
    /// Registry with no tracked fields
    pub fn empty() -> Self {
        FieldRegistry::default()
    }

    /// Build the registry from configured bindings (later bindings win)
    pub fn from_bindings(bindings: &[FieldBinding]) -> Self {
        let mut registry = FieldRegistry::empty();
        for binding in bindings {
            registry.register(FieldDefinition::new(binding.id, &binding.model, &binding.name));
        }
        registry
    }

    pub fn register(&mut self, definition: FieldDefinition) {
        self.fields.insert(definition.qualified_name(), definition);
    }

    /// Resolve a field id; `None` when the field is not tracked
    pub fn lookup(&self, model: &str, name: &str) -> Option<FieldId> {
        self.fields.get(&qualified_name(model, name)).map(|def| def.id)
    }

    pub fn get(&self, model: &str, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(&qualified_name(model, name))
    }

    pub fn count(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
