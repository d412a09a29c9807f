// Pipeline stage entity
//
// Stages are looked up by id (normal change-log rows) or by display name
// (rows that only recorded the label). Names are not required to be unique:
// a name lookup returns the first stage in pipeline order (sequence, id).

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Label used when a logged stage id no longer resolves to a stage
pub const UNDEFINED_STAGE: &str = "Undefined Stage";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: i64,
    pub name: String,

    /// Position in the pipeline (lower comes first)
    pub sequence: i64,
}

impl Stage {
    pub fn new(id: i64, name: impl Into<String>, sequence: i64) -> Self {
        Stage {
            id,
            name: name.into(),
            sequence,
        }
    }
}

/// Read access to the stage table
pub trait StageTable {
    /// First stage named exactly `name`, in (sequence, id) order
    fn lookup_by_name(&self, name: &str) -> Result<Option<Stage>>;

    /// Stage by id; `None` when it was deleted
    fn fetch_by_id(&self, id: i64) -> Result<Option<Stage>>;
}

/// Display name for a (possibly deleted or unnamed) stage
pub fn display_name(stage: Option<&Stage>) -> String {
    stage
        .map(|s| s.name.trim())
        .filter(|name| !name.is_empty())
        .unwrap_or(UNDEFINED_STAGE)
        .to_string()
}
