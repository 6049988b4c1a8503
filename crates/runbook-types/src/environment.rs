//! Environment records (extra variables handed to the playbook).

use serde::{Deserialize, Serialize};

use crate::RecordId;

/// A named set of extra variables, passed as `--extra-vars` JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub id: RecordId,
    #[serde(default)]
    pub project_id: RecordId,
    #[serde(default)]
    pub name: String,
    pub json: serde_json::Value,
}
