//! Inventory records.

use serde::{Deserialize, Serialize};

use crate::RecordId;

/// An inventory definition as stored by the record-store.
///
/// `kind` is kept as the raw stored string; the engine decides whether it is
/// one it knows how to resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: RecordId,
    #[serde(default)]
    pub project_id: RecordId,
    #[serde(default)]
    pub name: String,
    /// Declared kind: `static`, `dynamic` or `file`.
    pub kind: String,
    /// Inventory text for `static`, script path for `dynamic`,
    /// path or host list for `file`.
    pub inventory: String,
    /// SSH key used to reach the inventory's hosts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_id: Option<RecordId>,
}

/// Recognized inventory kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryKind {
    /// Literal inventory text written to a temp file per run.
    StaticText,
    /// Executable script that prints the inventory.
    DynamicScript,
    /// Reference to an inventory managed elsewhere.
    ExternalReference,
}

impl InventoryKind {
    /// Parse a stored kind string. Returns `None` for unknown kinds.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "static" => Some(Self::StaticText),
            "dynamic" | "script" => Some(Self::DynamicScript),
            "file" | "external" => Some(Self::ExternalReference),
            _ => None,
        }
    }
}

impl InventoryRecord {
    /// A static inventory with the given content.
    pub fn static_text(id: RecordId, content: impl Into<String>) -> Self {
        Self {
            id,
            project_id: 0,
            name: String::new(),
            kind: "static".to_string(),
            inventory: content.into(),
            ssh_key_id: None,
        }
    }

    pub fn with_ssh_key(mut self, key_id: RecordId) -> Self {
        self.ssh_key_id = Some(key_id);
        self
    }
}
