//! Access key records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::RecordId;

/// Opaque secret material (an SSH private key, a vault password, ...).
///
/// `Debug` never prints the content.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyMaterial(String);

impl KeyMaterial {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED; {} bytes])", self.0.len())
    }
}

/// A stored access key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: RecordId,
    #[serde(default)]
    pub project_id: RecordId,
    #[serde(default)]
    pub name: String,
    pub secret: KeyMaterial,
}

impl KeyRecord {
    pub fn new(id: RecordId, secret: impl Into<String>) -> Self {
        Self {
            id,
            project_id: 0,
            name: String::new(),
            secret: KeyMaterial::new(secret),
        }
    }
}
