//! Endpoint and credential manifest written at the end of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub endpoint: String,
    pub credential: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub generated_at: DateTime<Utc>,
    pub host: String,
    pub secrets_file: String,
    #[serde(default)]
    pub services: BTreeMap<String, InventoryEntry>,
}
