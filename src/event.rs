// src/event.rs
use serde::{Deserialize, Serialize};

/// Body of `GET /__reload_version`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionResponse {
    /// Current reload version.
    pub version: u64,
}

/// Message pushed to WebSocket clients when the served content changes.
///
/// # Fields
/// - `kind`: Always `"reload"`, serialized as `type`.
/// - `version`: The reload version that triggered this message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReloadMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u64,
}

impl ReloadMessage {
    pub fn reload(version: u64) -> Self {
        Self {
            kind: "reload".to_string(),
            version,
        }
    }
}
