//! Response shapes for the Battlemetrics JSON:API endpoints we consume.
//! Unknown fields are ignored so upstream additions do not break parsing.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// JSON:API envelope: everything interesting lives under `data`.
#[derive(Debug, Deserialize)]
pub struct Document<T> {
    pub data: Option<T>,
}

/// `GET /players/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerInfo {
    pub id: String,
    pub attributes: PlayerAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerAttributes {
    pub name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// `GET /servers/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub attributes: ServerAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerAttributes {
    pub name: String,
    #[serde(default)]
    pub players: Option<u32>,
    #[serde(rename = "maxPlayers", default)]
    pub max_players: Option<u32>,
    #[serde(default)]
    pub details: Option<ServerDetails>,
}

/// Game-specific extras; only the Rust fields matter here.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerDetails {
    #[serde(default)]
    pub rust_last_wipe: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rust_maps: Option<RustMaps>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RustMaps {
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(rename = "thumbnailUrl", default)]
    pub thumbnail_url: Option<String>,
}

impl ServerInfo {
    pub fn wipe(&self) -> Option<i64> {
        self.attributes
            .details
            .as_ref()?
            .rust_last_wipe
            .map(|t| t.timestamp())
    }

    pub fn map_url(&self) -> Option<String> {
        self.attributes.details.as_ref()?.rust_maps.as_ref()?.url.clone()
    }

    pub fn map_preview(&self) -> Option<String> {
        self.attributes
            .details
            .as_ref()?
            .rust_maps
            .as_ref()?
            .thumbnail_url
            .clone()
    }
}

/// One element of `GET /players/{id}/relationships/sessions`
#[derive(Debug, Clone, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub attributes: SessionAttributes,
    #[serde(default)]
    pub relationships: Option<SessionRelationships>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionAttributes {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stop: Option<DateTime<Utc>>,
    #[serde(rename = "firstTime", default)]
    pub first_time: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionRelationships {
    #[serde(default)]
    pub server: Option<Relationship>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Relationship {
    pub data: Option<RelationshipData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipData {
    pub id: String,
}

impl SessionRecord {
    /// The referenced server id, when the relationship is present.
    pub fn server_id(&self) -> Option<&str> {
        self.relationships
            .as_ref()?
            .server
            .as_ref()?
            .data
            .as_ref()
            .map(|data| data.id.as_str())
    }
}
