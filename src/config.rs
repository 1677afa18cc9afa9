//! Sync layer configuration.

use crate::error::{Result, SyncError};
use serde::Deserialize;

/// Sync configuration.
///
/// Every field has a default, so a JSON document only needs to name the
/// values it overrides.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote collection holding listings.
    pub listings_path: String,

    /// Remote collection of shared room documents.
    pub rooms_path: String,

    /// Remote root of the per-user private mailboxes.
    pub mailbox_path: String,

    /// Remote root of the per-room message logs.
    pub messages_path: String,

    /// Remote root of the per-user notification lists.
    pub notifications_path: String,

    /// Prefix applied to every local storage key.
    pub storage_prefix: String,

    /// Counterpart id used when a listing's seller is unknown.
    pub placeholder_seller: String,

    /// Max keywords per user.
    /// Default: 30
    pub max_keywords: usize,

    /// Max remembered search queries.
    /// Default: 10
    pub max_recent_searches: usize,

    /// Whether the bundled demo listings take part in the merge.
    pub include_seed: bool,

    /// Buffer size for channel-based bus receivers.
    /// Default: 256
    pub bus_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            listings_path: "products".into(),
            rooms_path: "chats".into(),
            mailbox_path: "user_chats".into(),
            messages_path: "messages".into(),
            notifications_path: "notifications".into(),
            storage_prefix: "carrot_".into(),
            placeholder_seller: "bot-seller".into(),
            max_keywords: 30,
            max_recent_searches: 10,
            include_seed: true,
            bus_buffer: 256,
        }
    }
}

impl SyncConfig {
    /// Parse a JSON config document, filling gaps with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break path addressing or the id scheme.
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("listings_path", &self.listings_path),
            ("rooms_path", &self.rooms_path),
            ("mailbox_path", &self.mailbox_path),
            ("messages_path", &self.messages_path),
            ("notifications_path", &self.notifications_path),
        ] {
            if path.trim_matches('/').is_empty() {
                return Err(SyncError::InvalidConfig(format!("{} must not be empty", name)));
            }
        }
        if self.placeholder_seller.is_empty() {
            return Err(SyncError::InvalidConfig(
                "placeholder_seller must not be empty".into(),
            ));
        }
        if self.bus_buffer == 0 {
            return Err(SyncError::InvalidConfig("bus_buffer must be positive".into()));
        }
        Ok(())
    }
}
