//! # Packet Store
//!
//! The abstraction over the captured-traffic store. The hub never owns
//! packets: it queries them through [`PacketStore::find`] and hands newly
//! captured ones to [`PacketStore::insert`].

pub mod memory;

use async_trait::async_trait;
use cs_core::{Filter, Options, PacketRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid record at line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid like pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("setting '{key}' not found in group '{group}'")]
    SettingNotFound { group: String, key: String },
}

/// A single key/value entry of a settings group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Query and settings interface of a packet store.
#[async_trait]
pub trait PacketStore: Send + Sync {
    /// Records matching `filter`, shaped by `options`.
    async fn find(
        &self,
        filter: &Filter,
        options: &Options,
    ) -> Result<Vec<PacketRecord>, StoreError>;

    /// Persist a newly captured packet.
    async fn insert(&self, record: PacketRecord) -> Result<(), StoreError>;

    async fn get_settings(&self, group: &str) -> Result<Vec<Setting>, StoreError>;

    async fn set_setting(&self, group: &str, setting: Setting) -> Result<(), StoreError>;

    async fn delete_setting(&self, group: &str, key: &str) -> Result<(), StoreError>;
}
