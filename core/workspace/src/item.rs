//! Local workspace items.

use blake2::{Blake2s256, Digest};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use docsync_common::ItemType;

/// Placeholder hash that never equals a computed one, so the item is fetched.
pub const FORCE_HASH: u64 = 1;

/// Id of the trash folder.
pub const TRASH_ID: &str = "trash";

/// An item of the local workspace: folder, file, content, data or location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Owning file of a sync or publish location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default)]
    pub hash: u64,
    /// Type-specific fields (location settings, data payload).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkspaceItem {
    fn bare(id: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            id: id.into(),
            item_type,
            name: String::new(),
            parent_id: None,
            file_id: None,
            hash: 0,
            extra: Map::new(),
        }
    }

    pub fn folder(id: impl Into<String>, name: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            name: name.into(),
            parent_id,
            ..Self::bare(id, ItemType::Folder)
        }
        .with_hash()
    }

    pub fn file(id: impl Into<String>, name: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            name: name.into(),
            parent_id,
            ..Self::bare(id, ItemType::File)
        }
        .with_hash()
    }

    /// A sync or publish location attached to a file.
    pub fn location(
        id: impl Into<String>,
        item_type: ItemType,
        file_id: impl Into<String>,
        extra: Map<String, Value>,
    ) -> Self {
        Self {
            file_id: Some(file_id.into()),
            extra,
            ..Self::bare(id, item_type)
        }
        .with_hash()
    }

    /// An item known to exist remotely whose body has not been fetched yet.
    pub fn placeholder(id: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            hash: FORCE_HASH,
            ..Self::bare(id, item_type)
        }
    }

    /// Recompute and store the hash.
    pub fn with_hash(mut self) -> Self {
        self.hash = self.compute_hash();
        self
    }

    /// Hash over every field except the hash itself.
    pub fn compute_hash(&self) -> u64 {
        hash_value(&serde_json::json!({
            "id": self.id,
            "type": self.item_type,
            "name": self.name,
            "parentId": self.parent_id,
            "fileId": self.file_id,
            "extra": self.extra,
        }))
    }

    pub fn is_location(&self) -> bool {
        matches!(
            self.item_type,
            ItemType::SyncLocation | ItemType::PublishLocation
        )
    }
}

/// Stable 64-bit hash of a JSON value.
///
/// Object keys are ordered, so equal values hash equally. Never returns
/// 0 or [`FORCE_HASH`].
pub fn hash_value(value: &Value) -> u64 {
    let digest = Blake2s256::digest(value.to_string().as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes).max(FORCE_HASH + 1)
}
