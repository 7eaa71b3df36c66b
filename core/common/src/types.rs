//! Common types used throughout docsync.

use blake2::{Blake2s256, Digest};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Reserved remote namespace for data documents. Absence of a file under
/// this prefix is not an error.
pub const DATA_PREFIX: &str = ".stackedit-data/";

const DATA_SEGMENT: &str = ".stackedit-data";

/// Characters left untouched when encoding one URL path component.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a single URL path component (owner, repo, branch, sha).
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// Deterministic short fingerprint over a list of fields.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Blake2s256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hasher
        .finalize()
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// A file path inside a remote git repository.
///
/// Paths are relative to the repository root and use '/' as separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GitPath(String);

impl GitPath {
    /// Parse a repository path.
    ///
    /// # Errors
    /// - Empty path or empty component
    /// - Leading separator
    pub fn parse(path: &str) -> crate::Result<Self> {
        if path.is_empty() {
            return Err(crate::Error::InvalidInput("Git path cannot be empty".to_string()));
        }
        if path.starts_with('/') {
            return Err(crate::Error::InvalidInput(format!(
                "Git path must be relative: {}",
                path
            )));
        }
        if path.split('/').any(|c| c.is_empty()) {
            return Err(crate::Error::InvalidInput(format!(
                "Git path has an empty component: {}",
                path
            )));
        }
        Ok(Self(path.to_string()))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path with every component percent-encoded, separators kept.
    pub fn encoded(&self) -> String {
        self.0
            .split('/')
            .map(encode_component)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Whether the path mentions the reserved data marker anywhere, including
    /// inside a file name.
    pub fn is_reserved_data(&self) -> bool {
        self.0.contains(DATA_SEGMENT)
    }

    /// Last path component.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl TryFrom<String> for GitPath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<GitPath> for String {
    fn from(path: GitPath) -> Self {
        path.0
    }
}

impl fmt::Display for GitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secret string that zeroizes on drop and never prints its value.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Secondary upload target attached to a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImgStorage {
    /// Fingerprint of owner, repo, path and branch.
    pub sid: String,
    pub owner: String,
    pub repo: String,
    pub path: String,
    pub branch: String,
}

impl ImgStorage {
    /// Create a storage location with its fingerprint computed.
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        path: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        let (owner, repo, path, branch) = (owner.into(), repo.into(), path.into(), branch.into());
        let sid = fingerprint(&[&owner, &repo, &path, &branch]);
        Self {
            sid,
            owner,
            repo,
            path,
            branch,
        }
    }
}

/// Credential and identity for one remote account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// Provider-scoped access credential.
    pub access_token: Secret,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Stable subject id on the remote.
    pub sub: String,
    /// Display name (login).
    pub name: String,
    /// Primary (main workspace) identity.
    #[serde(default)]
    pub is_login: bool,
    #[serde(default)]
    pub is_sponsor: bool,
    #[serde(default)]
    pub repo_full_access: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_storages: Option<Vec<ImgStorage>>,
}

impl Token {
    /// Insert or replace a storage location, keyed by its fingerprint.
    pub fn upsert_img_storage(&mut self, storage: ImgStorage) {
        let storages = self.img_storages.get_or_insert_with(Vec::new);
        match storages.iter_mut().find(|s| s.sid == storage.sid) {
            Some(existing) => *existing = storage,
            None => storages.push(storage),
        }
    }

    /// Remove a storage location by fingerprint. Returns whether one was removed.
    pub fn remove_img_storage(&mut self, sid: &str) -> bool {
        match self.img_storages.as_mut() {
            Some(storages) if !storages.is_empty() => {
                let before = storages.len();
                storages.retain(|s| s.sid != sid);
                storages.len() != before
            }
            _ => false,
        }
    }
}

/// Type tag of a workspace item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemType {
    File,
    Folder,
    Content,
    Data,
    SyncLocation,
    PublishLocation,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::File => "file",
            ItemType::Folder => "folder",
            ItemType::Content => "content",
            ItemType::Data => "data",
            ItemType::SyncLocation => "syncLocation",
            ItemType::PublishLocation => "publishLocation",
        }
    }

    /// Files and folders only exist remotely through their content's path.
    pub fn is_structural(&self) -> bool {
        matches!(self, ItemType::File | ItemType::Folder)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote-side descriptor of one local workspace item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncData {
    /// Remote path or identifier. Absent when the item has no remote path yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub hash: u64,
    /// Blob revision marker from the last successful read or write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

impl SyncData {
    pub fn new(id: impl Into<String>, item_type: ItemType, hash: u64) -> Self {
        Self {
            id: Some(id.into()),
            item_type,
            hash,
            sha: None,
        }
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }
}

/// Kind of a remote tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeEntryType {
    Blob,
    Tree,
    Commit,
}

/// One entry of a recursive remote tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: TreeEntryType,
    pub sha: String,
}

impl TreeEntry {
    pub fn blob(path: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entry_type: TreeEntryType::Blob,
            sha: sha.into(),
        }
    }
}

/// Flat listing of one branch at one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTree {
    /// Commit the listing was taken from.
    pub commit_sha: String,
    pub entries: Vec<TreeEntry>,
}

impl RemoteTree {
    /// Blob entries only, in listing order.
    pub fn blobs(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries
            .iter()
            .filter(|e| e.entry_type == TreeEntryType::Blob)
    }
}

/// One historical commit touching a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Commit sha.
    pub id: String,
    /// Contributing user, as `{prefix}:{subject}`.
    pub sub: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub created: i64,
}
