//! Backend helper trait definition.
//!
//! A backend helper translates generic git operations (tree listing, commit
//! history, blob upload/delete/download, gists) into one hosting provider's
//! REST calls. Sync providers only ever talk to a [`GitBackend`].

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use docsync_common::{Error, GitPath, RemoteTree, Result, Token};

/// A branch of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl RepoRef {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
        }
    }
}

/// File payload. Both variants travel base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContent {
    pub fn to_base64(&self) -> String {
        match self {
            FileContent::Text(text) => STANDARD.encode(text.as_bytes()),
            FileContent::Binary(bytes) => STANDARD.encode(bytes),
        }
    }

    /// Decode a base64 transport payload. Embedded line breaks are ignored.
    pub fn from_base64(encoded: &str, is_binary: bool) -> Result<Self> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| Error::Serialization(format!("Invalid base64 content: {}", e)))?;
        if is_binary {
            Ok(FileContent::Binary(bytes))
        } else {
            String::from_utf8(bytes)
                .map(FileContent::Text)
                .map_err(|e| Error::Serialization(format!("Content is not UTF-8: {}", e)))
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileContent::Text(text) => text.as_bytes(),
            FileContent::Binary(bytes) => bytes,
        }
    }

    /// Text payload, failing for binary content.
    pub fn into_text(self) -> Result<String> {
        match self {
            FileContent::Text(text) => Ok(text),
            FileContent::Binary(_) => Err(Error::InvalidInput(
                "Expected text content, got binary".to_string(),
            )),
        }
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// New blob sha, the revision marker for the next write.
    pub sha: String,
    /// Commit created by the write.
    pub commit_sha: Option<String>,
}

/// Result of a successful read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub sha: String,
    pub content: FileContent,
}

/// Remote account as returned by the user endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitUser {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Git signature of a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSignature {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDetail {
    #[serde(default)]
    pub author: Option<CommitSignature>,
    #[serde(default)]
    pub committer: Option<CommitSignature>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One entry of a commit history listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub sha: String,
    #[serde(default)]
    pub author: Option<CommitUser>,
    #[serde(default)]
    pub committer: Option<CommitUser>,
    #[serde(default)]
    pub commit: CommitDetail,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GistFile {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gist {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub public: Option<bool>,
    #[serde(default)]
    pub files: HashMap<String, GistFile>,
}

impl Gist {
    /// Content of one file of the gist.
    pub fn file_content(&self, filename: &str) -> Result<String> {
        self.files
            .get(filename)
            .and_then(|f| f.content.clone())
            .ok_or_else(|| Error::NotFound(format!("Gist file not found: {}", filename)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GistCommit {
    pub version: String,
    #[serde(default)]
    pub committed_at: Option<String>,
    #[serde(default)]
    pub user: Option<CommitUser>,
}

/// Gist write request. A `gist_id` selects edit, otherwise a gist is created.
#[derive(Debug, Clone)]
pub struct GistUpload<'a> {
    pub description: &'a str,
    pub filename: &'a str,
    pub content: &'a str,
    pub is_public: bool,
    pub gist_id: Option<&'a str>,
}

/// Repository metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// Generic git operations against one hosting provider.
///
/// Implementations never swallow errors, except that a missing file under the
/// reserved data namespace downloads as `None`.
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Provider name (e.g., "github", "gitee").
    fn name(&self) -> &str;

    /// Prefix of user subjects produced by this backend (e.g., "gh").
    fn sub_prefix(&self) -> &str;

    /// Thumbnail variant of an avatar URL.
    fn avatar_thumbnail(&self, url: &str) -> String {
        url.to_string()
    }

    /// Subject (without prefix) of a commit author or committer.
    fn commit_user_subject(&self, user: &CommitUser) -> Option<String> {
        user.login.clone()
    }

    /// Fetch the full tree of a branch at its head commit.
    ///
    /// # Errors
    /// - `TreeTooLarge` if the backend truncated the listing
    async fn get_tree(&self, token: &Token, repo: &RepoRef) -> Result<RemoteTree>;

    /// Commit history of a path, newest first.
    async fn get_commits(
        &self,
        token: &Token,
        repo: &RepoRef,
        path: &GitPath,
    ) -> Result<Vec<CommitEntry>>;

    /// Create (`sha` absent) or update (`sha` present) a file.
    ///
    /// # Errors
    /// - `Conflict` if `sha` does not match the live remote revision
    async fn upload_file(
        &self,
        token: &Token,
        repo: &RepoRef,
        path: &GitPath,
        content: &FileContent,
        sha: Option<&str>,
        commit_message: Option<&str>,
    ) -> Result<UploadedFile>;

    /// Delete a file at a known revision.
    ///
    /// # Errors
    /// - `Conflict` if `sha` does not match the live remote revision
    async fn remove_file(
        &self,
        token: &Token,
        repo: &RepoRef,
        path: &GitPath,
        sha: &str,
    ) -> Result<()>;

    /// Download a file.
    ///
    /// Returns `None` when a reserved data file does not exist yet.
    ///
    /// # Errors
    /// - `NotFound` for any other missing path
    async fn download_file(
        &self,
        token: &Token,
        repo: &RepoRef,
        path: &GitPath,
        is_binary: bool,
    ) -> Result<Option<DownloadedFile>>;

    /// Repository metadata.
    async fn repo_info(&self, token: &Token, owner: &str, repo: &str) -> Result<RepoInfo>;

    /// Create or edit a gist.
    async fn upload_gist(&self, token: &Token, upload: GistUpload<'_>) -> Result<Gist>;

    /// Latest content of one gist file.
    async fn download_gist(&self, token: &Token, gist_id: &str, filename: &str)
        -> Result<String>;

    /// Revision history of a gist.
    async fn get_gist_commits(&self, token: &Token, gist_id: &str) -> Result<Vec<GistCommit>>;

    /// Content of one gist file at a given revision.
    async fn download_gist_revision(
        &self,
        token: &Token,
        gist_id: &str,
        filename: &str,
        sha: &str,
    ) -> Result<String>;
}

/// Downgrade a `NotFound` on a reserved data path to "not present yet".
pub fn tolerate_missing_data_file<T>(path: &GitPath, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::NotFound(_)) if path.is_reserved_data() => Ok(None),
        Err(err) => Err(err),
    }
}
