//! The sync provider contract consumed by the sync cycle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use docsync_common::{RemoteTree, Result, Revision, SyncData, Token};
use docsync_workspace::{Change, WorkspaceItem, WorkspaceState};

use crate::content::Content;

/// Id of the single primary workspace.
pub const MAIN_WORKSPACE_ID: &str = "main";

/// Local workspace a provider synchronizes into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDescriptor {
    pub id: String,
    pub name: String,
    pub provider_id: String,
}

/// Result of a content download.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentDownload {
    pub content: Content,
    pub sync_data: SyncData,
}

/// Result of a content upload: sync data for the content and its file.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentUpload {
    pub content_sync_data: SyncData,
    pub file_sync_data: SyncData,
}

/// Result of a data item download.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDownload {
    pub item: WorkspaceItem,
    pub sync_data: SyncData,
}

/// Uniform synchronization contract over one hosting backend.
///
/// Errors from the backend are propagated unchanged; there is no retry at
/// this level.
#[async_trait]
pub trait SyncProvider: Send + Sync {
    /// Provider id (e.g., "githubAppData").
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    fn workspace_params(&self) -> Map<String, Value>;

    fn workspace_location_url(&self) -> Option<String>;

    fn sync_data_url(&self, sync_data: &SyncData) -> Option<String>;

    fn sync_data_description(&self, sync_data: &SyncData) -> String;

    /// Workspace to synchronize into.
    fn init_workspace(&self) -> WorkspaceDescriptor;

    /// Authoritative remote tree.
    ///
    /// # Errors
    /// - `TreeTooLarge` if the backend truncated the listing
    async fn get_changes(&self, token: &Token) -> Result<RemoteTree>;

    /// Changes that bring `state` in line with `tree`.
    fn prepare_changes(&self, tree: &RemoteTree, state: &WorkspaceState) -> Vec<Change>;

    /// Persist a non-content item. Files and folders make no network call.
    async fn save_workspace_item(
        &self,
        token: &Token,
        item: &WorkspaceItem,
        state: &WorkspaceState,
    ) -> Result<SyncData>;

    /// Delete the remote object of an item. No-op without a known revision.
    async fn remove_workspace_item(&self, token: &Token, sync_data: &SyncData) -> Result<()>;

    /// Download the content of a file. `None` only for a missing reserved path.
    async fn download_workspace_content(
        &self,
        token: &Token,
        content_id: &str,
        content_sync_data: &SyncData,
        file_sync_data: &SyncData,
        previous: Option<&Content>,
    ) -> Result<Option<ContentDownload>>;

    async fn upload_workspace_content(
        &self,
        token: &Token,
        file: &WorkspaceItem,
        content: &Content,
        state: &WorkspaceState,
    ) -> Result<ContentUpload>;

    /// Download a data item. `None` when there is no sync data or no remote file.
    async fn download_workspace_data(
        &self,
        token: &Token,
        sync_data: Option<&SyncData>,
    ) -> Result<Option<DataDownload>>;

    /// Upload a data item. An item without a remote path yields sync data
    /// with neither id nor sha, and no network call.
    async fn upload_workspace_data(
        &self,
        token: &Token,
        item: &WorkspaceItem,
        state: &WorkspaceState,
    ) -> Result<SyncData>;

    /// Commits touching a file, in backend order.
    async fn list_file_revisions(&self, token: &Token, file_path: &str) -> Result<Vec<Revision>>;

    /// Prepare a revision for reading. Returns whether anything was loaded.
    async fn load_file_revision(&self, token: &Token, revision: &Revision) -> Result<bool>;

    /// Content of a file "at" a revision.
    ///
    /// Always the current remote content: there is no per-blob revision
    /// download for app-data repositories.
    async fn get_file_revision_content(
        &self,
        token: &Token,
        content_id: &str,
        file_path: &str,
    ) -> Result<Content>;
}
