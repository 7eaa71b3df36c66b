//! Sync provider over a dedicated app-data repository.
//!
//! The workspace is stored in `{account}/{app data repo}` on one branch.
//! Every write carries the SHA recorded for its path, and the SHA returned
//! by a successful write or read replaces it.

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use docsync_backend::{
    BackendHandle, CommitEntry, FileContent, GitBackend, RepoRef, UserDirectory, UserInfo,
};
use docsync_common::{Error, GitPath, ItemType, RemoteTree, Result, Revision, SyncData, Token};
use docsync_workspace::{content_path, Change, Reconciler, ShaStore, WorkspaceItem, WorkspaceState};

use crate::content::Content;
use crate::provider::{
    ContentDownload, ContentUpload, DataDownload, SyncProvider, WorkspaceDescriptor,
    MAIN_WORKSPACE_ID,
};

/// Timestamp of a commit without any date: one millisecond after the epoch.
const SENTINEL_CREATED: i64 = 1;

/// Sync provider storing the main workspace in an app-data repository.
pub struct AppDataProvider {
    id: String,
    name: String,
    backend: Arc<dyn GitBackend>,
    sha_store: Arc<dyn ShaStore>,
    directory: Arc<UserDirectory>,
    repo: String,
    branch: String,
    reconciler: Reconciler,
}

impl AppDataProvider {
    pub fn new(
        backend: Arc<dyn GitBackend>,
        sha_store: Arc<dyn ShaStore>,
        directory: Arc<UserDirectory>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        let (id, name) = match backend.name() {
            "github" => ("githubAppData".to_string(), "GitHub app data".to_string()),
            "gitee" => ("giteeAppData".to_string(), "Gitee app data".to_string()),
            other => (format!("{}AppData", other), format!("{} app data", other)),
        };
        Self {
            id,
            name,
            backend,
            sha_store,
            directory,
            repo: repo.into(),
            branch: branch.into(),
            reconciler: Reconciler::new(),
        }
    }

    /// Provider over a configured backend.
    pub fn from_handle(
        handle: &BackendHandle,
        sha_store: Arc<dyn ShaStore>,
        directory: Arc<UserDirectory>,
    ) -> Self {
        Self::new(
            handle.git.clone(),
            sha_store,
            directory,
            handle.app_data_repo.clone(),
            handle.app_data_branch.clone(),
        )
    }

    /// Replace the id generator used for newly discovered items.
    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn sha_store(&self) -> &Arc<dyn ShaStore> {
        &self.sha_store
    }

    fn repo_ref(&self, token: &Token) -> RepoRef {
        RepoRef::new(token.name.clone(), self.repo.clone(), self.branch.clone())
    }

    fn path_of(item: &WorkspaceItem, state: &WorkspaceState) -> Result<String> {
        state.git_path_for_item(item).ok_or_else(|| {
            Error::InvalidInput(format!("Item {} has no repository path", item.id))
        })
    }

    fn sync_data_path(sync_data: &SyncData) -> Result<&str> {
        sync_data
            .id
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("Sync data has no path".to_string()))
    }

    /// Write a blob with the recorded SHA and record the new one.
    async fn write(&self, token: &Token, path: &str, content: FileContent) -> Result<String> {
        let git_path = GitPath::parse(path)?;
        let known_sha = self.sha_store.get(path);
        let uploaded = self
            .backend
            .upload_file(
                token,
                &self.repo_ref(token),
                &git_path,
                &content,
                known_sha.as_deref(),
                None,
            )
            .await?;
        self.sha_store.set(path, &uploaded.sha);
        Ok(uploaded.sha)
    }

    /// Read a text blob and record its SHA.
    async fn read(&self, token: &Token, path: &str) -> Result<Option<(String, String)>> {
        let git_path = GitPath::parse(path)?;
        let Some(file) = self
            .backend
            .download_file(token, &self.repo_ref(token), &git_path, false)
            .await?
        else {
            return Ok(None);
        };
        self.sha_store.set(path, &file.sha);
        Ok(Some((file.sha, file.content.into_text()?)))
    }

    fn revision(&self, entry: CommitEntry) -> Revision {
        let user = [entry.author.as_ref(), entry.committer.as_ref()]
            .into_iter()
            .flatten()
            .find(|user| user.login.is_some());

        let author = entry.commit.author.as_ref();
        let committer = entry.commit.committer.as_ref();
        // Commits by unknown accounts fall back to the git signature name
        let subject = user
            .and_then(|user| self.backend.commit_user_subject(user))
            .or_else(|| author.or(committer).and_then(|s| s.name.clone()))
            .unwrap_or_default();
        let sub = format!("{}:{}", self.backend.sub_prefix(), subject);

        if let Some(user) = user {
            self.directory.add(UserInfo {
                id: sub.clone(),
                name: user.login.clone().unwrap_or_default(),
                image_url: user
                    .avatar_url
                    .as_deref()
                    .map(|url| self.backend.avatar_thumbnail(url))
                    .unwrap_or_default(),
            });
        }

        let created = [author, committer]
            .into_iter()
            .flatten()
            .filter_map(|signature| signature.date.as_deref())
            .find_map(|date| DateTime::parse_from_rfc3339(date).ok())
            .map(|date| date.timestamp_millis())
            .unwrap_or(SENTINEL_CREATED);

        Revision {
            id: entry.sha,
            sub,
            created,
        }
    }
}

#[async_trait]
impl SyncProvider for AppDataProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    // The app-data workspace is the main workspace, it has no parameters
    fn workspace_params(&self) -> Map<String, Value> {
        Map::new()
    }

    fn workspace_location_url(&self) -> Option<String> {
        None
    }

    fn sync_data_url(&self, _sync_data: &SyncData) -> Option<String> {
        None
    }

    fn sync_data_description(&self, sync_data: &SyncData) -> String {
        sync_data.id.clone().unwrap_or_default()
    }

    fn init_workspace(&self) -> WorkspaceDescriptor {
        WorkspaceDescriptor {
            id: MAIN_WORKSPACE_ID.to_string(),
            name: "Main workspace".to_string(),
            provider_id: self.id.clone(),
        }
    }

    async fn get_changes(&self, token: &Token) -> Result<RemoteTree> {
        self.backend.get_tree(token, &self.repo_ref(token)).await
    }

    fn prepare_changes(&self, tree: &RemoteTree, state: &WorkspaceState) -> Vec<Change> {
        self.reconciler
            .make_changes(tree, state, self.sha_store.as_ref())
    }

    async fn save_workspace_item(
        &self,
        token: &Token,
        item: &WorkspaceItem,
        state: &WorkspaceState,
    ) -> Result<SyncData> {
        let path = Self::path_of(item, state)?;
        let sync_data = SyncData::new(path.clone(), item.item_type, item.hash);

        // Files and folders only exist remotely through their content
        if item.item_type.is_structural() {
            return Ok(sync_data);
        }

        // Locations are stored as paths, the blob is empty
        let sha = self
            .write(token, &path, FileContent::Text(String::new()))
            .await?;
        Ok(sync_data.with_sha(sha))
    }

    async fn remove_workspace_item(&self, token: &Token, sync_data: &SyncData) -> Result<()> {
        let Some(path) = sync_data.id.as_deref() else {
            return Ok(());
        };
        let Some(sha) = self.sha_store.get(path) else {
            debug!(path, "No known revision, nothing to remove");
            return Ok(());
        };

        self.backend
            .remove_file(token, &self.repo_ref(token), &GitPath::parse(path)?, &sha)
            .await?;
        self.sha_store.remove(path);
        Ok(())
    }

    async fn download_workspace_content(
        &self,
        token: &Token,
        content_id: &str,
        content_sync_data: &SyncData,
        file_sync_data: &SyncData,
        previous: Option<&Content>,
    ) -> Result<Option<ContentDownload>> {
        let path = Self::sync_data_path(file_sync_data)?;
        let Some((sha, raw)) = self.read(token, path).await? else {
            return Ok(None);
        };

        let content = Content::parse(&raw, content_id, previous);
        let sync_data = SyncData {
            hash: content.hash,
            sha: Some(sha),
            ..content_sync_data.clone()
        };
        Ok(Some(ContentDownload { content, sync_data }))
    }

    async fn upload_workspace_content(
        &self,
        token: &Token,
        file: &WorkspaceItem,
        content: &Content,
        state: &WorkspaceState,
    ) -> Result<ContentUpload> {
        let path = Self::path_of(file, state)?;
        let sha = self
            .write(token, &path, FileContent::Text(content.serialize()?))
            .await?;

        Ok(ContentUpload {
            content_sync_data: SyncData::new(content_path(&path), ItemType::Content, content.hash)
                .with_sha(sha),
            file_sync_data: SyncData::new(path, ItemType::File, file.hash),
        })
    }

    async fn download_workspace_data(
        &self,
        token: &Token,
        sync_data: Option<&SyncData>,
    ) -> Result<Option<DataDownload>> {
        let Some(sync_data) = sync_data else {
            return Ok(None);
        };
        let path = Self::sync_data_path(sync_data)?;
        let Some((sha, raw)) = self.read(token, path).await? else {
            return Ok(None);
        };

        let item: WorkspaceItem = serde_json::from_str(&raw)?;
        let sync_data = SyncData {
            hash: item.hash,
            sha: Some(sha),
            ..sync_data.clone()
        };
        Ok(Some(DataDownload { item, sync_data }))
    }

    async fn upload_workspace_data(
        &self,
        token: &Token,
        item: &WorkspaceItem,
        state: &WorkspaceState,
    ) -> Result<SyncData> {
        let Some(path) = state.git_path_for_item(item) else {
            return Ok(SyncData {
                id: None,
                item_type: item.item_type,
                hash: item.hash,
                sha: None,
            });
        };

        let sha = self
            .write(token, &path, FileContent::Text(serde_json::to_string(item)?))
            .await?;
        Ok(SyncData::new(path, item.item_type, item.hash).with_sha(sha))
    }

    async fn list_file_revisions(&self, token: &Token, file_path: &str) -> Result<Vec<Revision>> {
        let commits = self
            .backend
            .get_commits(token, &self.repo_ref(token), &GitPath::parse(file_path)?)
            .await?;
        info!(path = file_path, count = commits.len(), "Listed file revisions");
        Ok(commits.into_iter().map(|c| self.revision(c)).collect())
    }

    // Revisions are fully described by the listing
    async fn load_file_revision(&self, _token: &Token, _revision: &Revision) -> Result<bool> {
        Ok(false)
    }

    async fn get_file_revision_content(
        &self,
        token: &Token,
        content_id: &str,
        file_path: &str,
    ) -> Result<Content> {
        let git_path = GitPath::parse(file_path)?;
        let file = self
            .backend
            .download_file(token, &self.repo_ref(token), &git_path, false)
            .await?
            .ok_or_else(|| Error::NotFound(file_path.to_string()))?;
        Ok(Content::parse(&file.content.into_text()?, content_id, None))
    }
}
