//! One synchronization cycle between a workspace and its provider.
//!
//! Order of work:
//! 1. fetch the remote tree and apply the reconciled changes,
//! 2. download content and data the remote changed,
//! 3. upload local items whose hash differs from their sync data,
//! 4. remove remote objects of items deleted locally.
//!
//! Failing to fetch the tree aborts the cycle. Any other failure is
//! recorded against its path and the cycle moves on.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use docsync_common::{Error, ErrorKind, ItemType, Result, SyncData, Token};
use docsync_workspace::{is_synced_data, Change, WorkspaceItem, WorkspaceState, FORCE_HASH};

use crate::content::Content;
use crate::provider::SyncProvider;

/// A failed item of a sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Commit the remote tree was listed at.
    pub commit_sha: String,
    /// Changes computed from the remote tree.
    pub remote_changes: usize,
    pub downloaded: usize,
    pub uploaded: usize,
    pub removed: usize,
    pub failures: Vec<ItemFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, path: &str, err: &Error) {
        warn!(path, "Sync failed: {}", err);
        self.failures.push(ItemFailure {
            path: path.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

/// Local item and sync data a remote change replaced, restored if the
/// download that should follow fails.
type Snapshot = (Option<WorkspaceItem>, Option<SyncData>);

/// Sync data paths whose item no longer exists locally.
fn locally_deleted(state: &WorkspaceState) -> BTreeSet<String> {
    let paths = state.git_paths();
    state
        .sync_data()
        .keys()
        .filter(|path| paths.item_at(path).is_none())
        .cloned()
        .collect()
}

/// Drives a full sync of one workspace against one provider.
pub struct SyncCycle<'a> {
    provider: &'a dyn SyncProvider,
    token: &'a Token,
}

impl<'a> SyncCycle<'a> {
    pub fn new(provider: &'a dyn SyncProvider, token: &'a Token) -> Self {
        Self { provider, token }
    }

    /// Run the cycle, mutating `state` in place.
    ///
    /// # Errors
    /// - The tree fetch error (`TreeTooLarge`, `NotFound`, ...)
    pub async fn run(&self, state: &mut WorkspaceState) -> Result<SyncReport> {
        let start = Instant::now();
        info!(provider = self.provider.id(), "Starting sync");

        let tree = self.provider.get_changes(self.token).await.map_err(|e| {
            error!("Failed to fetch remote tree: {}", e);
            e
        })?;
        let mut report = SyncReport {
            commit_sha: tree.commit_sha.clone(),
            ..SyncReport::default()
        };

        // Local deletions win over remote updates of the same path
        let deleted = locally_deleted(state);
        let changes: Vec<Change> = self
            .provider
            .prepare_changes(&tree, state)
            .into_iter()
            .filter(|c| c.is_deletion() || !deleted.contains(&c.sync_data_id))
            .collect();
        report.remote_changes = changes.len();

        let snapshots: Vec<Snapshot> = changes
            .iter()
            .map(|c| {
                (
                    c.item.as_ref().and_then(|item| state.item(&item.id).cloned()),
                    state.sync_data_for(&c.sync_data_id).cloned(),
                )
            })
            .collect();
        state.apply_changes(&changes);

        let mut failed = HashSet::new();
        for (change, snapshot) in changes.iter().zip(snapshots) {
            if let Err(e) = self.download(state, change, snapshot.0.as_ref(), &mut report).await {
                if e.is_fatal_for_cycle() {
                    return Err(e);
                }
                report.fail(&change.sync_data_id, &e);
                restore(state, &change.sync_data_id, snapshot);
                failed.insert(change.sync_data_id.clone());
            }
        }

        self.upload_local(state, &failed, &mut report).await?;
        self.remove_deleted(state, &mut report).await?;

        info!(
            "Sync completed in {:?}: {} remote changes, {} downloaded, {} uploaded, {} removed, {} failed",
            start.elapsed(),
            report.remote_changes,
            report.downloaded,
            report.uploaded,
            report.removed,
            report.failures.len()
        );
        Ok(report)
    }

    async fn download(
        &self,
        state: &mut WorkspaceState,
        change: &Change,
        previous: Option<&WorkspaceItem>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let (Some(item), Some(sync_data)) = (&change.item, &change.sync_data) else {
            return Ok(());
        };
        let downloaded = match item.item_type {
            ItemType::Content => self.download_content(state, item, sync_data, previous).await?,
            ItemType::Data => self.download_data(state, sync_data).await?,
            _ => false,
        };
        if downloaded {
            report.downloaded += 1;
        }
        Ok(())
    }

    async fn download_content(
        &self,
        state: &mut WorkspaceState,
        item: &WorkspaceItem,
        sync_data: &SyncData,
        previous: Option<&WorkspaceItem>,
    ) -> Result<bool> {
        let path = sync_data
            .id
            .as_deref()
            .ok_or_else(|| Error::InvalidInput(format!("No content path for {}", item.id)))?;
        let file_path = path
            .strip_prefix('/')
            .ok_or_else(|| Error::InvalidInput(format!("Bad content path: {}", path)))?;
        let file_sync_data = state
            .sync_data_for(file_path)
            .cloned()
            .unwrap_or_else(|| SyncData::new(file_path, ItemType::File, FORCE_HASH));
        let previous = previous.map(Content::from_item);

        let downloaded = self
            .provider
            .download_workspace_content(
                self.token,
                &item.id,
                sync_data,
                &file_sync_data,
                previous.as_ref(),
            )
            .await?;
        match downloaded {
            Some(download) => {
                state.upsert_item(download.content.to_item());
                state.set_sync_data(path, download.sync_data);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn download_data(&self, state: &mut WorkspaceState, sync_data: &SyncData) -> Result<bool> {
        let downloaded = self
            .provider
            .download_workspace_data(self.token, Some(sync_data))
            .await?;
        match (downloaded, sync_data.id.as_deref()) {
            (Some(download), Some(path)) => {
                state.upsert_item(download.item);
                state.set_sync_data(path, download.sync_data);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upload_local(
        &self,
        state: &mut WorkspaceState,
        skip: &HashSet<String>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let items: Vec<WorkspaceItem> = state
            .items()
            .values()
            .filter(|item| item.hash != FORCE_HASH)
            .filter(|item| item.item_type != ItemType::Data || is_synced_data(&item.id))
            .cloned()
            .collect();

        for item in items {
            let Some(path) = state.git_path_for_item(&item) else {
                debug!(id = %item.id, "Item has no repository path yet");
                continue;
            };
            let recorded = state.sync_data_for(&path).map(|s| s.hash);
            if recorded == Some(item.hash) || skip.contains(&path) {
                continue;
            }
            // Recorded together with the content upload
            if item.item_type == ItemType::File
                && state.item(&format!("{}/content", item.id)).is_some()
            {
                continue;
            }

            match self.upload_item(state, &item, &path).await {
                Ok(()) => report.uploaded += 1,
                Err(e) if e.is_fatal_for_cycle() => return Err(e),
                Err(e) => report.fail(&path, &e),
            }
        }
        Ok(())
    }

    async fn upload_item(
        &self,
        state: &mut WorkspaceState,
        item: &WorkspaceItem,
        path: &str,
    ) -> Result<()> {
        match item.item_type {
            ItemType::Content => {
                let file = item
                    .id
                    .strip_suffix("/content")
                    .and_then(|file_id| state.item(file_id))
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("File of {}", item.id)))?;
                let upload = self
                    .provider
                    .upload_workspace_content(self.token, &file, &Content::from_item(item), state)
                    .await?;
                state.set_sync_data(path, upload.content_sync_data);
                if let Some(file_path) = upload.file_sync_data.id.clone() {
                    state.set_sync_data(file_path, upload.file_sync_data);
                }
            }
            ItemType::Data => {
                let sync_data = self
                    .provider
                    .upload_workspace_data(self.token, item, state)
                    .await?;
                if sync_data.id.is_some() {
                    state.set_sync_data(path, sync_data);
                }
            }
            _ => {
                let sync_data = self
                    .provider
                    .save_workspace_item(self.token, item, state)
                    .await?;
                state.set_sync_data(path, sync_data);
            }
        }
        Ok(())
    }

    async fn remove_deleted(&self, state: &mut WorkspaceState, report: &mut SyncReport) -> Result<()> {
        for path in locally_deleted(state) {
            let Some(sync_data) = state.sync_data_for(&path).cloned() else {
                continue;
            };
            match self
                .provider
                .remove_workspace_item(self.token, &sync_data)
                .await
            {
                Ok(()) => {
                    state.remove_sync_data(&path);
                    report.removed += 1;
                }
                Err(e) if e.is_fatal_for_cycle() => return Err(e),
                Err(e) => report.fail(&path, &e),
            }
        }
        Ok(())
    }
}

fn restore(state: &mut WorkspaceState, sync_data_id: &str, (item, sync_data): Snapshot) {
    if let Some(item) = item {
        state.upsert_item(item);
    }
    match sync_data {
        Some(sync_data) => state.set_sync_data(sync_data_id, sync_data),
        None => {
            state.remove_sync_data(sync_data_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_data::AppDataProvider;
    use async_trait::async_trait;
    use docsync_backend::{
        CommitEntry, DownloadedFile, FileContent, Gist, GistCommit, GistUpload, GitBackend,
        MemoryBackend, RepoInfo, RepoRef, UploadedFile, UserDirectory,
    };
    use docsync_common::{GitPath, RemoteTree, Secret};
    use docsync_workspace::{MemoryShaStore, Reconciler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const REPO: &str = "stackedit-app-data";

    /// Memory backend whose uploads to one path always conflict.
    struct ConflictingBackend {
        inner: MemoryBackend,
        path: String,
    }

    #[async_trait]
    impl GitBackend for ConflictingBackend {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn sub_prefix(&self) -> &str {
            self.inner.sub_prefix()
        }

        async fn get_tree(&self, token: &Token, repo: &RepoRef) -> Result<RemoteTree> {
            self.inner.get_tree(token, repo).await
        }

        async fn get_commits(
            &self,
            token: &Token,
            repo: &RepoRef,
            path: &GitPath,
        ) -> Result<Vec<CommitEntry>> {
            self.inner.get_commits(token, repo, path).await
        }

        async fn upload_file(
            &self,
            token: &Token,
            repo: &RepoRef,
            path: &GitPath,
            content: &FileContent,
            sha: Option<&str>,
            commit_message: Option<&str>,
        ) -> Result<UploadedFile> {
            if path.as_str() == self.path {
                return Err(Error::Conflict(self.path.clone()));
            }
            self.inner
                .upload_file(token, repo, path, content, sha, commit_message)
                .await
        }

        async fn remove_file(
            &self,
            token: &Token,
            repo: &RepoRef,
            path: &GitPath,
            sha: &str,
        ) -> Result<()> {
            self.inner.remove_file(token, repo, path, sha).await
        }

        async fn download_file(
            &self,
            token: &Token,
            repo: &RepoRef,
            path: &GitPath,
            is_binary: bool,
        ) -> Result<Option<DownloadedFile>> {
            self.inner.download_file(token, repo, path, is_binary).await
        }

        async fn repo_info(&self, token: &Token, owner: &str, repo: &str) -> Result<RepoInfo> {
            self.inner.repo_info(token, owner, repo).await
        }

        async fn upload_gist(&self, token: &Token, upload: GistUpload<'_>) -> Result<Gist> {
            self.inner.upload_gist(token, upload).await
        }

        async fn download_gist(
            &self,
            token: &Token,
            gist_id: &str,
            filename: &str,
        ) -> Result<String> {
            self.inner.download_gist(token, gist_id, filename).await
        }

        async fn get_gist_commits(&self, token: &Token, gist_id: &str) -> Result<Vec<GistCommit>> {
            self.inner.get_gist_commits(token, gist_id).await
        }

        async fn download_gist_revision(
            &self,
            token: &Token,
            gist_id: &str,
            filename: &str,
            sha: &str,
        ) -> Result<String> {
            self.inner
                .download_gist_revision(token, gist_id, filename, sha)
                .await
        }
    }

    fn token() -> Token {
        Token {
            access_token: Secret::new("token"),
            scopes: vec!["repo".to_string()],
            sub: "1".to_string(),
            name: "octo".to_string(),
            is_login: true,
            is_sponsor: false,
            repo_full_access: true,
            img_storages: None,
        }
    }

    fn repo() -> RepoRef {
        RepoRef::new("octo", REPO, "master")
    }

    fn provider(backend: Arc<dyn GitBackend>) -> AppDataProvider {
        let next = AtomicUsize::new(0);
        AppDataProvider::new(
            backend,
            Arc::new(MemoryShaStore::new()),
            Arc::new(UserDirectory::new()),
            REPO,
            "master",
        )
        .with_reconciler(Reconciler::with_id_source(move || {
            format!("id{}", next.fetch_add(1, Ordering::SeqCst))
        }))
    }

    fn seeded() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend.create_repo("octo", REPO);
        backend.seed_file(&repo(), "notes/todo.md", "- [ ] write tests");
        backend.seed_file(
            &repo(),
            ".stackedit-data/templates.json",
            r#"{"id":"templates","type":"data","hash":5,"data":{}}"#,
        );
        backend
    }

    fn content_of(state: &WorkspaceState, path: &str) -> Content {
        let id = state.git_paths().item_at(path).unwrap().to_string();
        Content::from_item(state.item(&id).unwrap())
    }

    #[tokio::test]
    async fn test_first_sync_downloads_remote() {
        let backend = seeded();
        let provider = provider(backend.clone());
        let token = token();
        let mut state = WorkspaceState::new();

        let report = SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.remote_changes, 4);
        assert_eq!(report.downloaded, 2);
        assert_eq!(report.uploaded, 0);
        assert_eq!(content_of(&state, "/notes/todo.md").text, "- [ ] write tests");
        assert_eq!(state.item("templates").unwrap().hash, 5);

        let calls = backend.call_count();
        let again = SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();
        assert_eq!(again.remote_changes, 0);
        assert_eq!(again.uploaded, 0);
        assert_eq!(backend.call_count(), calls + 1);
    }

    #[tokio::test]
    async fn test_local_edit_is_uploaded() {
        let backend = seeded();
        let provider = provider(backend.clone());
        let token = token();
        let mut state = WorkspaceState::new();
        SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();

        let edited = content_of(&state, "/notes/todo.md").with_text("- [x] write tests");
        state.upsert_item(edited.to_item());

        let report = SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert!(report.is_clean());
        let (_, bytes) = backend.file(&repo(), "notes/todo.md").unwrap();
        assert_eq!(bytes, b"- [x] write tests");

        let settled = SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();
        assert_eq!(settled.remote_changes, 0);
        assert_eq!(settled.uploaded, 0);
    }

    #[tokio::test]
    async fn test_new_local_file_and_deletion() {
        let backend = seeded();
        let provider = provider(backend.clone());
        let token = token();
        let mut state = WorkspaceState::new();
        SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();

        let file = WorkspaceItem::file("new", "ideas", None);
        state.upsert_item(file);
        state.upsert_item(Content::empty("new/content").with_text("fly").to_item());
        let report = SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert_eq!(backend.file(&repo(), "ideas.md").unwrap().1, b"fly");
        assert!(state.sync_data_for("ideas.md").is_some());

        state.remove_item("new");
        state.remove_item("new/content");
        let report = SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();
        assert_eq!(report.removed, 2);
        assert!(backend.file(&repo(), "ideas.md").is_none());
        assert!(state.sync_data_for("ideas.md").is_none());
    }

    #[tokio::test]
    async fn test_conflict_is_reported_per_item() {
        let inner = MemoryBackend::new();
        inner.create_repo("octo", REPO);
        let backend = Arc::new(ConflictingBackend {
            inner,
            path: "b.md".to_string(),
        });
        let provider = provider(backend);
        let token = token();
        let mut state = WorkspaceState::new();
        for (id, name) in [("a", "a"), ("b", "b")] {
            state.upsert_item(WorkspaceItem::file(id, name, None));
            state.upsert_item(
                Content::empty(format!("{}/content", id))
                    .with_text(name)
                    .to_item(),
            );
        }

        let report = SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, "/b.md");
        assert_eq!(report.failures[0].kind, ErrorKind::Conflict);
        assert!(state.sync_data_for("/a.md").is_some());
        assert!(state.sync_data_for("/b.md").is_none());
        assert!(state.sync_data_for("b.md").is_none());
    }

    #[tokio::test]
    async fn test_truncated_tree_aborts() {
        let backend = seeded();
        backend.set_truncated(true);
        let provider = provider(backend.clone());
        let token = token();
        let mut state = WorkspaceState::new();

        let result = SyncCycle::new(&provider, &token).run(&mut state).await;
        assert!(matches!(result, Err(Error::TreeTooLarge(_))));
        assert_eq!(state, WorkspaceState::new());
    }

    fn data_item(id: &str, data: serde_json::Value) -> WorkspaceItem {
        let mut item = WorkspaceItem::placeholder(id, ItemType::Data);
        item.extra.insert("data".to_string(), data);
        item.with_hash()
    }

    #[tokio::test]
    async fn test_local_only_data_survives_cycles() {
        let backend = seeded();
        let provider = provider(backend.clone());
        let token = token();
        let mut state = WorkspaceState::new();
        SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();

        let settings = data_item("settings", serde_json::json!({ "theme": "dark" }));
        state.upsert_item(settings.clone());
        state.upsert_item(data_item("templates", serde_json::json!({ "t": 1 })));

        let first = SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();
        assert_eq!(first.uploaded, 1);
        assert!(backend
            .file(&repo(), ".stackedit-data/settings.json")
            .is_none());

        let second = SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();
        assert_eq!(second.remote_changes, 0);
        assert_eq!(second.uploaded, 0);
        assert_eq!(state.item("settings"), Some(&settings));
        assert!(state.sync_data_for(".stackedit-data/settings.json").is_none());
    }

    #[tokio::test]
    async fn test_empty_local_folder_is_dropped() {
        let backend = seeded();
        let provider = provider(backend.clone());
        let token = token();
        let mut state = WorkspaceState::new();
        SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();

        state.upsert_item(WorkspaceItem::folder("empty", "drafts", None));
        let first = SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();
        assert_eq!(first.uploaded, 1);
        assert!(state.sync_data_for("drafts/").is_some());

        // Git trees hold no empty folders, the next listing reports it gone
        let second = SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();
        assert_eq!(second.remote_changes, 1);
        assert!(state.item("empty").is_none());
        assert!(state.sync_data_for("drafts/").is_none());

        let settled = SyncCycle::new(&provider, &token).run(&mut state).await.unwrap();
        assert_eq!(settled.remote_changes, 0);
        assert_eq!(settled.uploaded, 0);
    }
}
