//! In-memory git host for testing.
//!
//! Behaves like a hosting backend for the operations the sync providers use:
//! blob writes are checked against the current sha, every write records a
//! commit with a deterministic timestamp, and tree listings can be forced to
//! report truncation.

use async_trait::async_trait;
use chrono::DateTime;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use docsync_common::{
    fingerprint, Error, GitPath, RemoteTree, Result, Token, TreeEntry, TreeEntryType,
};

use crate::backend::{
    tolerate_missing_data_file, CommitDetail, CommitEntry, CommitSignature, CommitUser,
    DownloadedFile, FileContent, Gist, GistCommit, GistFile, GistUpload, GitBackend, RepoInfo,
    RepoRef, UploadedFile,
};

/// 2024-01-01T00:00:00Z, start of the simulated clock.
const CLOCK_START: i64 = 1_704_067_200;

#[derive(Debug, Clone)]
struct StoredBlob {
    sha: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryRepo {
    files: BTreeMap<String, StoredBlob>,
    commits: HashMap<String, Vec<CommitEntry>>,
    head: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    repos: HashMap<String, MemoryRepo>,
    gists: HashMap<String, Vec<(String, Gist)>>,
    truncated: bool,
    tick: u64,
}

impl MemoryState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

fn repo_key(owner: &str, repo: &str) -> String {
    format!("{}/{}", owner, repo)
}

fn clock(tick: u64) -> String {
    DateTime::from_timestamp(CLOCK_START + tick as i64 * 60, 0)
        .map(|date| date.to_rfc3339())
        .unwrap_or_default()
}

/// In-memory backend.
///
/// Repositories are keyed by owner and name; branches are not distinguished.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of backend operations served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make subsequent tree listings report truncation.
    pub fn set_truncated(&self, truncated: bool) {
        self.write().truncated = truncated;
    }

    /// Create an empty repository.
    pub fn create_repo(&self, owner: &str, repo: &str) {
        self.write().repos.entry(repo_key(owner, repo)).or_default();
    }

    /// Write a file directly, bypassing sha checks. Returns the new sha.
    pub fn seed_file(&self, repo: &RepoRef, path: &str, content: &str) -> String {
        let mut state = self.write();
        let tick = state.next_tick();
        let sha = fingerprint(&[path, content, &tick.to_string()]);
        let entry = state.repos.entry(repo_key(&repo.owner, &repo.repo)).or_default();
        entry.files.insert(
            path.to_string(),
            StoredBlob {
                sha: sha.clone(),
                bytes: content.as_bytes().to_vec(),
            },
        );
        entry.head = Some(format!("commit-{}", tick));
        sha
    }

    /// Current sha and content of a file.
    pub fn file(&self, repo: &RepoRef, path: &str) -> Option<(String, Vec<u8>)> {
        self.read()
            .repos
            .get(&repo_key(&repo.owner, &repo.repo))
            .and_then(|r| r.files.get(path))
            .map(|blob| (blob.sha.clone(), blob.bytes.clone()))
    }

    /// Replace the commit history recorded for a path.
    pub fn set_commits(&self, repo: &RepoRef, path: &str, commits: Vec<CommitEntry>) {
        self.write()
            .repos
            .entry(repo_key(&repo.owner, &repo.repo))
            .or_default()
            .commits
            .insert(path.to_string(), commits);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn record_commit(repo: &mut MemoryRepo, owner: &str, path: &str, tick: u64, message: String) {
        let sha = format!("commit-{}", tick);
        let entry = CommitEntry {
            sha: sha.clone(),
            author: Some(CommitUser {
                id: Some(1),
                login: Some(owner.to_string()),
                avatar_url: None,
            }),
            committer: None,
            commit: CommitDetail {
                author: Some(CommitSignature {
                    name: Some(owner.to_string()),
                    date: Some(clock(tick)),
                }),
                committer: None,
                message: Some(message),
            },
        };
        repo.commits
            .entry(path.to_string())
            .or_default()
            .insert(0, entry);
        repo.head = Some(sha);
    }
}

#[async_trait]
impl GitBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn sub_prefix(&self) -> &str {
        "mem"
    }

    async fn get_tree(&self, _token: &Token, repo: &RepoRef) -> Result<RemoteTree> {
        self.count();
        let state = self.read();
        let stored = state
            .repos
            .get(&repo_key(&repo.owner, &repo.repo))
            .ok_or_else(|| Error::NotFound(repo_key(&repo.owner, &repo.repo)))?;
        if state.truncated {
            return Err(Error::TreeTooLarge(repo_key(&repo.owner, &repo.repo)));
        }

        let mut folders = BTreeSet::new();
        for path in stored.files.keys() {
            let mut parts: Vec<&str> = path.split('/').collect();
            parts.pop();
            for depth in 1..=parts.len() {
                folders.insert(parts[..depth].join("/"));
            }
        }

        let mut entries: Vec<TreeEntry> = folders
            .into_iter()
            .map(|path| TreeEntry {
                sha: fingerprint(&["tree", &path]),
                path,
                entry_type: TreeEntryType::Tree,
            })
            .collect();
        entries.extend(
            stored
                .files
                .iter()
                .map(|(path, blob)| TreeEntry::blob(path.clone(), blob.sha.clone())),
        );
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(RemoteTree {
            commit_sha: stored.head.clone().unwrap_or_default(),
            entries,
        })
    }

    async fn get_commits(
        &self,
        _token: &Token,
        repo: &RepoRef,
        path: &GitPath,
    ) -> Result<Vec<CommitEntry>> {
        self.count();
        Ok(self
            .read()
            .repos
            .get(&repo_key(&repo.owner, &repo.repo))
            .and_then(|r| r.commits.get(path.as_str()))
            .cloned()
            .unwrap_or_default())
    }

    async fn upload_file(
        &self,
        _token: &Token,
        repo: &RepoRef,
        path: &GitPath,
        content: &FileContent,
        sha: Option<&str>,
        commit_message: Option<&str>,
    ) -> Result<UploadedFile> {
        self.count();
        let mut state = self.write();
        let tick = state.next_tick();
        let stored = state
            .repos
            .get_mut(&repo_key(&repo.owner, &repo.repo))
            .ok_or_else(|| Error::NotFound(repo_key(&repo.owner, &repo.repo)))?;

        let current = stored.files.get(path.as_str()).map(|b| b.sha.as_str());
        if current != sha {
            return Err(Error::Conflict(path.to_string()));
        }

        let new_sha = fingerprint(&[path.as_str(), &content.to_base64(), &tick.to_string()]);
        stored.files.insert(
            path.to_string(),
            StoredBlob {
                sha: new_sha.clone(),
                bytes: content.as_bytes().to_vec(),
            },
        );
        let message = commit_message
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} written", path));
        Self::record_commit(stored, &repo.owner, path.as_str(), tick, message);

        Ok(UploadedFile {
            sha: new_sha,
            commit_sha: stored.head.clone(),
        })
    }

    async fn remove_file(
        &self,
        _token: &Token,
        repo: &RepoRef,
        path: &GitPath,
        sha: &str,
    ) -> Result<()> {
        self.count();
        let mut state = self.write();
        let tick = state.next_tick();
        let stored = state
            .repos
            .get_mut(&repo_key(&repo.owner, &repo.repo))
            .ok_or_else(|| Error::NotFound(repo_key(&repo.owner, &repo.repo)))?;

        match stored.files.get(path.as_str()) {
            None => return Err(Error::NotFound(path.to_string())),
            Some(blob) if blob.sha != sha => return Err(Error::Conflict(path.to_string())),
            Some(_) => {}
        }
        stored.files.remove(path.as_str());
        Self::record_commit(
            stored,
            &repo.owner,
            path.as_str(),
            tick,
            format!("{} deleted", path),
        );
        Ok(())
    }

    async fn download_file(
        &self,
        _token: &Token,
        repo: &RepoRef,
        path: &GitPath,
        is_binary: bool,
    ) -> Result<Option<DownloadedFile>> {
        self.count();
        let blob = self
            .read()
            .repos
            .get(&repo_key(&repo.owner, &repo.repo))
            .and_then(|r| r.files.get(path.as_str()))
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()));

        let blob = match tolerate_missing_data_file(path, blob)? {
            Some(blob) => blob,
            None => return Ok(None),
        };
        let content = if is_binary {
            FileContent::Binary(blob.bytes)
        } else {
            String::from_utf8(blob.bytes)
                .map(FileContent::Text)
                .map_err(|e| Error::Serialization(format!("Content is not UTF-8: {}", e)))?
        };
        Ok(Some(DownloadedFile {
            sha: blob.sha,
            content,
        }))
    }

    async fn repo_info(&self, _token: &Token, owner: &str, repo: &str) -> Result<RepoInfo> {
        self.count();
        let key = repo_key(owner, repo);
        if self.read().repos.contains_key(&key) {
            Ok(RepoInfo {
                full_name: key,
                private: true,
                default_branch: Some("master".to_string()),
            })
        } else {
            Err(Error::NotFound(key))
        }
    }

    async fn upload_gist(&self, _token: &Token, upload: GistUpload<'_>) -> Result<Gist> {
        self.count();
        let mut state = self.write();
        let tick = state.next_tick();
        let version = format!("gist-rev-{}", tick);

        let file = GistFile {
            filename: Some(upload.filename.to_string()),
            content: Some(upload.content.to_string()),
        };
        let gist = match upload.gist_id {
            Some(id) => {
                let revisions = state
                    .gists
                    .get_mut(id)
                    .ok_or_else(|| Error::NotFound(format!("Gist {}", id)))?;
                let mut gist = revisions
                    .first()
                    .map(|(_, gist)| gist.clone())
                    .ok_or_else(|| Error::NotFound(format!("Gist {}", id)))?;
                gist.description = Some(upload.description.to_string());
                gist.files.insert(upload.filename.to_string(), file);
                revisions.insert(0, (version, gist.clone()));
                gist
            }
            None => {
                let gist = Gist {
                    id: format!("gist-{}", tick),
                    description: Some(upload.description.to_string()),
                    public: Some(upload.is_public),
                    files: HashMap::from([(upload.filename.to_string(), file)]),
                };
                state
                    .gists
                    .insert(gist.id.clone(), vec![(version, gist.clone())]);
                gist
            }
        };
        Ok(gist)
    }

    async fn download_gist(&self, _token: &Token, gist_id: &str, filename: &str) -> Result<String> {
        self.count();
        self.read()
            .gists
            .get(gist_id)
            .and_then(|revisions| revisions.first())
            .ok_or_else(|| Error::NotFound(format!("Gist {}", gist_id)))?
            .1
            .file_content(filename)
    }

    async fn get_gist_commits(&self, _token: &Token, gist_id: &str) -> Result<Vec<GistCommit>> {
        self.count();
        let state = self.read();
        let revisions = state
            .gists
            .get(gist_id)
            .ok_or_else(|| Error::NotFound(format!("Gist {}", gist_id)))?;
        Ok(revisions
            .iter()
            .map(|(version, _)| GistCommit {
                version: version.clone(),
                committed_at: None,
                user: None,
            })
            .collect())
    }

    async fn download_gist_revision(
        &self,
        _token: &Token,
        gist_id: &str,
        filename: &str,
        sha: &str,
    ) -> Result<String> {
        self.count();
        self.read()
            .gists
            .get(gist_id)
            .and_then(|revisions| revisions.iter().find(|(version, _)| version == sha))
            .ok_or_else(|| Error::NotFound(format!("Gist {} at {}", gist_id, sha)))?
            .1
            .file_content(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_common::Secret;

    fn token() -> Token {
        Token {
            access_token: Secret::new("memory"),
            scopes: vec![],
            sub: "1".to_string(),
            name: "octo".to_string(),
            is_login: true,
            is_sponsor: false,
            repo_full_access: true,
            img_storages: None,
        }
    }

    fn setup() -> (MemoryBackend, RepoRef) {
        let backend = MemoryBackend::new();
        backend.create_repo("octo", "stackedit-app-data");
        (backend, RepoRef::new("octo", "stackedit-app-data", "master"))
    }

    #[tokio::test]
    async fn test_r1_r2_and_stale_r1() {
        let (backend, repo) = setup();
        let path = GitPath::parse("note/001.md").unwrap();

        let r1 = backend
            .upload_file(&token(), &repo, &path, &FileContent::Text("hello".into()), None, None)
            .await
            .unwrap();
        let r2 = backend
            .upload_file(
                &token(),
                &repo,
                &path,
                &FileContent::Text("hello world".into()),
                Some(&r1.sha),
                None,
            )
            .await
            .unwrap();
        assert_ne!(r1.sha, r2.sha);

        let stale = backend
            .upload_file(
                &token(),
                &repo,
                &path,
                &FileContent::Text("again".into()),
                Some(&r1.sha),
                None,
            )
            .await;
        assert!(matches!(stale, Err(Error::Conflict(_))));

        let (sha, bytes) = backend.file(&repo, "note/001.md").unwrap();
        assert_eq!(sha, r2.sha);
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn test_create_over_existing_is_conflict() {
        let (backend, repo) = setup();
        backend.seed_file(&repo, "a.md", "x");
        let path = GitPath::parse("a.md").unwrap();

        let result = backend
            .upload_file(&token(), &repo, &path, &FileContent::Text("y".into()), None, None)
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_tree_lists_folders_and_blobs() {
        let (backend, repo) = setup();
        backend.seed_file(&repo, "a/b/c.md", "c");
        backend.seed_file(&repo, "top.md", "t");

        let tree = backend.get_tree(&token(), &repo).await.unwrap();
        let paths: Vec<&str> = tree.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a", "a/b", "a/b/c.md", "top.md"]);
        assert_eq!(tree.blobs().count(), 2);

        backend.set_truncated(true);
        assert!(matches!(
            backend.get_tree(&token(), &repo).await,
            Err(Error::TreeTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_download_missing_paths() {
        let (backend, repo) = setup();
        let data = GitPath::parse(".stackedit-data/templates.json").unwrap();
        let note = GitPath::parse("note.md").unwrap();

        assert!(backend
            .download_file(&token(), &repo, &data, false)
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            backend.download_file(&token(), &repo, &note, false).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_checks_sha_and_records_history() {
        let (backend, repo) = setup();
        let path = GitPath::parse("a.md").unwrap();
        let written = backend
            .upload_file(&token(), &repo, &path, &FileContent::Text("a".into()), None, None)
            .await
            .unwrap();

        assert!(matches!(
            backend.remove_file(&token(), &repo, &path, "stale").await,
            Err(Error::Conflict(_))
        ));
        backend
            .remove_file(&token(), &repo, &path, &written.sha)
            .await
            .unwrap();
        assert!(backend.file(&repo, "a.md").is_none());

        let commits = backend.get_commits(&token(), &repo, &path).await.unwrap();
        assert_eq!(commits.len(), 2);
        // Newest first, with increasing simulated time
        let newest = commits[0].commit.author.as_ref().unwrap().date.clone().unwrap();
        let oldest = commits[1].commit.author.as_ref().unwrap().date.clone().unwrap();
        assert!(newest > oldest);
    }

    #[tokio::test]
    async fn test_gist_revisions() {
        let backend = MemoryBackend::new();
        let created = backend
            .upload_gist(
                &token(),
                GistUpload {
                    description: "d",
                    filename: "a.md",
                    content: "v1",
                    is_public: false,
                    gist_id: None,
                },
            )
            .await
            .unwrap();
        backend
            .upload_gist(
                &token(),
                GistUpload {
                    description: "d",
                    filename: "a.md",
                    content: "v2",
                    is_public: false,
                    gist_id: Some(&created.id),
                },
            )
            .await
            .unwrap();

        assert_eq!(backend.download_gist(&token(), &created.id, "a.md").await.unwrap(), "v2");
        let commits = backend.get_gist_commits(&token(), &created.id).await.unwrap();
        assert_eq!(commits.len(), 2);
        let first = backend
            .download_gist_revision(&token(), &created.id, "a.md", &commits[1].version)
            .await
            .unwrap();
        assert_eq!(first, "v1");
    }

    #[tokio::test]
    async fn test_call_count() {
        let (backend, repo) = setup();
        assert_eq!(backend.call_count(), 0);
        backend.get_tree(&token(), &repo).await.unwrap();
        backend.repo_info(&token(), "octo", "missing").await.unwrap_err();
        assert_eq!(backend.call_count(), 2);
    }
}
