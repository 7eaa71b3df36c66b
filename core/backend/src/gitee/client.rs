//! Gitee REST v5 backend helper.
//!
//! Gitee mirrors most of the GitHub v3 surface. Differences handled here:
//! file creation is a POST (updates are PUT), deletes carry their parameters
//! in the query string, and avatars have a thumbnail variant.

use async_trait::async_trait;
use std::sync::Arc;

use docsync_common::{GitPath, RemoteTree, Result, Token};

use super::GITEE_SUB_PREFIX;
use crate::backend::{
    CommitEntry, DownloadedFile, FileContent, Gist, GistCommit, GistUpload, GitBackend,
    RepoInfo, RepoRef, UploadedFile,
};
use crate::config::{CommitAction, CommitMessages};
use crate::rest::RestClient;
use crate::transport::Method;

pub struct GiteeBackend {
    rest: Arc<RestClient>,
    messages: CommitMessages,
}

impl GiteeBackend {
    pub fn new(rest: Arc<RestClient>, messages: CommitMessages) -> Self {
        Self { rest, messages }
    }
}

/// Thumbnail variant of a Gitee avatar.
pub fn avatar_thumbnail(url: &str) -> String {
    if url.ends_with(".png") {
        format!("{}!avatar60", url)
    } else {
        url.to_string()
    }
}

#[async_trait]
impl GitBackend for GiteeBackend {
    fn name(&self) -> &str {
        "gitee"
    }

    fn sub_prefix(&self) -> &str {
        GITEE_SUB_PREFIX
    }

    fn avatar_thumbnail(&self, url: &str) -> String {
        avatar_thumbnail(url)
    }

    async fn get_tree(&self, token: &Token, repo: &RepoRef) -> Result<RemoteTree> {
        self.rest.get_tree(&token.access_token, repo).await
    }

    async fn get_commits(
        &self,
        token: &Token,
        repo: &RepoRef,
        path: &GitPath,
    ) -> Result<Vec<CommitEntry>> {
        self.rest.get_commits(&token.access_token, repo, path).await
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
        let (method, action) = match sha {
            Some(_) => (Method::Put, CommitAction::Update),
            None => (Method::Post, CommitAction::Create),
        };
        let message = commit_message
            .map(str::to_string)
            .unwrap_or_else(|| self.messages.render(action, path.as_str()));

        let mut body = serde_json::json!({
            "message": message,
            "content": content.to_base64(),
            "branch": repo.branch,
        });
        if let Some(sha) = sha {
            body["sha"] = serde_json::Value::String(sha.to_string());
        }

        self.rest
            .write_contents(&token.access_token, method, repo, path, body)
            .await
    }

    async fn remove_file(
        &self,
        token: &Token,
        repo: &RepoRef,
        path: &GitPath,
        sha: &str,
    ) -> Result<()> {
        let message = self.messages.render(CommitAction::Delete, path.as_str());
        self.rest
            .delete_contents(&token.access_token, repo, path, |request| {
                request
                    .query("sha", sha)
                    .query("message", message)
                    .query("branch", repo.branch.as_str())
            })
            .await
    }

    async fn download_file(
        &self,
        token: &Token,
        repo: &RepoRef,
        path: &GitPath,
        is_binary: bool,
    ) -> Result<Option<DownloadedFile>> {
        self.rest
            .download_file(&token.access_token, repo, path, is_binary)
            .await
    }

    async fn repo_info(&self, token: &Token, owner: &str, repo: &str) -> Result<RepoInfo> {
        self.rest.repo_info(&token.access_token, owner, repo).await
    }

    async fn upload_gist(&self, token: &Token, upload: GistUpload<'_>) -> Result<Gist> {
        self.rest
            .upload_gist(
                &token.access_token,
                upload.gist_id,
                upload.description,
                upload.filename,
                upload.content,
                upload.is_public,
            )
            .await
    }

    async fn download_gist(&self, token: &Token, gist_id: &str, filename: &str) -> Result<String> {
        self.rest
            .get_gist(&token.access_token, gist_id)
            .await?
            .file_content(filename)
    }

    async fn get_gist_commits(&self, token: &Token, gist_id: &str) -> Result<Vec<GistCommit>> {
        self.rest.get_gist_commits(&token.access_token, gist_id).await
    }

    async fn download_gist_revision(
        &self,
        token: &Token,
        gist_id: &str,
        filename: &str,
        sha: &str,
    ) -> Result<String> {
        self.rest
            .get_gist_revision(&token.access_token, gist_id, sha)
            .await?
            .file_content(filename)
    }
}
