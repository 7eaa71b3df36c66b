//! GitHub REST v3 backend helper.

use async_trait::async_trait;
use std::sync::Arc;

use docsync_common::{GitPath, RemoteTree, Result, Token};

use super::GITHUB_SUB_PREFIX;
use crate::backend::{
    CommitEntry, CommitUser, DownloadedFile, FileContent, Gist, GistCommit, GistUpload, GitBackend,
    RepoInfo, RepoRef, UploadedFile,
};
use crate::config::{CommitAction, CommitMessages};
use crate::rest::RestClient;
use crate::transport::Method;

/// Git operations against api.github.com (or a GitHub Enterprise base).
pub struct GitHubBackend {
    rest: Arc<RestClient>,
    messages: CommitMessages,
}

impl GitHubBackend {
    pub fn new(rest: Arc<RestClient>, messages: CommitMessages) -> Self {
        Self { rest, messages }
    }

    pub fn rest(&self) -> &Arc<RestClient> {
        &self.rest
    }
}

#[async_trait]
impl GitBackend for GitHubBackend {
    fn name(&self) -> &str {
        "github"
    }

    fn sub_prefix(&self) -> &str {
        GITHUB_SUB_PREFIX
    }

    // GitHub subjects are numeric user ids.
    fn commit_user_subject(&self, user: &CommitUser) -> Option<String> {
        user.id.map(|id| id.to_string())
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
        let message = match commit_message {
            Some(message) => message.to_string(),
            None if sha.is_some() => self.messages.render(CommitAction::Update, path.as_str()),
            None => self.messages.render(CommitAction::Create, path.as_str()),
        };

        let mut body = serde_json::json!({
            "message": message,
            "content": content.to_base64(),
            "branch": repo.branch,
        });
        if let Some(sha) = sha {
            body["sha"] = serde_json::Value::String(sha.to_string());
        }

        self.rest
            .write_contents(&token.access_token, Method::Put, repo, path, body)
            .await
    }

    async fn remove_file(
        &self,
        token: &Token,
        repo: &RepoRef,
        path: &GitPath,
        sha: &str,
    ) -> Result<()> {
        let body = serde_json::json!({
            "message": self.messages.render(CommitAction::Delete, path.as_str()),
            "sha": sha,
            "branch": repo.branch,
        });
        self.rest
            .delete_contents(&token.access_token, repo, path, |request| request.json(body))
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
