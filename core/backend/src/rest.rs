//! Shared REST plumbing for the git hosting APIs.
//!
//! GitHub v3 and Gitee v5 share most of their repository, git data and gist
//! endpoints. [`RestClient`] owns the common request building, status
//! classification and the operations whose wire shape is identical on both.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use docsync_common::{
    encode_component, Error, GitPath, RemoteTree, Result, Secret, TreeEntry,
};

use crate::backend::{
    tolerate_missing_data_file, CommitEntry, DownloadedFile, FileContent, Gist, GistCommit,
    RepoInfo, RepoRef, UploadedFile,
};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};

/// How the access token travels with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: token {access_token}` (GitHub).
    TokenHeader,
    /// `access_token={access_token}` query parameter (Gitee).
    QueryParam,
}

/// Authenticated user, as returned by `GET /user`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteUser {
    pub id: u64,
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitTree {
    tree: ShaRef,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
    sha: String,
    commit: CommitTree,
}

#[derive(Debug, Deserialize)]
struct TreeListing {
    #[serde(default)]
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    content: ShaRef,
    #[serde(default)]
    commit: Option<ShaRef>,
}

impl From<WriteResponse> for UploadedFile {
    fn from(response: WriteResponse) -> Self {
        UploadedFile {
            sha: response.content.sha,
            commit_sha: response.commit.map(|c| c.sha),
        }
    }
}

/// Map a completed exchange to the error taxonomy.
///
/// `is_write` enables the stale-sha detection of content writes, which some
/// backends report as 422 or 400 with a message naming the sha.
pub fn check_status(response: HttpResponse, context: &str, is_write: bool) -> Result<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }

    let body = response.text();
    match response.status {
        401 => Err(Error::Authentication(format!("{}: {}", context, body))),
        403 => Err(Error::PermissionDenied(format!("{}: {}", context, body))),
        404 => Err(Error::NotFound(context.to_string())),
        409 => Err(Error::Conflict(context.to_string())),
        400 | 422 if is_write && body.to_ascii_lowercase().contains("sha") => {
            Err(Error::Conflict(context.to_string()))
        }
        status => Err(Error::Http {
            status,
            message: format!("{}: {}", context, body),
        }),
    }
}

/// Current time in milliseconds, used as the anti-cache parameter.
pub fn cache_buster() -> String {
    Utc::now().timestamp_millis().to_string()
}

/// REST client bound to one API base.
pub struct RestClient {
    transport: Arc<dyn HttpTransport>,
    api_base: String,
    auth: AuthStyle,
}

impl RestClient {
    pub fn new(transport: Arc<dyn HttpTransport>, api_base: &str, auth: AuthStyle) -> Self {
        Self {
            transport,
            api_base: api_base.trim_end_matches('/').to_string(),
            auth,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// Absolute URL of an API endpoint.
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.api_base, endpoint)
    }

    /// Absolute URL of a repository-scoped endpoint.
    pub fn repo_url(&self, owner: &str, repo: &str, endpoint: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base,
            encode_component(owner),
            encode_component(repo),
            endpoint
        )
    }

    fn contents_url(&self, repo: &RepoRef, path: &GitPath) -> String {
        self.repo_url(
            &repo.owner,
            &repo.repo,
            &format!("contents/{}", path.encoded()),
        )
    }

    /// Send a request, attaching credentials and the anti-cache parameter.
    pub async fn send(
        &self,
        access_token: Option<&Secret>,
        request: HttpRequest,
        context: &str,
        is_write: bool,
    ) -> Result<HttpResponse> {
        let mut request = request.query("t", cache_buster());
        if let Some(access_token) = access_token {
            request = match self.auth {
                AuthStyle::TokenHeader => {
                    request.header("Authorization", format!("token {}", access_token.expose()))
                }
                AuthStyle::QueryParam => request.query("access_token", access_token.expose()),
            };
        }
        let response = self.transport.send(request).await?;
        check_status(response, context, is_write)
    }

    /// Send a read request and parse the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        access_token: Option<&Secret>,
        url: String,
        context: &str,
    ) -> Result<T> {
        self.send(access_token, HttpRequest::get(url), context, false)
            .await?
            .json()
    }

    /// Authenticated user behind an access token.
    pub async fn current_user(&self, access_token: &Secret) -> Result<RemoteUser> {
        self.get_json(Some(access_token), self.url("user"), "user")
            .await
    }

    /// Resolve the branch head, then list its tree recursively.
    pub async fn get_tree(&self, access_token: &Secret, repo: &RepoRef) -> Result<RemoteTree> {
        let head: BranchCommit = self
            .get_json(
                Some(access_token),
                self.repo_url(
                    &repo.owner,
                    &repo.repo,
                    &format!("commits/{}", encode_component(&repo.branch)),
                ),
                &repo.branch,
            )
            .await?;

        let request = HttpRequest::get(self.repo_url(
            &repo.owner,
            &repo.repo,
            &format!("git/trees/{}", encode_component(&head.commit.tree.sha)),
        ))
        .query("recursive", "1");
        let listing: TreeListing = self
            .send(Some(access_token), request, &head.commit.tree.sha, false)
            .await?
            .json()?;

        if listing.truncated {
            return Err(Error::TreeTooLarge(format!(
                "{}/{}: please remove some files in the repository",
                repo.owner, repo.repo
            )));
        }

        debug!(
            "Fetched tree of {}/{}@{} ({} entries)",
            repo.owner,
            repo.repo,
            head.sha,
            listing.tree.len()
        );
        Ok(RemoteTree {
            commit_sha: head.sha,
            entries: listing.tree,
        })
    }

    pub async fn get_commits(
        &self,
        access_token: &Secret,
        repo: &RepoRef,
        path: &GitPath,
    ) -> Result<Vec<CommitEntry>> {
        let request = HttpRequest::get(self.repo_url(&repo.owner, &repo.repo, "commits"))
            .query("sha", repo.branch.as_str())
            .query("path", path.as_str());
        self.send(Some(access_token), request, path.as_str(), false)
            .await?
            .json()
    }

    /// Write a file through the contents endpoint.
    pub async fn write_contents(
        &self,
        access_token: &Secret,
        method: Method,
        repo: &RepoRef,
        path: &GitPath,
        body: serde_json::Value,
    ) -> Result<UploadedFile> {
        let request = HttpRequest::new(method, self.contents_url(repo, path)).json(body);
        let response: WriteResponse = self
            .send(Some(access_token), request, path.as_str(), true)
            .await?
            .json()?;
        Ok(response.into())
    }

    /// Delete a file through the contents endpoint.
    pub async fn delete_contents(
        &self,
        access_token: &Secret,
        repo: &RepoRef,
        path: &GitPath,
        configure: impl FnOnce(HttpRequest) -> HttpRequest,
    ) -> Result<()> {
        let request = configure(HttpRequest::new(
            Method::Delete,
            self.contents_url(repo, path),
        ));
        self.send(Some(access_token), request, path.as_str(), true)
            .await?;
        Ok(())
    }

    pub async fn download_file(
        &self,
        access_token: &Secret,
        repo: &RepoRef,
        path: &GitPath,
        is_binary: bool,
    ) -> Result<Option<DownloadedFile>> {
        let request =
            HttpRequest::get(self.contents_url(repo, path)).query("ref", repo.branch.as_str());
        let result = self
            .send(Some(access_token), request, path.as_str(), false)
            .await
            .and_then(|response| response.json::<ContentsResponse>());

        match tolerate_missing_data_file(path, result)? {
            Some(contents) => {
                let encoded = contents.content.unwrap_or_default();
                Ok(Some(DownloadedFile {
                    sha: contents.sha,
                    content: FileContent::from_base64(&encoded, is_binary)?,
                }))
            }
            None => {
                debug!("Data file {} not present yet", path);
                Ok(None)
            }
        }
    }

    pub async fn repo_info(&self, access_token: &Secret, owner: &str, repo: &str) -> Result<RepoInfo> {
        self.get_json(
            Some(access_token),
            self.repo_url(owner, repo, "").trim_end_matches('/').to_string(),
            &format!("{}/{}", owner, repo),
        )
        .await
    }

    /// Create a gist, or edit it when `gist_id` is set.
    pub async fn upload_gist(
        &self,
        access_token: &Secret,
        gist_id: Option<&str>,
        description: &str,
        filename: &str,
        content: &str,
        is_public: bool,
    ) -> Result<Gist> {
        let mut body = serde_json::json!({
            "description": description,
            "files": { filename: { "content": content } },
        });
        let request = match gist_id {
            Some(id) => HttpRequest::new(
                Method::Patch,
                self.url(&format!("gists/{}", encode_component(id))),
            ),
            None => {
                body["public"] = serde_json::Value::Bool(is_public);
                HttpRequest::new(Method::Post, self.url("gists"))
            }
        };
        self.send(Some(access_token), request.json(body), filename, false)
            .await?
            .json()
    }

    pub async fn get_gist(&self, access_token: &Secret, gist_id: &str) -> Result<Gist> {
        self.get_json(
            Some(access_token),
            self.url(&format!("gists/{}", encode_component(gist_id))),
            gist_id,
        )
        .await
    }

    pub async fn get_gist_commits(
        &self,
        access_token: &Secret,
        gist_id: &str,
    ) -> Result<Vec<GistCommit>> {
        self.get_json(
            Some(access_token),
            self.url(&format!("gists/{}/commits", encode_component(gist_id))),
            gist_id,
        )
        .await
    }

    pub async fn get_gist_revision(
        &self,
        access_token: &Secret,
        gist_id: &str,
        sha: &str,
    ) -> Result<Gist> {
        self.get_json(
            Some(access_token),
            self.url(&format!(
                "gists/{}/{}",
                encode_component(gist_id),
                encode_component(sha)
            )),
            gist_id,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::json;

    fn client(transport: Arc<MockTransport>, auth: AuthStyle) -> RestClient {
        RestClient::new(transport, "https://api.example.com/", auth)
    }

    fn repo() -> RepoRef {
        RepoRef::new("octo", "stackedit-app-data", "master")
    }

    #[test]
    fn test_check_status_classification() {
        let not_found = check_status(HttpResponse::new(404, "{}"), "a.md", false);
        assert!(matches!(not_found, Err(Error::NotFound(_))));

        let conflict = check_status(HttpResponse::new(409, "{}"), "a.md", true);
        assert!(matches!(conflict, Err(Error::Conflict(_))));

        let stale = check_status(
            HttpResponse::new(422, r#"{"message":"a.md does not match sha"}"#),
            "a.md",
            true,
        );
        assert!(matches!(stale, Err(Error::Conflict(_))));

        let invalid = check_status(
            HttpResponse::new(422, r#"{"message":"Invalid request"}"#),
            "a.md",
            true,
        );
        assert!(matches!(invalid, Err(Error::Http { status: 422, .. })));

        let unauthorized = check_status(HttpResponse::new(401, "{}"), "user", false);
        assert!(matches!(unauthorized, Err(Error::Authentication(_))));
    }

    #[test]
    fn test_repo_url_encodes_components() {
        let transport = Arc::new(MockTransport::new());
        let client = client(transport, AuthStyle::TokenHeader);
        assert_eq!(
            client.repo_url("my org", "notes", "commits"),
            "https://api.example.com/repos/my%20org/notes/commits"
        );
    }

    #[tokio::test]
    async fn test_send_attaches_header_auth_and_cache_buster() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({ "id": 7, "login": "octo" }));
        let client = client(transport.clone(), AuthStyle::TokenHeader);

        let user = client.current_user(&Secret::new("abc")).await.unwrap();
        assert_eq!(user.login, "octo");

        let request = &transport.requests()[0];
        assert_eq!(request.header_value("Authorization"), Some("token abc"));
        assert!(request.query_value("t").is_some());
        assert!(request.query_value("access_token").is_none());
    }

    #[tokio::test]
    async fn test_send_attaches_query_auth() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({ "id": 7, "login": "octo" }));
        let client = client(transport.clone(), AuthStyle::QueryParam);

        client.current_user(&Secret::new("abc")).await.unwrap();

        let request = &transport.requests()[0];
        assert_eq!(request.query_value("access_token"), Some("abc"));
        assert!(request.header_value("Authorization").is_none());
    }

    #[tokio::test]
    async fn test_get_tree_two_steps() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({ "sha": "c1", "commit": { "tree": { "sha": "t1" } } }));
        transport.push_json(
            200,
            json!({
                "sha": "t1",
                "tree": [
                    { "path": "note", "type": "tree", "sha": "d1", "mode": "040000" },
                    { "path": "note/001.md", "type": "blob", "sha": "b1", "size": 5 }
                ],
                "truncated": false
            }),
        );
        let client = client(transport.clone(), AuthStyle::TokenHeader);

        let tree = client.get_tree(&Secret::new("abc"), &repo()).await.unwrap();
        assert_eq!(tree.commit_sha, "c1");
        assert_eq!(tree.entries.len(), 2);
        assert_eq!(tree.blobs().count(), 1);

        let requests = transport.requests();
        assert!(requests[0].url.ends_with("/commits/master"));
        assert!(requests[1].url.ends_with("/git/trees/t1"));
        assert_eq!(requests[1].query_value("recursive"), Some("1"));
    }

    #[tokio::test]
    async fn test_get_tree_truncated_fails() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({ "sha": "c1", "commit": { "tree": { "sha": "t1" } } }));
        transport.push_json(
            200,
            json!({
                "sha": "t1",
                "tree": [{ "path": "a.md", "type": "blob", "sha": "b1" }],
                "truncated": true
            }),
        );
        let client = client(transport, AuthStyle::TokenHeader);

        let result = client.get_tree(&Secret::new("abc"), &repo()).await;
        assert!(matches!(result, Err(Error::TreeTooLarge(_))));
    }

    #[tokio::test]
    async fn test_download_missing_reserved_file_is_none() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(404, json!({ "message": "Not Found" }));
        transport.push_json(404, json!({ "message": "Not Found" }));
        let client = client(transport, AuthStyle::TokenHeader);
        let token = Secret::new("abc");

        let data = GitPath::parse(".stackedit-data/templates.json").unwrap();
        assert!(client
            .download_file(&token, &repo(), &data, false)
            .await
            .unwrap()
            .is_none());

        let note = GitPath::parse("note/001.md").unwrap();
        let result = client.download_file(&token, &repo(), &note, false).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_download_decodes_base64() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({ "sha": "b1", "content": "aGVs\nbG8=\n" }));
        let client = client(transport.clone(), AuthStyle::TokenHeader);

        let path = GitPath::parse("note/001.md").unwrap();
        let file = client
            .download_file(&Secret::new("abc"), &repo(), &path, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.sha, "b1");
        assert_eq!(file.content, FileContent::Text("hello".to_string()));
        assert_eq!(transport.requests()[0].query_value("ref"), Some("master"));
    }

    #[tokio::test]
    async fn test_upload_gist_create_vs_edit() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(201, json!({ "id": "g1", "files": {} }));
        transport.push_json(200, json!({ "id": "g1", "files": {} }));
        let client = client(transport.clone(), AuthStyle::TokenHeader);
        let token = Secret::new("abc");

        client
            .upload_gist(&token, None, "desc", "a.md", "# a", true)
            .await
            .unwrap();
        client
            .upload_gist(&token, Some("g1"), "desc", "a.md", "# b", true)
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[0].json_body().unwrap()["public"], true);
        assert_eq!(requests[1].method, Method::Patch);
        assert!(requests[1].url.ends_with("/gists/g1"));
        assert!(requests[1].json_body().unwrap().get("public").is_none());
        assert_eq!(requests[1].json_body().unwrap()["files"]["a.md"]["content"], "# b");
    }
}
