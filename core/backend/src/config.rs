//! Backend configuration.

use serde::{Deserialize, Serialize};

/// Default name of the dedicated app-data repository.
pub const DEFAULT_APP_DATA_REPO: &str = "stackedit-app-data";
/// Default branch of the app-data repository.
pub const DEFAULT_APP_DATA_BRANCH: &str = "master";

/// OAuth2 client registration for one hosting provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Redirect URL registered with the provider.
    pub redirect_url: String,
}

/// Commit message templates. `{{path}}` is replaced with the target path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitMessages {
    pub create_file_message: String,
    pub update_file_message: String,
    pub delete_file_message: String,
}

impl Default for CommitMessages {
    fn default() -> Self {
        Self {
            create_file_message: "{{path}} created".to_string(),
            update_file_message: "{{path}} updated".to_string(),
            delete_file_message: "{{path}} deleted".to_string(),
        }
    }
}

/// Which commit message template to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitAction {
    Create,
    Update,
    Delete,
}

impl CommitMessages {
    /// Render the template for `action` against `path`.
    pub fn render(&self, action: CommitAction, path: &str) -> String {
        let template = match action {
            CommitAction::Create => &self.create_file_message,
            CommitAction::Update => &self.update_file_message,
            CommitAction::Delete => &self.delete_file_message,
        };
        template.replace("{{path}}", path)
    }
}

/// Configuration of one hosting backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// REST API base URL, e.g. `https://api.github.com`. Empty selects the
    /// backend's public endpoint.
    #[serde(default)]
    pub api_base: String,
    /// OAuth2 client registration.
    #[serde(default)]
    pub oauth: OAuthConfig,
    /// Name of the dedicated app-data repository.
    #[serde(default = "default_app_data_repo")]
    pub app_data_repo: String,
    /// Branch of the app-data repository.
    #[serde(default = "default_app_data_branch")]
    pub app_data_branch: String,
    /// `owner/repo` template used to provision the app-data repository.
    #[serde(default)]
    pub template_repo: Option<String>,
    /// Application server used for sponsor lookups.
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub commit_messages: CommitMessages,
}

fn default_app_data_repo() -> String {
    DEFAULT_APP_DATA_REPO.to_string()
}

fn default_app_data_branch() -> String {
    DEFAULT_APP_DATA_BRANCH.to_string()
}

impl BackendConfig {
    /// Configuration with the given API base and defaults elsewhere.
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            oauth: OAuthConfig::default(),
            app_data_repo: default_app_data_repo(),
            app_data_branch: default_app_data_branch(),
            template_repo: None,
            server_url: None,
            commit_messages: CommitMessages::default(),
        }
    }

    /// API base without trailing slash, or `default` when unset.
    pub fn api_base_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.api_base.is_empty() {
            default
        } else {
            self.api_base.trim_end_matches('/')
        }
    }

    /// Parse a configuration value; `null` yields the defaults.
    pub fn from_value(value: serde_json::Value) -> docsync_common::Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value)?)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}
