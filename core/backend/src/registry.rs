//! Backend registry for configuration-driven backend selection.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use docsync_common::{Error, Result};

use crate::account::AccountStore;
use crate::backend::GitBackend;
use crate::config::{DEFAULT_APP_DATA_BRANCH, DEFAULT_APP_DATA_REPO};
use crate::identity::{IdentityRegistry, IdentityRegistryBuilder, UserDirectory, UserInfoResolver};
use crate::oauth::{AuthorizationPrompt, OAuthBackend};
use crate::transport::HttpTransport;

/// Shared collaborators handed to every backend factory.
#[derive(Clone)]
pub struct BackendContext {
    pub transport: Arc<dyn HttpTransport>,
    pub accounts: Arc<dyn AccountStore>,
    pub prompt: Arc<dyn AuthorizationPrompt>,
    pub directory: Arc<UserDirectory>,
}

/// A configured backend and its optional capabilities.
#[derive(Clone)]
pub struct BackendHandle {
    pub git: Arc<dyn GitBackend>,
    pub oauth: Option<Arc<dyn OAuthBackend>>,
    pub resolver: Option<Arc<dyn UserInfoResolver>>,
    /// App-data repository name.
    pub app_data_repo: String,
    pub app_data_branch: String,
}

impl BackendHandle {
    /// Handle for a backend without account operations.
    pub fn git_only(git: Arc<dyn GitBackend>) -> Self {
        Self {
            git,
            oauth: None,
            resolver: None,
            app_data_repo: DEFAULT_APP_DATA_REPO.to_string(),
            app_data_branch: DEFAULT_APP_DATA_BRANCH.to_string(),
        }
    }

    /// Account operations, failing for backends that have none.
    pub fn oauth(&self) -> Result<&Arc<dyn OAuthBackend>> {
        self.oauth.as_ref().ok_or_else(|| {
            Error::InvalidInput(format!(
                "Backend '{}' does not support sign-in",
                self.git.name()
            ))
        })
    }
}

/// Factory function type for creating backends.
pub type BackendFactory = Box<dyn Fn(Value) -> Result<BackendHandle> + Send + Sync>;

/// Registry of backend factories, resolved by name.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory.
    ///
    /// # Errors
    /// - `AlreadyExists` if the name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Backend '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build a backend by name from its configuration.
    ///
    /// # Errors
    /// - `NotFound` if no factory is registered under `name`
    /// - Configuration errors from the factory
    pub fn resolve(&self, name: &str, config: Value) -> Result<BackendHandle> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Backend '{}' is not registered", name)))?;
        factory(config)
    }

    /// Registered backend names.
    pub fn backends(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the GitHub, Gitee and in-memory backends.
pub fn create_default_registry(context: BackendContext) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    let entries: [(&str, BackendFactory); 3] = [
        (
            "memory",
            Box::new(|_config| {
                Ok(BackendHandle::git_only(Arc::new(
                    crate::memory::MemoryBackend::new(),
                )))
            }),
        ),
        ("github", {
            let context = context.clone();
            Box::new(move |config| crate::github::create_github_backend(config, &context))
        }),
        ("gitee", {
            let context = context.clone();
            Box::new(move |config| crate::gitee::create_gitee_backend(config, &context))
        }),
    ];
    for (name, factory) in entries {
        // Names are distinct literals, registration into a fresh registry cannot collide
        let _ = registry.register(name, factory);
    }
    registry
}

/// Freeze the resolvers of the given backends into an identity registry.
///
/// # Errors
/// - `AlreadyExists` if two backends share a name or subject prefix
pub fn build_identity_registry(
    handles: &[BackendHandle],
    directory: Arc<UserDirectory>,
) -> Result<Arc<IdentityRegistry>> {
    let mut builder = IdentityRegistryBuilder::new();
    for handle in handles {
        if let Some(resolver) = &handle.resolver {
            builder.register(handle.git.name(), handle.git.sub_prefix(), resolver.clone())?;
        }
    }
    Ok(builder.build(directory))
}
