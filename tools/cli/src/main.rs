//! docsync CLI - Command line interface for app-data workspace sync.
//!
//! This tool signs in to GitHub or Gitee, inspects the app-data repository
//! and synchronizes a workspace state file with it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use docsync_backend::{
    create_default_registry, AccountStore, AuthorizationCode, AuthorizationPrompt, BackendContext,
    BackendHandle, FileAccountStore, OAuthBackend, ReqwestTransport, RetryConfig, UserDirectory,
};
use docsync_common::{Error, Token, TreeEntryType};
use docsync_sync::{AppDataProvider, SyncCycle, SyncProvider};
use docsync_workspace::{MemoryShaStore, WorkspaceState};

/// Content id used when printing a file outside of any workspace.
const DETACHED_CONTENT_ID: &str = "detached/content";

#[derive(Parser)]
#[command(name = "docsync")]
#[command(about = "docsync - Markdown workspace sync over git app-data repositories")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Hosting backend: "github" or "gitee".
    #[arg(short, long, global = true, default_value = "github")]
    backend: String,

    /// Account subject to use instead of the signed-in account.
    #[arg(long, global = true)]
    account: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize an account.
    Login {
        /// Sign in to the main workspace and provision its repository.
        #[arg(long)]
        primary: bool,

        /// Request access to public repositories only.
        #[arg(long)]
        public_only: bool,
    },

    /// List the app-data repository tree.
    Tree,

    /// Show the revisions of a file.
    Log {
        /// Path in the repository.
        path: String,
    },

    /// Print a file of the repository.
    Cat {
        /// Path in the repository.
        path: String,

        /// Also print the embedded properties.
        #[arg(long)]
        properties: bool,
    },

    /// Synchronize a workspace state file.
    Sync {
        /// Workspace state file, created if missing.
        #[arg(short, long)]
        state: PathBuf,
    },
}

/// Configuration file contents.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    /// Backend configurations, by backend name.
    backends: HashMap<String, Value>,
    /// Account store file.
    accounts: Option<PathBuf>,
    /// Backoff of the HTTP transport.
    retry: RetryConfig,
}

impl CliConfig {
    fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("docsync").join("config.json"))
    }

    /// Load the configuration. A missing default file yields the defaults,
    /// a missing explicit file is an error.
    async fn load(explicit: Option<&Path>) -> Result<Self> {
        let Some(path) = explicit.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Ok(Self::default());
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Invalid configuration file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && explicit.is_none() => {
                debug!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read configuration {}", path.display()))
            }
        }
    }

    fn backend(&self, name: &str) -> Value {
        self.backends
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

/// Reads the authorization code from the terminal after opening the browser.
struct StdinPrompt;

#[async_trait]
impl AuthorizationPrompt for StdinPrompt {
    async fn request_code(
        &self,
        authorize_url: &str,
        silent: bool,
    ) -> docsync_common::Result<AuthorizationCode> {
        if silent {
            return Err(Error::Authentication(
                "Silent sign-in is not available from the terminal".to_string(),
            ));
        }

        println!("Open this URL to authorize docsync:\n\n  {}\n", authorize_url);
        if let Err(e) = open::that(authorize_url) {
            debug!("Could not open a browser: {}", e);
        }
        println!("Paste the redirect URL or the authorization code:");

        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await
        .map_err(|e| Error::Authentication(format!("Prompt failed: {}", e)))??;

        parse_authorization(&line)
            .ok_or_else(|| Error::Authentication("No authorization code given".to_string()))
    }
}

/// Accept either the full redirect URL or the bare code.
fn parse_authorization(input: &str) -> Option<AuthorizationCode> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let Ok(url) = Url::parse(input) else {
        return Some(AuthorizationCode {
            code: input.to_string(),
            state: None,
        });
    };

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }
    code.map(|code| AuthorizationCode { code, state })
}

/// A configured backend with its account store.
struct Session {
    handle: BackendHandle,
    accounts: Arc<dyn AccountStore>,
    directory: Arc<UserDirectory>,
}

impl Session {
    async fn open(cli: &Cli) -> Result<Self> {
        let config = CliConfig::load(cli.config.as_deref()).await?;
        let accounts_path = match &config.accounts {
            Some(path) => path.clone(),
            None => FileAccountStore::default_path()?,
        };
        let accounts: Arc<dyn AccountStore> = Arc::new(
            FileAccountStore::open(&accounts_path)
                .await
                .context("Failed to open account store")?,
        );
        let directory = Arc::new(UserDirectory::new());

        let registry = create_default_registry(BackendContext {
            transport: Arc::new(ReqwestTransport::with_retry(config.retry.clone())?),
            accounts: accounts.clone(),
            prompt: Arc::new(StdinPrompt),
            directory: directory.clone(),
        });
        let handle = registry
            .resolve(&cli.backend, config.backend(&cli.backend))
            .with_context(|| format!("Failed to configure backend '{}'", cli.backend))?;

        Ok(Self {
            handle,
            accounts,
            directory,
        })
    }

    fn provider(&self) -> AppDataProvider {
        AppDataProvider::from_handle(
            &self.handle,
            Arc::new(MemoryShaStore::new()),
            self.directory.clone(),
        )
    }

    /// The requested account, or the signed-in one, or any.
    async fn token(&self, sub: Option<&str>) -> Result<Token> {
        let backend = self.handle.git.name();
        if let Some(sub) = sub {
            return self
                .accounts
                .token(backend, sub)
                .await?
                .with_context(|| format!("No {} account with subject {}", backend, sub));
        }

        let tokens = self.accounts.tokens(backend).await?;
        let preferred = tokens.iter().position(|t| t.is_login).unwrap_or(0);
        tokens.into_iter().nth(preferred).with_context(|| {
            format!(
                "No {} account, run `docsync login --backend {}` first",
                backend, backend
            )
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let session = Session::open(&cli).await?;
    let account = cli.account.as_deref();

    match &cli.command {
        Commands::Login {
            primary,
            public_only,
        } => cmd_login(&session, *primary, *public_only).await,

        Commands::Tree => cmd_tree(&session, account).await,

        Commands::Log { path } => cmd_log(&session, account, path).await,

        Commands::Cat { path, properties } => cmd_cat(&session, account, path, *properties).await,

        Commands::Sync { state } => cmd_sync(&session, account, state).await,
    }
}

/// Authorize a new account or refresh an existing one.
async fn cmd_login(session: &Session, primary: bool, public_only: bool) -> Result<()> {
    let oauth = session.handle.oauth()?;
    let token = if primary {
        oauth.sign_in().await
    } else {
        oauth.add_account(!public_only).await
    }
    .context("Sign-in failed")?;

    println!("Signed in to {}!", session.handle.git.name());
    println!("  Account: {} ({})", token.name, token.sub);
    println!("  Scopes: {}", token.scopes.join(", "));
    println!(
        "  Repository access: {}",
        if token.repo_full_access {
            "all repositories"
        } else {
            "public repositories"
        }
    );
    if token.is_sponsor {
        println!("  Sponsor: yes");
    }

    Ok(())
}

/// List the repository tree.
async fn cmd_tree(session: &Session, account: Option<&str>) -> Result<()> {
    let token = session.token(account).await?;
    let provider = session.provider();

    let tree = provider
        .get_changes(&token)
        .await
        .context("Failed to list the app-data repository")?;

    println!("Commit {}", tree.commit_sha);
    if tree.entries.is_empty() {
        println!("Repository is empty.");
    }
    for entry in &tree.entries {
        let kind = match entry.entry_type {
            TreeEntryType::Blob => "[FILE]",
            TreeEntryType::Tree => "[DIR] ",
            TreeEntryType::Commit => "[SUB] ",
        };
        let short = entry.sha.get(..7).unwrap_or(&entry.sha);
        println!("  {} {} {}", kind, short, entry.path);
    }

    Ok(())
}

/// Show the commits that touched a file.
async fn cmd_log(session: &Session, account: Option<&str>, path: &str) -> Result<()> {
    let token = session.token(account).await?;
    let provider = session.provider();

    let revisions = provider
        .list_file_revisions(&token, path)
        .await
        .with_context(|| format!("Failed to list revisions of {}", path))?;

    if revisions.is_empty() {
        println!("No revisions.");
    }
    for revision in revisions {
        let date = chrono::DateTime::from_timestamp_millis(revision.created)
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let user = session
            .directory
            .get(&revision.sub)
            .map(|u| u.name)
            .unwrap_or(revision.sub);
        println!("{}  {}  {}", revision.id, date, user);
    }

    Ok(())
}

/// Print the current content of a file.
async fn cmd_cat(
    session: &Session,
    account: Option<&str>,
    path: &str,
    properties: bool,
) -> Result<()> {
    let token = session.token(account).await?;
    let provider = session.provider();

    let content = provider
        .get_file_revision_content(&token, DETACHED_CONTENT_ID, path)
        .await
        .with_context(|| format!("Failed to read {}", path))?;

    if properties {
        println!("---\n{}---", content.properties.trim_start_matches('\n'));
    }
    print!("{}", content.text);

    Ok(())
}

/// Run one sync cycle against a state file.
async fn cmd_sync(session: &Session, account: Option<&str>, state_path: &Path) -> Result<()> {
    let token = session.token(account).await?;
    let provider = session.provider();
    let mut state = load_state(state_path).await?;

    info!(
        "Syncing {} with {}",
        state_path.display(),
        provider.name()
    );
    let report = SyncCycle::new(&provider, &token)
        .run(&mut state)
        .await
        .context("Sync failed")?;
    save_state(state_path, &state).await?;

    println!("Synced at commit {}", report.commit_sha);
    println!("  Remote changes: {}", report.remote_changes);
    println!("  Downloaded: {}", report.downloaded);
    println!("  Uploaded: {}", report.uploaded);
    println!("  Removed: {}", report.removed);
    for failure in &report.failures {
        println!("  FAILED {} ({:?}): {}", failure.path, failure.kind, failure.message);
    }

    if !report.is_clean() {
        anyhow::bail!("{} items failed to sync", report.failures.len());
    }
    Ok(())
}

async fn load_state(path: &Path) -> Result<WorkspaceState> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid workspace state {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(WorkspaceState::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

async fn save_state(path: &Path, state: &WorkspaceState) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
