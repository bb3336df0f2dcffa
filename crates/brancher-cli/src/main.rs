//! auto-brancher - create a downstream branch for every published package
//!
//! ## Commands
//!
//! - `handle`: process one envelope from a file or stdin and print outcomes
//! - `serve`: run the serverless runtime loop
//! - `resolve`: print the branch name for a package and version

mod runtime;

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use brancher_core::metrics::METRICS;
use brancher_core::{
    init_tracing, requires_redelivery, BaseRef, BrancherConfig, BranchResolver, GitCli,
    LogFormat, NotificationHandler, Outcome, PublishEvent,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use secret_store::{EnvSecretStore, ExtensionSecretStore, FileSecretStore, SecretStore};
use tracing::{info, warn, Level};

use crate::runtime::RuntimeClient;

#[derive(Parser)]
#[command(name = "auto-brancher")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Create a branch in a downstream repository for each published package", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle one envelope and print one JSON outcome per record
    Handle {
        /// Envelope file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        event: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Poll the serverless runtime API and handle invocations until killed
    Serve {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Print the branch a package and version resolve to
    Resolve {
        #[arg(short, long)]
        package: String,

        #[arg(short = 'V', long)]
        version: String,

        /// Base branch override
        #[arg(long, env = "BRANCHER_BASE_REF")]
        base_ref: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SecretBackend {
    /// Local parameters-and-secrets HTTP extension
    Extension,
    /// One file per secret under --secret-dir
    File,
    /// Environment variables
    Env,
}

/// Settings shared by `handle` and `serve`.
#[derive(Args, Debug)]
struct RunArgs {
    /// SSH URL of the downstream repository
    #[arg(long, env = "REPOSITORY")]
    repository: Option<String>,

    /// Secret id of the deploy key
    #[arg(long, env = "SECRET_ID")]
    secret_id: Option<String>,

    /// Wall-clock budget per invocation, in seconds
    #[arg(long, env = "BRANCHER_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Base branch override (default: the remote's HEAD)
    #[arg(long, env = "BRANCHER_BASE_REF")]
    base_ref: Option<String>,

    /// Parent directory for workspaces and key files
    #[arg(long, env = "BRANCHER_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    /// Pinned known_hosts file; enables strict host key checking
    #[arg(long, env = "BRANCHER_KNOWN_HOSTS")]
    known_hosts: Option<PathBuf>,

    /// git binary
    #[arg(long, env = "BRANCHER_GIT")]
    git: Option<String>,

    /// Where the deploy key is read from
    #[arg(long, value_enum, env = "BRANCHER_SECRET_BACKEND", default_value = "extension")]
    secret_backend: SecretBackend,

    /// Directory for the file backend
    #[arg(long, env = "BRANCHER_SECRET_DIR")]
    secret_dir: Option<PathBuf>,

    /// Variable prefix for the env backend
    #[arg(long, env = "BRANCHER_SECRET_ENV_PREFIX")]
    secret_env_prefix: Option<String>,
}

impl RunArgs {
    fn config(&self) -> Result<BrancherConfig> {
        let repository = self
            .repository
            .as_deref()
            .context("REPOSITORY is not set; pass --repository")?;

        let mut config = BrancherConfig::new(repository);
        if let Some(secret_id) = &self.secret_id {
            config = config.with_secret_id(secret_id);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(base_ref) = &self.base_ref {
            config = config.with_base_ref(base_ref);
        }
        if let Some(root) = &self.workspace_root {
            config = config.with_workspace_root(root.clone());
        }
        if let Some(known_hosts) = &self.known_hosts {
            config = config.with_known_hosts(known_hosts.clone());
        }
        if let Some(git) = &self.git {
            config = config.with_git_program(git);
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn secret_store(&self) -> Result<Arc<dyn SecretStore>> {
        let store: Arc<dyn SecretStore> = match self.secret_backend {
            SecretBackend::Extension => Arc::new(
                ExtensionSecretStore::from_env()
                    .context("Failed to build the secrets extension client")?,
            ),
            SecretBackend::File => {
                let dir = self
                    .secret_dir
                    .clone()
                    .context("--secret-dir is required with --secret-backend file")?;
                Arc::new(FileSecretStore::new(dir))
            }
            SecretBackend::Env => Arc::new(match &self.secret_env_prefix {
                Some(prefix) => EnvSecretStore::with_prefix(prefix),
                None => EnvSecretStore::new(),
            }),
        };
        Ok(store)
    }

    async fn handler(&self) -> Result<NotificationHandler> {
        let config = self.config()?;
        let store = self.secret_store()?;
        let git = GitCli::new(&config.git_program);
        if !git.is_available().await {
            bail!("git binary '{}' is not runnable", git.program());
        }
        info!(
            repository = %config.repository,
            secret_backend = store.backend(),
            timeout_secs = config.timeout.as_secs(),
            base = %config.base(),
            "auto-brancher configured"
        );
        Ok(NotificationHandler::new(config, store, Arc::new(git)))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_tracing(format, level);

    match cli.command {
        Commands::Handle { event, run } => cmd_handle(&event, &run).await,
        Commands::Serve { run } => cmd_serve(&run).await,
        Commands::Resolve {
            package,
            version,
            base_ref,
        } => cmd_resolve(&package, &version, base_ref.as_deref()),
    }
}

async fn cmd_handle(event: &str, run: &RunArgs) -> Result<ExitCode> {
    let raw = read_event(event)?;
    let handler = run.handler().await?;

    let outcomes = handler.handle_batch(&raw).await;
    for outcome in &outcomes {
        println!("{}", serde_json::to_string(outcome)?);
    }
    METRICS.flush();

    Ok(ExitCode::from(exit_status(&outcomes)))
}

async fn cmd_serve(run: &RunArgs) -> Result<ExitCode> {
    let client = RuntimeClient::from_env()?;
    let handler = run.handler().await?;
    let timeout = handler.config().timeout;
    info!("waiting for invocations");

    loop {
        let invocation = client.next_invocation().await?;
        let budget = invocation.budget(timeout, chrono::Utc::now());
        let outcomes = handler.handle_batch_within(&invocation.body, budget).await;

        let posted = if requires_redelivery(&outcomes) {
            client.post_error(&invocation.request_id, &outcomes).await
        } else {
            client.post_response(&invocation.request_id, &outcomes).await
        };
        if let Err(e) = posted {
            warn!(request_id = %invocation.request_id, error = %format!("{e:#}"), "could not report invocation result");
        }
        METRICS.flush();
    }
}

fn cmd_resolve(package: &str, version: &str, base_ref: Option<&str>) -> Result<ExitCode> {
    let base = match base_ref {
        Some(name) => BaseRef::Named(name.to_string()),
        None => BaseRef::RemoteDefault,
    };
    let spec = BranchResolver::new(base)
        .resolve(&PublishEvent::new(package, version))
        .with_context(|| format!("Cannot resolve {package}@{version}"))?;
    println!("{}", serde_json::to_string_pretty(&spec)?);
    Ok(ExitCode::SUCCESS)
}

fn read_event(source: &str) -> Result<String> {
    if source == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read envelope from stdin")?;
        Ok(raw)
    } else {
        std::fs::read_to_string(source).with_context(|| format!("Failed to read envelope {source}"))
    }
}

/// 1 when any record should be redelivered, 0 otherwise.
fn exit_status(outcomes: &[Outcome]) -> u8 {
    u8::from(requires_redelivery(outcomes))
}
