//! Graph Playground - Microsoft identity OAuth2 playground
//!
//! Signs a user in with the Authorization Code flow, keeps the resulting
//! token, and exercises it against Microsoft Graph.

mod api;
mod auth;
mod commands;
mod config;
mod models;
mod server;
mod storage;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::{GraphClient, RelayRequest};
use crate::auth::usage::DEFAULT_HISTORY_LIMIT;
use crate::auth::{MemoryTokenStore, MemoryUsageLog, TokenLifecycle};
use crate::config::{ConfigurationUpdate, FileConfigStore, MemoryConfig};
use crate::storage::{DataDir, FileTokenStore, FileUsageLog};

#[derive(Parser)]
#[command(name = "graph-playground")]
#[command(about = "OAuth2 Authorization Code playground for Microsoft Graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding config.toml, token.json and usage.json
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Timeout for every outbound HTTP call, in seconds
    #[arg(long, global = true, default_value = "30")]
    timeout_secs: u64,

    /// Port of the local server; also used for the default redirect URI
    #[arg(short, long, global = true, default_value = "3000")]
    port: u16,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the playground HTTP server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Keep configuration and tokens in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Set application registration fields
    Configure(ConfigureArgs),

    /// Show the current configuration
    Config,

    /// Print the sign-in URL
    Login,

    /// Redeem the authorization code from the redirect
    Callback {
        /// `code` query parameter from the redirect
        #[arg(short, long)]
        code: String,

        /// `state` query parameter from the redirect
        #[arg(short, long)]
        state: Option<String>,

        /// Print the raw token response, tokens included
        #[arg(long)]
        show_response: bool,
    },

    /// Show configuration and token status
    Status,

    /// Refresh the stored token
    Refresh {
        #[arg(default_value = "1")]
        id: String,
    },

    /// Revoke the stored token
    Revoke {
        #[arg(default_value = "1")]
        id: String,
    },

    /// Test the stored token against /me
    Test {
        #[arg(default_value = "1")]
        id: String,
    },

    /// Show current user info (verify the token works)
    Whoami,

    /// Show recent token usage
    Usage {
        /// Maximum number of records to show
        #[arg(short, long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },

    /// Show token statistics
    Stats,

    /// Send a request to Graph with the stored token
    Request(RequestArgs),
}

#[derive(Args)]
struct ConfigureArgs {
    #[arg(long)]
    client_id: Option<String>,

    #[arg(long)]
    client_secret: Option<String>,

    #[arg(long)]
    tenant_id: Option<String>,

    /// Identity provider base URL (derived from the tenant when unset)
    #[arg(long)]
    authority: Option<String>,

    #[arg(long)]
    redirect_uri: Option<String>,

    /// Extra scope to request; repeat for several. Replaces the stored list.
    #[arg(long = "scope")]
    scopes: Vec<String>,
}

impl From<ConfigureArgs> for ConfigurationUpdate {
    fn from(args: ConfigureArgs) -> Self {
        ConfigurationUpdate {
            client_id: args.client_id,
            client_secret: args.client_secret,
            tenant_id: args.tenant_id,
            authority: args.authority,
            redirect_uri: args.redirect_uri,
            scopes: (!args.scopes.is_empty()).then_some(args.scopes),
            default_scopes: None,
        }
    }
}

#[derive(Args)]
struct RequestArgs {
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Absolute URL or path relative to https://graph.microsoft.com/v1.0
    url: String,

    /// Header as `Name: value`; repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Value for a `{name}` placeholder as `name=value`; repeatable
    #[arg(short = 'P', long = "param")]
    params: Vec<String>,

    /// Query parameter as `key=value`; repeatable
    #[arg(short, long)]
    query: Vec<String>,

    /// JSON request body (sent for POST, PUT and PATCH)
    #[arg(short, long)]
    data: Option<String>,

    /// Bearer token to use instead of the stored one
    #[arg(long)]
    token: Option<String>,
}

impl RequestArgs {
    fn into_request(self) -> Result<RelayRequest> {
        let body = self.data.map(|data| {
            serde_json::from_str(&data).unwrap_or(serde_json::Value::String(data))
        });
        Ok(RelayRequest {
            method: self.method,
            url: self.url,
            headers: commands::parse_pairs(&self.headers, ':')?,
            body,
            token: self.token,
            path_params: commands::parse_pairs(&self.params, '=')?,
            query: commands::parse_pairs(&self.query, '=')?,
        })
    }
}

fn build_lifecycle(cli: &Cli, ephemeral: bool) -> Result<TokenLifecycle> {
    let http = api::client::http_client(Duration::from_secs(cli.timeout_secs))?;
    let graph = GraphClient::new(http);
    let redirect_uri = server::local_redirect_uri(cli.port);

    if ephemeral {
        tracing::info!("Using in-memory storage");
        return Ok(TokenLifecycle::new(
            Box::new(MemoryConfig::default()),
            Box::new(MemoryTokenStore::new()),
            Box::new(MemoryUsageLog::new()),
            graph,
            redirect_uri,
        ));
    }

    let dir = DataDir::resolve(cli.data_dir.clone())?;
    tracing::debug!("Data directory: {}", dir.root().display());
    let config = FileConfigStore::open(dir.config_path()).context("Failed to load configuration")?;
    let tokens = FileTokenStore::open(dir.token_path()).context("Failed to load token store")?;
    let usage = FileUsageLog::open(dir.usage_path()).context("Failed to load usage log")?;

    Ok(TokenLifecycle::new(
        Box::new(config),
        Box::new(tokens),
        Box::new(usage),
        graph,
        redirect_uri,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let ephemeral = matches!(cli.command, Commands::Serve { ephemeral: true, .. });
    let lifecycle = build_lifecycle(&cli, ephemeral)?;

    match cli.command {
        Commands::Serve { host, .. } => {
            let addr: SocketAddr = format!("{}:{}", host, cli.port)
                .parse()
                .with_context(|| format!("Invalid listen address {}:{}", host, cli.port))?;
            server::serve(Arc::new(lifecycle), addr).await?;
        }
        Commands::Configure(args) => {
            commands::configure(&lifecycle, args.into()).await?;
        }
        Commands::Config => {
            commands::show_config(&lifecycle).await?;
        }
        Commands::Login => {
            tracing::info!("Starting authorization code flow...");
            commands::login(&lifecycle).await?;
        }
        Commands::Callback {
            code,
            state,
            show_response,
        } => {
            commands::callback(&lifecycle, &code, state.as_deref(), show_response).await?;
        }
        Commands::Status => {
            commands::status(&lifecycle).await?;
        }
        Commands::Refresh { id } => {
            commands::refresh(&lifecycle, &id).await?;
        }
        Commands::Revoke { id } => {
            commands::revoke(&lifecycle, &id).await?;
        }
        Commands::Test { id } => {
            commands::test(&lifecycle, &id).await?;
        }
        Commands::Whoami => {
            api::whoami(&lifecycle).await?;
        }
        Commands::Usage { limit } => {
            commands::usage(&lifecycle, limit).await?;
        }
        Commands::Stats => {
            commands::stats(&lifecycle).await?;
        }
        Commands::Request(args) => {
            commands::request(&lifecycle, args.into_request()?).await?;
        }
    }

    Ok(())
}
