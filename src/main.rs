use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use apiary::api::ProfileUpdate;
use apiary::config::{ClientConfig, ConfigError, ServerConfig, normalize_base_url};
use apiary::server::{self, ServerError};
use apiary::storage::{PersistedSession, load_session};
use apiary::{
    ApiError, Bootstrapper, FileStorage, HttpIdentityClient, SessionError, SessionSnapshot, SessionStore,
};
use clap::{Parser, Subcommand};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{}", .0.reason())]
    Api(#[from] ApiError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("not logged in; run `apiary login` first")]
    NotLoggedIn,
    #[error("nothing to update; pass --name and/or --avatar")]
    EmptyUpdate,
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "apiary", about = "Apiary storefront admin session tool")]
struct Cli {
    #[arg(long, env = "APIARY_API_URL")]
    api_url: Option<String>,

    #[arg(long, env = "APIARY_SESSION_DIR")]
    session_dir: Option<PathBuf>,

    /// Timeout for each request to the identity service.
    #[arg(long, env = "APIARY_REQUEST_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in with email and password and persist the session.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "APIARY_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Revalidate the persisted session and print the current user.
    Whoami,
    /// Edit the logged-in user's profile.
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        avatar: Option<String>,
    },
    /// Revoke and forget the persisted session.
    Logout,
    /// Run the reference identity server.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        accounts: Option<PathBuf>,
    },
}

struct ClientContext {
    storage: Arc<FileStorage>,
    store: SessionStore,
    api: HttpIdentityClient,
    verify_timeout: Duration,
}

impl ClientContext {
    fn new(cli: &Cli) -> Result<Self, CliError> {
        let mut config = ClientConfig::from_env()?;
        if let Some(url) = &cli.api_url {
            config.api_base_url = normalize_base_url(url);
        }
        if let Some(dir) = &cli.session_dir {
            config.session_dir.clone_from(dir);
        }
        if let Some(secs) = cli.timeout_secs {
            config.timeouts.request_secs = secs;
        }

        let storage = Arc::new(FileStorage::new(&config.session_dir));
        let store = SessionStore::new(storage.clone());
        let api = HttpIdentityClient::from_config(&config)?;
        Ok(Self { storage, store, api, verify_timeout: Duration::from_secs(config.timeouts.request_secs) })
    }

    async fn bootstrap(&self) -> SessionSnapshot {
        Bootstrapper::new(self.store.clone(), self.api.clone())
            .with_verify_timeout(self.verify_timeout)
            .run()
            .await;
        self.store.current_session()
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Serve { port, accounts } => run_serve(*port, accounts.clone()).await,
        Command::Login { email, password } => run_login(&ClientContext::new(&cli)?, email, password).await,
        Command::Whoami => run_whoami(&ClientContext::new(&cli)?).await,
        Command::Profile { name, avatar } => {
            let update = ProfileUpdate { name: name.clone(), avatar: avatar.clone() };
            run_profile(&ClientContext::new(&cli)?, update).await
        }
        Command::Logout => run_logout(&ClientContext::new(&cli)?).await,
    }
}

async fn run_serve(port: Option<u16>, accounts: Option<PathBuf>) -> Result<(), CliError> {
    let mut config = ServerConfig::from_env()?;
    if let Some(port) = port {
        config.port = port;
    }
    if accounts.is_some() {
        config.accounts_path = accounts;
    }
    server::serve(config).await?;
    Ok(())
}

async fn run_login(ctx: &ClientContext, email: &str, password: &str) -> Result<(), CliError> {
    let session = ctx.api.login(email, password).await?;
    ctx.store.login(session.token, session.user.clone());
    println!("{}", serde_json::to_string_pretty(&session.user)?);
    Ok(())
}

async fn run_whoami(ctx: &ClientContext) -> Result<(), CliError> {
    let snapshot = ctx.bootstrap().await;
    let user = snapshot.user().ok_or(CliError::NotLoggedIn)?;
    println!("{}", serde_json::to_string_pretty(user)?);
    Ok(())
}

async fn run_profile(ctx: &ClientContext, update: ProfileUpdate) -> Result<(), CliError> {
    if update.is_empty() {
        return Err(CliError::EmptyUpdate);
    }
    let session = ctx.bootstrap().await.session.ok_or(CliError::NotLoggedIn)?;
    let user = ctx.api.update_profile(&session.token, &update).await?;
    ctx.store.update_user(user.clone())?;
    println!("{}", serde_json::to_string_pretty(&user)?);
    Ok(())
}

async fn run_logout(ctx: &ClientContext) -> Result<(), CliError> {
    if let PersistedSession::Present(session) = load_session(ctx.storage.as_ref()) {
        if let Err(e) = ctx.api.logout(&session.token).await {
            tracing::warn!(error = %e, "server-side logout failed; clearing local session anyway");
        }
    }
    ctx.store.logout();
    println!("logged out");
    Ok(())
}
