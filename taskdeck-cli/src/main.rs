//! Taskdeck CLI - Command-line client for Taskdeck accounts
//!
//! Signs in against the configured identity backend and prints what the
//! session store knows: identity, profile, roles and the derived flags.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use taskdeck_auth::{create_identity_service, AuthSnapshot, Metadata, Role, SessionStore};
use taskdeck_core::{init_logging, TaskdeckConfig};
use tracing::{debug, info};

/// How long to wait for a sign-in to reach the store
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "taskdeck")]
#[command(about = "Sign in to Taskdeck and inspect sessions and roles")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Clone)]
struct Credentials {
    /// Sign in with this email before running the command
    #[arg(long)]
    email: Option<String>,

    #[arg(long, requires = "email")]
    password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and print the resulting session state
    Login {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,
    },

    /// Create an account
    Register {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        #[arg(long)]
        first_name: Option<String>,

        #[arg(long)]
        last_name: Option<String>,

        /// Team or department
        #[arg(long)]
        category: Option<String>,
    },

    /// Print the current session state
    Whoami {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Sign out
    Logout,

    /// Record an invitation for a new member (team lead or above)
    Invite {
        /// Address to invite
        invitee: String,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Grant or revoke a role (admin only)
    Grant {
        /// Identity id of the member
        identity_id: String,

        /// user, team_lead, project_manager or admin
        role: Role,

        /// Remove the role instead of adding it
        #[arg(long)]
        revoke: bool,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting Taskdeck CLI v{}", env!("CARGO_PKG_VERSION"));

    if let Commands::Config {
        show,
        init,
        validate,
    } = cli.command
    {
        return handle_config(&config, show, init, validate);
    }

    if let Err(e) = config.validate() {
        e.log();
        return Err(e).context("Invalid configuration");
    }
    let service = create_identity_service(&config)?;
    let store = SessionStore::connect(service).await?;
    store.wait_until_loaded().await?;

    match cli.command {
        Commands::Login { email, password } => {
            let snapshot = sign_in(&store, &email, &password).await?;
            print_snapshot(&snapshot)?;
        }
        Commands::Register {
            email,
            password,
            first_name,
            last_name,
            category,
        } => {
            let mut metadata = Metadata::new();
            for (key, value) in [
                ("first_name", first_name),
                ("last_name", last_name),
                ("category", category),
            ] {
                if let Some(value) = value {
                    metadata.insert(key.to_string(), value.into());
                }
            }

            store.register(&email, &password, metadata).await?;
            match settle(&store).await {
                Ok(snapshot) => print_snapshot(&snapshot)?,
                Err(_) => println!("Account created. Confirm your email, then sign in."),
            }
        }
        Commands::Whoami { credentials } => {
            let snapshot = signed_in(&store, &credentials).await?;
            print_snapshot(&snapshot)?;
        }
        Commands::Logout => {
            store.terminate().await?;
            println!("Signed out");
        }
        Commands::Invite {
            invitee,
            credentials,
        } => {
            signed_in(&store, &credentials).await?;
            let invitation = store.invite_member(&invitee)?;
            println!("{}", serde_json::to_string_pretty(&invitation)?);
        }
        Commands::Grant {
            identity_id,
            role,
            revoke,
            credentials,
        } => {
            signed_in(&store, &credentials).await?;
            if revoke {
                store.revoke_role(&identity_id, role).await?;
                println!("Revoked {} from {}", role, identity_id);
            } else {
                store.grant_role(&identity_id, role).await?;
                println!("Granted {} to {}", role, identity_id);
            }
        }
        Commands::Config { .. } => unreachable!("handled before connecting"),
    }

    store.shutdown();
    Ok(())
}

fn load_config(config_path: Option<&PathBuf>) -> anyhow::Result<TaskdeckConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from {:?}", path);
        return Ok(TaskdeckConfig::from_file(path)?);
    }

    for path in TaskdeckConfig::default_paths() {
        if path.exists() {
            debug!("Loading configuration from {:?}", path);
            return Ok(TaskdeckConfig::from_file(&path)?);
        }
    }

    debug!("No configuration file found, using defaults");
    Ok(TaskdeckConfig::default())
}

fn handle_config(
    config: &TaskdeckConfig,
    show: bool,
    init: bool,
    validate: bool,
) -> anyhow::Result<()> {
    if init {
        let config_path = TaskdeckConfig::default_paths()
            .into_iter()
            .next()
            .context("No configuration directory available")?;
        if config_path.exists() {
            bail!("Configuration already exists at {:?}", config_path);
        }
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        TaskdeckConfig::default().save_to_file(&config_path)?;
        println!("Configuration initialized at: {:?}", config_path);
    }

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    if validate {
        config.validate()?;
        println!("Configuration is valid");
    }

    Ok(())
}

/// Sign in with `credentials` when given, otherwise require a restored session
async fn signed_in(store: &SessionStore, credentials: &Credentials) -> anyhow::Result<AuthSnapshot> {
    match (&credentials.email, &credentials.password) {
        (Some(email), Some(password)) => sign_in(store, email, password).await,
        (Some(_), None) => bail!("--password is required with --email"),
        _ => {
            if store.session().is_none() {
                bail!("Not signed in. Pass --email and --password, or run `taskdeck login`.");
            }
            Ok(store.refresh().await?)
        }
    }
}

async fn sign_in(store: &SessionStore, email: &str, password: &str) -> anyhow::Result<AuthSnapshot> {
    store.authenticate(email, password).await?;
    settle(store).await
}

/// Wait for the session to land, then load profile and roles in place
async fn settle(store: &SessionStore) -> anyhow::Result<AuthSnapshot> {
    tokio::time::timeout(SETTLE_TIMEOUT, store.wait_for(AuthSnapshot::is_authenticated))
        .await
        .context("Timed out waiting for the session")??;
    Ok(store.refresh().await?)
}

fn print_snapshot(snapshot: &AuthSnapshot) -> anyhow::Result<()> {
    debug!("{}", snapshot.summary());
    let view = json!({
        "authenticated": snapshot.is_authenticated(),
        "identity": snapshot.identity.as_ref().map(|identity| json!({
            "id": identity.id,
            "email": identity.email,
        })),
        "expires_at": snapshot.session.as_ref().map(|session| session.expires_at),
        "profile": snapshot.profile,
        "roles": snapshot.roles,
        "highest_role": snapshot.roles.highest(),
        "is_admin": snapshot.is_admin(),
        "is_project_manager": snapshot.is_project_manager(),
        "is_team_lead": snapshot.is_team_lead(),
    });

    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
