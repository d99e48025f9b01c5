//! CLI commands

use anyhow::{Context as _, Result};
use clap::Subcommand;
use latch_core::{FileTokenStore, Role, SessionConfig};
use latch_http::{Navigator, RecordingNavigator, SessionManager};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config;

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and store the session cookies
    Login {
        /// Username or email
        identifier: String,

        /// Account password
        #[arg(long, env = "LATCH_PASSWORD", hide_env_values = true)]
        password: String,

        /// Keep the refresh token for the "remember me" period
        #[arg(long)]
        remember_me: bool,
    },

    /// Drop every stored session cookie
    Logout,

    /// Resolve the stored session and print the auth state
    Status {
        /// Roles the route allows (repeatable); omit for no restriction
        #[arg(long = "allow", value_name = "ROLE")]
        allowed_roles: Vec<String>,
    },

    /// Resolve the session and print how a route would render
    Guard {
        /// Route path, e.g. /client/dashboard
        path: String,

        /// Roles the route allows (repeatable); omit for no restriction
        #[arg(long = "allow", value_name = "ROLE")]
        allowed_roles: Vec<String>,
    },

    /// Force one token refresh
    Refresh,

    /// Keep a session mounted, refreshing before expiry, until Ctrl-C
    Watch {
        /// Roles the route allows (repeatable); omit for no restriction
        #[arg(long = "allow", value_name = "ROLE")]
        allowed_roles: Vec<String>,
    },

    /// Configuration file operations
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Generate a default configuration file
    Init {
        /// Output file path (defaults to <data-dir>/latch.json)
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    Show,
}

/// Everything a command needs from the global flags
pub struct Context {
    pub data_dir: PathBuf,
    pub config: SessionConfig,
}

fn roles(allowed: Vec<String>) -> Option<Vec<Role>> {
    (!allowed.is_empty()).then(|| allowed.into_iter().map(Role::new).collect())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl Commands {
    /// Commands that run until interrupted and must not be timed out
    pub const fn is_long_running(&self) -> bool {
        matches!(self, Self::Watch { .. })
    }

    pub async fn execute(self, ctx: Context) -> Result<()> {
        if let Self::Config { command } = self {
            return command.execute(&ctx);
        }

        let (manager, navigator) = session(&ctx)?;

        match self {
            Self::Login {
                identifier,
                password,
                remember_me,
            } => {
                let response = manager.login(&identifier, &password, remember_me).await?;
                print_json(&json!({
                    "role": response.role,
                    "is_talentrise": response.is_talentrise,
                    "remember_me": remember_me,
                }))
            }
            Self::Logout => {
                manager.logout();
                print_json(&navigator.location())
            }
            Self::Status { allowed_roles } => {
                let roles = roles(allowed_roles);
                let state = manager.resolve(roles.as_deref()).await;
                print_json(&state)
            }
            Self::Guard {
                path,
                allowed_roles,
            } => {
                let roles = roles(allowed_roles);
                let decision = manager.authorize(&path, roles.as_deref()).await;
                print_json(&json!({
                    "decision": decision,
                    "location": navigator.location(),
                }))
            }
            Self::Refresh => {
                manager
                    .refresh()
                    .await
                    .context("refresh failed, session has been cleared")?;
                info!("Access token refreshed");
                print_json(&json!({ "refreshed": true }))
            }
            Self::Watch { allowed_roles } => watch(&manager, roles(allowed_roles)).await,
            Self::Config { command } => command.execute(&ctx),
        }
    }
}

fn session(ctx: &Context) -> Result<(SessionManager, Arc<RecordingNavigator>)> {
    let jar = config::cookie_jar_path(&ctx.data_dir);
    let store = Arc::new(
        FileTokenStore::open(&jar)
            .with_context(|| format!("failed to open cookie jar {}", jar.display()))?,
    );
    let navigator = Arc::new(RecordingNavigator::new());
    let manager = SessionManager::new(ctx.config.clone(), store, navigator.clone())?;
    Ok((manager, navigator))
}

async fn watch(manager: &SessionManager, allowed_roles: Option<Vec<Role>>) -> Result<()> {
    let mount = manager.mount(allowed_roles);
    let mut updates = mount.subscribe();
    info!(
        interval = ?manager.config().monitor_interval(),
        "Session mounted, press Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                print_json(&state)?;
            }
        }
    }

    info!("Unmounting session");
    drop(mount);
    Ok(())
}

impl ConfigCommands {
    pub fn execute(self, ctx: &Context) -> Result<()> {
        match self {
            Self::Init { output } => {
                let path = output.unwrap_or_else(|| config::default_config_path(&ctx.data_dir));
                create_parent(&path)?;
                config::generate_default_config(&path)?;
                info!("Generated configuration at {}", path.display());
                Ok(())
            }
            Self::Show => print_json(&ctx.config),
        }
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
