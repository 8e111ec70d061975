//! `spark-runner`：托管单个流水线组件的服务进程。
//!
//! # 子命令
//!
//! - `run`：按服务设置装配组件、启动管理面，并在 `engine_autostart` 时启动引擎；
//!   收到 `POST /admin/shutdown` 或 `ctrl-c` 后停止引擎并退出；
//! - `admin`：调用运行中进程的管理面。
//!
//! # 环境变量
//!
//! - `SPARK_SETTINGS_PATH`：设置文件路径（等价于 `run --settings`）；
//! - `SPARK_RUNNER_<FIELD>`：覆盖设置文件中的同名字段；
//! - `RUST_LOG`：覆盖 `log_level`。

mod client;
mod logging;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use spark_runner::{ComponentRegistry, ComponentResolver, Manager, ServiceSettings, admin};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::client::AdminClient;

#[derive(Parser, Debug)]
#[command(name = "spark-runner", version, about = "Host a byte-processing pipeline component")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host the configured component until shut down
    Run {
        /// Service settings file (TOML)
        #[arg(short, long, env = "SPARK_SETTINGS_PATH")]
        settings: Option<PathBuf>,
    },
    /// Send a command to a running service
    Admin {
        /// Base URL of the admin interface
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        url: String,

        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
enum AdminAction {
    /// Print the status snapshot
    Status,
    /// Start the engine
    Start,
    /// Stop the engine
    Stop,
    /// Stop the engine and terminate the process
    Shutdown,
    /// Apply a configuration update read from a TOML file
    Reconfigure {
        file: PathBuf,
        /// Write the merged configuration back to its file
        #[arg(long)]
        persist: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Run { settings } => run(settings).await,
        Command::Admin { url, action } => admin_command(&url, action).await,
    }
}

async fn run(settings_path: Option<PathBuf>) -> Result<()> {
    let settings = ServiceSettings::load(settings_path.as_deref())
        .context("failed to load service settings")?;
    logging::init(&settings)?;
    info!(
        component = %settings.component_type,
        component_id = settings.component_id(),
        "spark-runner starting"
    );

    let resolver = ComponentResolver::new(spark_components::bundled()?, ComponentRegistry::new());
    let manager = Arc::new(Manager::bootstrap(settings, &resolver)?);

    let bind_addr = manager.settings().http_bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind admin interface on {bind_addr}"))?;
    let mut server = tokio::spawn(admin::serve(listener, Arc::clone(&manager)));

    let autostart = {
        let manager = Arc::clone(&manager);
        tokio::task::spawn_blocking(move || manager.autostart()).await?
    };
    match autostart {
        Ok(Some(reply)) => info!(message = %reply.message, "autostart"),
        Ok(None) => {}
        Err(err) => error!(code = err.code(), error = %err, "engine autostart failed"),
    }

    let signal = manager.shutdown_signal();
    tokio::select! {
        () = signal.wait() => info!("shutdown requested"),
        interrupted = tokio::signal::ctrl_c() => {
            interrupted.context("failed to listen for ctrl-c")?;
            info!("interrupt received, shutting down");
            let manager = Arc::clone(&manager);
            let reply = tokio::task::spawn_blocking(move || manager.shutdown()).await??;
            if !reply.ok {
                warn!(message = %reply.message, "shutdown completed with warnings");
            }
        }
        served = &mut server => {
            let manager = Arc::clone(&manager);
            tokio::task::spawn_blocking(move || manager.shutdown()).await??;
            served?.context("admin interface failed")?;
            anyhow::bail!("admin interface exited unexpectedly");
        }
    }

    server.await?.context("admin interface failed")?;
    info!("spark-runner stopped");
    Ok(())
}

async fn admin_command(url: &str, action: AdminAction) -> Result<()> {
    let client = AdminClient::new(url);
    let body = match action {
        AdminAction::Status => client.status().await?,
        AdminAction::Start => client.command("start").await?,
        AdminAction::Stop => client.command("stop").await?,
        AdminAction::Shutdown => client.command("shutdown").await?,
        AdminAction::Reconfigure { file, persist } => {
            let update = client::read_update(&file)?;
            client.reconfigure(update, persist).await?
        }
    };
    print_body(&body);
    Ok(())
}

fn print_body(body: &Value) {
    match body.get("message").and_then(Value::as_str) {
        Some(message) if body.get("ok").is_some() => println!("{message}"),
        _ => println!(
            "{}",
            serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string())
        ),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn admin_reconfigure_parses_file_and_persist() {
        let cli = Cli::try_parse_from([
            "spark-runner",
            "admin",
            "--url",
            "http://10.0.0.2:9000",
            "reconfigure",
            "update.toml",
            "--persist",
        ])
        .unwrap();
        match cli.command {
            Command::Admin { url, action } => {
                assert_eq!(url, "http://10.0.0.2:9000");
                assert_eq!(
                    action,
                    AdminAction::Reconfigure {
                        file: PathBuf::from("update.toml"),
                        persist: true,
                    }
                );
            }
            other => panic!("期望 admin 子命令，实际为 {other:?}"),
        }
    }

    #[test]
    fn run_accepts_settings_path() {
        let cli = Cli::try_parse_from(["spark-runner", "run", "--settings", "svc.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Run { settings: Some(ref path) } if path == &PathBuf::from("svc.toml")
        ));
    }
}
