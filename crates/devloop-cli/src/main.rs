// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! devloop - keep a local checkout in sync with a running Kubernetes pod.
//!
//! `devloop dev` selects the configured pods, forwards local ports to them and
//! runs a bidirectional file sync into their containers until interrupted.

mod runner;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devloop_common_k8s::{K8sClient, KubeClient};
use devloop_config::{
	ensure_default_config, load_config, paths::workspace_config_path, CliOverrides, DevloopConfig,
	LogFormat, LogLevel, LoggingConfig,
};
use devloop_session::{SessionState, Supervisor};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use runner::DevRunner;

/// devloop - file sync and port forwarding for Kubernetes development
#[derive(Parser, Debug)]
#[command(name = "devloop", version, about, long_about = None)]
struct Args {
	/// Project config file (default: ./devloop.toml)
	#[arg(short, long, global = true)]
	config: Option<PathBuf>,

	/// Namespace to select pods in (overrides config)
	#[arg(short, long, global = true)]
	namespace: Option<String>,

	/// Log level (overrides config)
	#[arg(short, long, global = true)]
	log_level: Option<String>,

	/// Output logs as JSON (overrides config)
	#[arg(long, global = true)]
	json_logs: bool,

	/// Directory holding prebuilt sync agent binaries
	#[arg(long, global = true)]
	agent_dir: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
	/// Start every configured sync and port forward (default)
	Dev,
	/// Write a starter devloop.toml
	Init,
	/// Print the resolved configuration as JSON
	Config,
}

impl From<&Args> for CliOverrides {
	fn from(args: &Args) -> Self {
		Self {
			namespace: args.namespace.clone(),
			log_level: args.log_level.clone(),
			log_format: if args.json_logs {
				Some("json".to_string())
			} else {
				None
			},
			config_file: args.config.clone(),
			agent_binary_dir: args.agent_dir.clone(),
		}
	}
}

fn log_level_to_tracing(level: LogLevel) -> tracing::Level {
	match level {
		LogLevel::Trace => tracing::Level::TRACE,
		LogLevel::Debug => tracing::Level::DEBUG,
		LogLevel::Info => tracing::Level::INFO,
		LogLevel::Warn => tracing::Level::WARN,
		LogLevel::Error => tracing::Level::ERROR,
	}
}

fn init_tracing(logging: &LoggingConfig) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(format!("devloop={}", log_level_to_tracing(logging.level))));

	match logging.format {
		LogFormat::Json => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().json())
				.init();
		}
		LogFormat::Compact => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().compact())
				.init();
		}
		LogFormat::Pretty => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer())
				.init();
		}
	}
}

fn run_init(args: &Args) -> Result<()> {
	let path = match &args.config {
		Some(path) => path.clone(),
		None => workspace_config_path()?,
	};
	if ensure_default_config(&path).context("failed to write config")? {
		println!("Created {}", path.display());
	} else {
		println!("{} already exists, leaving it untouched", path.display());
	}
	Ok(())
}

async fn run_dev(config: DevloopConfig) -> Result<()> {
	let client = KubeClient::new(config.selection.namespace.clone())
		.await
		.context("failed to create Kubernetes client")?;
	let client: Arc<dyn K8sClient> = Arc::new(client);
	info!(namespace = %client.default_namespace(), "connected to cluster");

	let supervisor = Supervisor::new();
	let runner = DevRunner::new(config, client);
	let handles = match runner.start(&supervisor).await {
		Ok(handles) => handles,
		Err(e) => {
			supervisor.shutdown().await;
			return Err(e);
		}
	};
	info!(
		sessions = handles.len(),
		ports = ?runner.arena().ports(),
		"devloop is running, press ctrl+c to stop"
	);

	tokio::select! {
		result = tokio::signal::ctrl_c() => {
			result.context("failed to listen for ctrl+c")?;
			info!("interrupt received, stopping sessions");
		}
		_ = supervisor.wait() => info!("all sessions finished"),
	}
	supervisor.shutdown().await;

	for handle in &handles {
		if handle.state() == SessionState::Error {
			warn!(session = %handle.name(), "session ended with an error");
		}
	}
	Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	let command = args.command.unwrap_or(Command::Dev);

	if command == Command::Init {
		return run_init(&args);
	}

	let config = load_config(CliOverrides::from(&args)).context("failed to load configuration")?;

	match command {
		Command::Config => {
			println!("{}", serde_json::to_string_pretty(&config)?);
			Ok(())
		}
		_ => {
			init_tracing(&config.logging);
			info!(version = env!("CARGO_PKG_VERSION"), "starting devloop");
			run_dev(config).await
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_cli_overrides_from_args() {
		let args = Args::parse_from(["devloop", "dev", "-n", "review", "--json-logs", "-c", "ci.toml"]);
		assert_eq!(args.command, Some(Command::Dev));
		let overrides = CliOverrides::from(&args);
		assert_eq!(overrides.namespace.as_deref(), Some("review"));
		assert_eq!(overrides.log_format.as_deref(), Some("json"));
		assert_eq!(overrides.config_file, Some(PathBuf::from("ci.toml")));
		assert_eq!(overrides.log_level, None);
	}

	#[test]
	fn test_default_command_is_dev() {
		let args = Args::parse_from(["devloop"]);
		assert_eq!(args.command.unwrap_or(Command::Dev), Command::Dev);
	}

	#[test]
	fn test_init_writes_config_once() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("devloop.toml");
		let args = Args::parse_from(["devloop", "init", "--config", path.to_str().unwrap()]);
		run_init(&args).unwrap();
		assert!(path.exists());

		std::fs::write(&path, "# mine\n").unwrap();
		run_init(&args).unwrap();
		assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine\n");
	}
}
