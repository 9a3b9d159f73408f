// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod cli;
pub mod config;
mod error;
mod kubernetes;
mod output;
pub mod progress;
mod session;
mod shutdown;
mod tunnel;

use anyhow::{Result, anyhow};
use clap::{CommandFactory, Parser};
use console::style;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::prelude::*;

use cli::Args;
use config::Settings;
use error::TunnelError;
use kubernetes::{KubeGateway, NodeSelector};
use session::SessionIdentity;
use tunnel::{KubectlPortForward, PtyShell, RelaySessionController, RelaySettings, TokioDelay, TunnelManager};

/// Initialize logging to a rolling file and a compact stderr layer
fn init_logging(verbose: bool) {
    use tracing_rolling_file::{RollingConditionBase, RollingFileAppenderBase};
    use tracing_subscriber::fmt::format::FmtSpan;

    let filter = if verbose {
        "k8s_node_ssh=debug"
    } else {
        "k8s_node_ssh=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .without_time()
        .with_target(verbose)
        .with_span_events(FmtSpan::NONE);

    let log_dir = config::base_dir()
        .map(|p| p.join("log"))
        .unwrap_or_else(|_| std::path::PathBuf::from("."));

    // File output is optional; stderr still works without it
    let file_layer = std::fs::create_dir_all(&log_dir)
        .map_err(|e| eprintln!("Warning: Could not create log directory: {}", e))
        .ok()
        .and_then(|_| {
            // 10MB per file, 5 files, also rotated daily
            let condition = RollingConditionBase::new()
                .daily()
                .max_size(10 * 1024 * 1024);
            RollingFileAppenderBase::new(log_dir.join("k8s-node-ssh.log"), condition, 5)
                .map_err(|e| eprintln!("Warning: Could not create log file: {}", e))
                .ok()
        })
        .map(|appender| {
            let (non_blocking, guard) = appender.get_non_blocking_appender();
            // Leak the guard to keep the background writer alive
            std::mem::forget(guard);
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_span_events(FmtSpan::NONE)
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if !args.has_action() {
        let _ = Args::command().print_help();
        return ExitCode::FAILURE;
    }

    init_logging(args.verbose);

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

/// Print a single-line error, plus the node list when a node was not found
fn report(err: &anyhow::Error) -> ExitCode {
    eprintln!("{} {:#}", style("error:").red().bold(), err);

    let Some(tunnel_err) = err.downcast_ref::<TunnelError>() else {
        return ExitCode::FAILURE;
    };
    if let TunnelError::NodeNotFound { available, .. } = tunnel_err {
        eprintln!("{}", output::TableFormatter::format(available));
    }
    u8::try_from(tunnel_err.exit_code())
        .map(ExitCode::from)
        .unwrap_or(ExitCode::FAILURE)
}

async fn run(args: &Args) -> Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    if std::env::var_os("KUBECONFIG").is_none() {
        return Err(TunnelError::MissingKubeconfig.into());
    }

    let settings = Settings::load()?.apply(args.overrides());
    let identity = SessionIdentity::generate(&settings.namespace, &settings.name_prefix);
    debug!(namespace = %identity.namespace(), pod = %identity.service_name(), "Session");

    let client = kubernetes::connect(args.context.as_deref()).await?;
    let gateway = Arc::new(KubeGateway::new(client));
    let delay = Arc::new(TokioDelay);
    let relay = RelaySessionController::new(
        gateway.clone(),
        Arc::new(KubectlPortForward::new(args.context.clone())),
        Arc::new(PtyShell::new()),
        delay.clone(),
        RelaySettings::from(&settings),
    );
    let manager = TunnelManager::new(gateway, relay, identity, settings, delay);

    if let Some(token) = &args.connect {
        let exit = manager
            .connect(&NodeSelector::parse(token), shutdown::shutdown_signal())
            .await?;
        info!(code = exit.code, "Connection closed");
    }

    if args.destroy {
        manager.destroy().await?;
        println!(
            "{} namespace {}",
            style("Destroyed").green(),
            manager.identity().namespace()
        );
    }

    if args.init {
        manager.initialize().await?;
        println!(
            "{} namespace {}",
            style("Initialized").green(),
            manager.identity().namespace()
        );
    }

    if args.list {
        let nodes = manager.list().await?;
        println!("{}", output::format_nodes(&nodes, &args.output));
    }

    Ok(())
}
