//! Pagewright CLI and REST API entry point.
//!
//! Binary name: `pagewright`
//!
//! Parses CLI arguments, initializes storage and the build loop, then
//! dispatches to the appropriate command handler or starts the REST API
//! server.

mod cli;
mod http;
mod state;
mod turn;

use anyhow::Context;
use clap::Parser;
use clap_complete::generate;

use pagewright_core::build::store::BuildSessionStore;
use pagewright_observe::tracing_setup::{
    filter_for_verbosity, init_tracing, otel_requested, shutdown_tracing,
};

use cli::{BuildCommand, Cli, Commands, ProjectCommand};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet && cli.verbose == 0 {
        "error"
    } else {
        filter_for_verbosity(cli.verbose)
    };
    init_tracing(filter, otel_requested())
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "pagewright", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    match cli.command {
        Commands::Project { action } => match action {
            ProjectCommand::Create { name, description } => {
                cli::project::create_project(&state, name, description, cli.json).await?;
            }
            ProjectCommand::List { order, limit } => {
                cli::project::list_projects(&state, &order, limit, cli.json).await?;
            }
            ProjectCommand::Show { id } => {
                cli::project::show_project(&state, &id, cli.json).await?;
            }
        },

        Commands::Build { action } => match action {
            BuildCommand::Status { id } => {
                cli::build::build_status(&state, &id, cli.json).await?;
            }
            BuildCommand::History { id } => {
                cli::build::build_history(&state, &id, cli.json).await?;
            }
            BuildCommand::Reset { id, force } => {
                cli::build::build_reset(&state, &id, force, cli.json).await?;
            }
            BuildCommand::Send {
                id,
                message,
                mode,
                step,
                substep,
            } => {
                let request = cli::build::turn_request(message, mode, step, substep)?;
                cli::build::build_send(&state, &id, request, cli.json, cli.quiet).await?;
            }
        },

        Commands::Serve { port, host } => {
            state
                .sessions
                .purge_expired()
                .await
                .context("failed to purge expired build sessions")?;

            if let Err(reason) = state.require_build_loop() {
                tracing::warn!("{reason}");
            }

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("cannot bind {addr}"))?;

            if !cli.quiet {
                println!(
                    "  {} Pagewright API listening on {}",
                    console::style("⚡").bold(),
                    console::style(format!("http://{addr}")).cyan()
                );
                println!("  {}", console::style("Press Ctrl+C to stop").dim());
            }

            let router = http::router::build_router(state);
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            if !cli.quiet {
                println!("\n  Server stopped.");
            }
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
