//! Conveyor control-plane entry point.
//!
//! `convey serve` starts the REST API and the engine worker pool. Node
//! handlers are registered by the embedding application when Conveyor is
//! used as a library; the bare server executes structural flows and fails
//! task nodes with a configuration error, which is the documented behavior
//! for an unresolved `code_ref`.

mod http;
mod state;

use clap::{Parser, Subcommand};
use conveyor_core::engine::registry::HandlerRegistry;

use crate::http::router::build_router;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "convey", version, about = "Conveyor workflow orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control-plane HTTP server and worker pool.
    Serve {
        /// Listen address (overrides config.toml).
        #[arg(long)]
        listen: Option<String>,

        /// Bridge tracing spans to an OpenTelemetry stdout exporter.
        #[arg(long, default_value_t = false)]
        otel: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { listen, otel } => serve(listen, otel).await,
    }
}

async fn serve(listen: Option<String>, otel: bool) -> anyhow::Result<()> {
    conveyor_observe::tracing_setup::init_tracing(otel)
        .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))?;

    let state = AppState::init(HandlerRegistry::new()).await?;
    let addr = listen.unwrap_or_else(|| state.config.listen_addr.clone());

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = addr.as_str(), "control plane listening");
    axum::serve(listener, router).await?;

    conveyor_observe::tracing_setup::shutdown_tracing();
    Ok(())
}
