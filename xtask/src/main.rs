use anyhow::Result;
use clap::{Parser, Subcommand};
use sable_core::{telemetry, ChatClient, Session};
use serde_json::json;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Sable")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a lightweight smoke test that exercises the Sable core logic.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    runtime.block_on(async {
        let script = json!([
            {"type": "plan", "content": "Working out what to answer"},
            {"type": "tool_execution", "tool": "search", "result": {"hits": 3}},
            {"type": "reflection", "content": "The search results look sufficient"},
            {"type": "completion", "content": "Here is the answer"},
        ])
        .to_string();

        let session_id = Uuid::new_v4().to_string();
        let client = ChatClient::scripted(vec![script]);
        client
            .initialize_session(Session::new(session_id.clone(), "Smoke session"))
            .await;

        let summary = client.send_turn("ping from xtask", session_id.as_str()).await?;
        info!(
            "appended" = summary.appended,
            "dropped_frames" = summary.dropped_frames,
            "messages" = client.store().messages().len(),
            "smoke turn completed"
        );
        anyhow::Ok(())
    })?;
    Ok(())
}
