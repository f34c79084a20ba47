//! Chat REPL
//!
//! Interactive terminal client for the chat conductor. Reads one message per
//! line from stdin and prints the streamed response.
//!
//! # Usage
//!
//! ```bash
//! CHAT_ENGINE_ENDPOINT=https://agents.example.com/api \
//! CHAT_ENGINE_API_KEY=... CHAT_AGENT_ID=asst_123 CHAT_RLS_USER_ID=user-42 \
//!     chat-repl
//!
//! # With verbose logging
//! RUST_LOG=debug chat-repl
//! ```
//!
//! # Environment Variables
//!
//! - `CHAT_RLS_USER_ID`: RLS principal sent with every message (required)
//! - `CHAT_SESSION_ID`: Session to continue (default: `default`)
//! - `CHAT_ENGINE_*`, `CHAT_AGENT_ID`, `CHAT_*`: see the `config` module
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Commands
//!
//! - `/clear`: Drop the session's thread and start over
//! - `/quit`: Exit

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::info;

use chat_conductor_core::{
    load_config, AgentsClient, ChatConductor, ChatRequest, CompletionEngine, SessionId,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_repl=info".parse()?)
                .add_directive("chat_conductor_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let loaded = load_config()?;
    if let Some(ref path) = loaded.config_file_path {
        info!(path = %path.display(), "Loaded config file");
    }

    let client = AgentsClient::new(loaded.engine)?;
    let agent = client
        .configured_agent()
        .ok_or_else(|| anyhow::anyhow!("No agent configured. Set CHAT_AGENT_ID or [engine].agent_id"))?;
    info!(engine = client.name(), agent_id = %agent.id, "Chat REPL starting");

    let conductor = ChatConductor::with_engine(loaded.chat, Arc::new(client), agent);
    let session = std::env::var("CHAT_SESSION_ID")
        .map(SessionId::new)
        .unwrap_or_default();
    let rls_user_id = std::env::var("CHAT_RLS_USER_ID").ok();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/clear" => {
                conductor.clear_session_thread(&session).await;
                stdout.write_all(b"(session cleared)\n").await?;
                continue;
            }
            _ => {}
        }

        let mut request = ChatRequest::new(line).with_session(session.clone());
        request.rls_user_id.clone_from(&rls_user_id);

        let mut responses = conductor.process_chat_message(request);
        while let Some(response) = responses.next().await {
            if let Some(text) = response.content {
                stdout.write_all(text.replace("</br>", "\n").as_bytes()).await?;
            }
            if let Some(file) = response.file_info {
                let name = file.file_name.as_deref().unwrap_or(&file.file_id);
                stdout.write_all(format!("\n[file: {name}]\n").as_bytes()).await?;
            }
            if let Some(error) = response.error {
                stdout.write_all(format!("\n[error: {error}]\n").as_bytes()).await?;
            }
            stdout.flush().await?;
        }
        stdout.write_all(b"\n").await?;
    }

    conductor.clear_session_thread(&session).await;
    info!("Chat REPL stopped");
    Ok(())
}
