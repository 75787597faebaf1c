use drover_client::SessionClient;
use drover_core::{Config, Paths, SessionStatus};

pub async fn run(session_id: &str) -> anyhow::Result<()> {
    let paths = Paths::default();
    let config = Config::load_or_default(&paths)?.with_env_overrides();
    let client = SessionClient::new(&config)?;

    let status = client.status(session_id).await?;
    let raw = status.effective_status();

    println!();
    println!("Session {}", status.effective_id().unwrap_or(session_id));
    println!("  Status:   {} ({})", SessionStatus::from_remote(raw), raw);
    if let Some(url) = &status.url {
        println!("  URL:      {}", url);
    }
    println!("  Messages: {}", status.messages.len());
    if let Some(message) = status.messages.last() {
        println!("  Latest:   {}", message.message);
    }
    if let Some(output) = &status.structured_output {
        println!("  Structured output:");
        for line in serde_json::to_string_pretty(output)?.lines() {
            println!("    {}", line);
        }
    }
    println!();

    Ok(())
}
