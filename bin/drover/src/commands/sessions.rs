use drover_client::SessionClient;
use drover_core::{Config, Paths};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::default();
    let config = Config::load_or_default(&paths)?.with_env_overrides();
    let client = SessionClient::new(&config)?;

    let sessions = client.list().await?;

    if sessions.is_empty() {
        println!();
        println!("  (No sessions)");
        println!();
        return Ok(());
    }

    println!();
    println!("Sessions ({} total)", sessions.len());
    println!();
    for summary in &sessions {
        println!(
            "  {:<28} {:<12} {}",
            summary.effective_id().unwrap_or("<no id>"),
            summary.effective_status(),
            summary.url.as_deref().unwrap_or("-")
        );
    }
    println!();

    Ok(())
}
