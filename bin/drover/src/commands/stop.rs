use drover_client::SessionClient;
use drover_core::{Config, Paths};

pub async fn one(session_id: &str) -> anyhow::Result<()> {
    let client = client()?;
    let outcome = client.stop(session_id).await?;
    println!("✓ Session {} {}", session_id, outcome);
    Ok(())
}

pub async fn all() -> anyhow::Result<()> {
    let client = client()?;
    let report = client.stop_all().await?;

    println!();
    println!("Stop-all report");
    println!("  Considered: {}", report.considered);
    println!("  Paused:     {}", report.paused);
    println!("  Terminated: {}", report.terminated);
    println!("  Failed:     {}", report.failed);
    println!();

    Ok(())
}

fn client() -> anyhow::Result<SessionClient> {
    let paths = Paths::default();
    let config = Config::load_or_default(&paths)?.with_env_overrides();
    Ok(SessionClient::new(&config)?)
}
