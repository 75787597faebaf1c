use drover_client::{FnObserver, SessionClient};
use drover_core::{Config, Error, Paths, PollSnapshot, SessionStatus};
use drover_tasks::{keys, IntentKind, TaskContext, TaskIntent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Remove a flag and everything it gates.
///
/// Usage: drover run remove --target dark_mode --file src/theme.js \
///        --line-start 42 --line-end 67
pub async fn remove(
    target: String,
    file: String,
    line_start: u64,
    line_end: u64,
    description: Option<String>,
    category: Option<String>,
    references: Option<u64>,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let mut context = TaskContext::new()
        .with(keys::FILE, file)
        .with(keys::LINE_START, line_start)
        .with(keys::LINE_END, line_end);
    if let Some(description) = description {
        context.insert(keys::DESCRIPTION, description);
    }
    if let Some(category) = category {
        context.insert(keys::CATEGORY, category);
    }
    if let Some(references) = references {
        context.insert(keys::REFERENCES, references);
    }

    execute(TaskIntent::new(IntentKind::Remove, target), context, timeout).await
}

/// Bring a removed flag back from its backup record.
pub async fn restore(
    target: String,
    file: String,
    line_start: u64,
    pr: u64,
    backup: Option<String>,
    description: Option<String>,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let mut context = TaskContext::new()
        .with(keys::FILE, file)
        .with(keys::LINE_START, line_start)
        .with(keys::PR_NUMBER, pr);
    if let Some(backup) = backup {
        context.insert(keys::BACKUP_PATH, backup);
    }
    if let Some(description) = description {
        context.insert(keys::DESCRIPTION, description);
    }

    execute(TaskIntent::new(IntentKind::Restore, target), context, timeout).await
}

/// Keep the enabled behavior, delete the flag.
pub async fn make_permanent(
    target: String,
    file: String,
    line_start: u64,
    line_end: u64,
    description: Option<String>,
    category: Option<String>,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let mut context = TaskContext::new()
        .with(keys::FILE, file)
        .with(keys::LINE_START, line_start)
        .with(keys::LINE_END, line_end);
    if let Some(description) = description {
        context.insert(keys::DESCRIPTION, description);
    }
    if let Some(category) = category {
        context.insert(keys::CATEGORY, category);
    }

    execute(
        TaskIntent::new(IntentKind::MakePermanent, target),
        context,
        timeout,
    )
    .await
}

/// Substitute a flag check with a fixed expression.
pub async fn replace(
    target: String,
    file: String,
    replacement: String,
    line_start: Option<u64>,
    line_end: Option<u64>,
    description: Option<String>,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let mut context = TaskContext::new()
        .with(keys::FILE, file)
        .with(keys::REPLACEMENT, replacement);
    if let Some(line_start) = line_start {
        context.insert(keys::LINE_START, line_start);
    }
    if let Some(line_end) = line_end {
        context.insert(keys::LINE_END, line_end);
    }
    if let Some(description) = description {
        context.insert(keys::DESCRIPTION, description);
    }

    execute(TaskIntent::new(IntentKind::Replace, target), context, timeout).await
}

/// Build the request, open the session, and watch it to the end.
async fn execute(
    intent: TaskIntent,
    context: TaskContext,
    timeout_secs: Option<u64>,
) -> anyhow::Result<()> {
    let request = drover_tasks::build(&intent, &context)?;

    let paths = Paths::default();
    let config = Config::load_or_default(&paths)?.with_env_overrides();

    let client = match SessionClient::new(&config) {
        Ok(client) => client,
        Err(e) => {
            println!("  ❌ {}", e);
            println!("  💡 Configure the API key first: drover onboard");
            return Ok(());
        }
    };

    println!();
    println!("🐂 drover");
    println!("  Intent: {} {}", intent.kind, intent.target);
    println!("  (Press Ctrl+C to stop)");
    println!();

    // Ctrl-C feeds the shutdown channel; the loop bails at its next
    // await point.
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    let observer = Arc::new(FnObserver::new(print_snapshot));
    let timeout = timeout_secs.map(Duration::from_secs);

    match client
        .create_and_run_with_shutdown(&request, Some(observer), timeout, shutdown_rx)
        .await
    {
        Ok(result) => {
            println!();
            match result.status {
                SessionStatus::NeedsInput => {
                    println!("  ⏸️  Session is blocked waiting for input");
                    println!("  💡 Answer in the session and rerun `drover status` to follow up");
                }
                _ => println!("  🎉 Session finished"),
            }
            if let Some(url) = &result.entry_url {
                println!("  🔗 {}", url);
            }
            println!("  💬 {} message(s)", result.messages.len());
            if let Some(output) = &result.structured_result {
                println!("  📦 Structured result:");
                for line in serde_json::to_string_pretty(output)?.lines() {
                    println!("     {}", line);
                }
            }
            println!();
        }
        Err(Error::SessionFailed(detail)) => {
            println!();
            println!("  💥 Session failed: {}", detail);
            println!();
        }
        Err(Error::SessionCancelled(detail)) => {
            println!();
            println!("  ⏹️  Session cancelled remotely: {}", detail);
            println!();
        }
        Err(Error::TimedOut {
            polls,
            elapsed_secs,
        }) => {
            println!();
            println!("  ⌛ Timed out after {} polls ({}s)", polls, elapsed_secs);
            println!("  💡 The session may still be running; check `drover sessions`");
            println!();
        }
        Err(Error::Interrupted(_)) => {
            println!();
            println!("  ⏹️  Interrupted; the remote session keeps running");
            println!("  💡 Use `drover stop <SESSION_ID>` to stop it");
            println!();
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

fn print_snapshot(snapshot: &PollSnapshot) {
    let ts = snapshot
        .polled_at
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S");
    match snapshot.latest_message() {
        Some(message) => println!(
            "  {} [{}] {} (poll {}): {}",
            status_icon(snapshot.status),
            ts,
            snapshot.raw_status,
            snapshot.poll_count,
            truncate_str(message, 60)
        ),
        None => println!(
            "  {} [{}] {} (poll {})",
            status_icon(snapshot.status),
            ts,
            snapshot.raw_status,
            snapshot.poll_count
        ),
    }
}

fn status_icon(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Initializing => "⏳",
        SessionStatus::Working => "🔄",
        SessionStatus::Succeeded => "🎉",
        SessionStatus::NeedsInput => "⏸️",
        SessionStatus::Cancelled => "⏹️",
        SessionStatus::Failed => "💥",
        SessionStatus::TimedOut => "⌛",
    }
}

fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}
