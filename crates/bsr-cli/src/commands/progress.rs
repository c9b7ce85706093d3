use anyhow::{Result, bail};
use bsr_cache::{AppConfig, BatchProgressCache, ProgressRecord};
use colored::Colorize;
use futures_util::StreamExt;

use crate::cli::OutputFormat;
use crate::commands::connect;
use crate::output::{print_json, print_progress, print_warning};

pub async fn show(config: &AppConfig, session_id: &str, format: OutputFormat) -> Result<()> {
    let manager = connect(config).await?;
    let progress = BatchProgressCache::new(manager.clone(), &config.cache);
    let record = progress.get_progress(session_id).await;
    manager.close().await;

    match record {
        Some(record) => print_progress(&record, format),
        None => bail!("no progress stored for session {session_id}"),
    }
    Ok(())
}

/// Follow progress events until the batch finishes or Ctrl-C.
pub async fn watch(config: &AppConfig, session_id: &str, format: OutputFormat) -> Result<()> {
    let manager = connect(config).await?;
    let progress = BatchProgressCache::new(manager.clone(), &config.cache);

    let Some(mut events) = progress.subscribe_updates(session_id).await else {
        manager.close().await;
        bail!("cannot subscribe to progress updates for session {session_id}");
    };

    // Events published before the subscription are only visible as state
    if let Some(current) = progress.get_progress(session_id).await {
        print_progress(&current, format);
        if current.status.is_terminal() {
            manager.close().await;
            return Ok(());
        }
    }
    println!("{} {}", "Watching".cyan(), session_id.bold());

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    print_warning("Subscription closed by the server");
                    break;
                };
                match format {
                    OutputFormat::Json => print_json(&serde_json::json!({
                        "event": &event.event,
                        "data": &event.data,
                        "timestamp": event.timestamp.to_string(),
                    })),
                    OutputFormat::Table => print_event_line(&event.event, &event.data),
                }
                if let Ok(record) = serde_json::from_value::<ProgressRecord>(event.data)
                    && record.status.is_terminal()
                {
                    println!("{} batch {}", "✓".green(), record.status);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(events);
    manager.close().await;
    Ok(())
}

fn print_event_line(event: &str, data: &serde_json::Value) {
    let processed = data.get("processed").and_then(|v| v.as_u64());
    let total = data.get("total").and_then(|v| v.as_u64());
    let percent = data.get("percent").and_then(|v| v.as_f64());
    let status = data.get("status").and_then(|v| v.as_str()).unwrap_or("-");
    match (processed, total, percent) {
        (Some(processed), Some(total), Some(percent)) => {
            println!("[{}] {status} {processed}/{total} ({percent:.1}%)", event.dimmed());
        }
        _ => println!("[{}] {data}", event.dimmed()),
    }
}
