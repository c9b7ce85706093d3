use bsr_cache::{LockRecord, ProgressRecord};
use colored::Colorize;
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

pub fn print_lock(user_id: i64, lock: &LockRecord, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "user_id": user_id,
            "owner": lock.owner,
            "acquired_at": lock.acquired_at.to_string(),
        })),
        OutputFormat::Table => {
            let mut builder = Builder::default();
            builder.push_record(["User", "Owner", "Acquired"]);
            builder.push_record([
                user_id.to_string(),
                lock.owner.clone(),
                lock.acquired_at.to_string(),
            ]);
            println!("{}", builder.build().with(Style::rounded()));
        }
    }
}

pub fn print_progress(record: &ProgressRecord, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_value(record) {
            Ok(value) => print_json(&value),
            Err(e) => print_error(&format!("cannot encode progress: {e}")),
        },
        OutputFormat::Table => {
            let mut builder = Builder::default();
            builder.push_record(["Field", "Value"]);
            builder.push_record(["Session".to_string(), record.session_id.clone()]);
            builder.push_record(["Status".to_string(), record.status.to_string()]);
            builder.push_record([
                "Processed".to_string(),
                format!("{}/{} ({:.1}%)", record.processed, record.total, record.percent),
            ]);
            builder.push_record([
                "Succeeded / Failed".to_string(),
                format!("{} / {}", record.successful_count, record.failed_count),
            ]);
            if let Some(url) = &record.current_url {
                builder.push_record(["Current URL".to_string(), url.clone()]);
            }
            if let Some(error) = &record.error_message {
                builder.push_record(["Error".to_string(), error.clone()]);
            }
            builder.push_record(["Updated".to_string(), record.updated_at.to_string()]);
            println!("{}", builder.build().with(Style::rounded()));
        }
    }
}
