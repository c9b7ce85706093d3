use anyhow::{Result, bail};
use bsr_cache::{AppConfig, JsonCache, QueryCache};
use colored::Colorize;

use crate::commands::connect;
use crate::output::{print_success, print_warning};

pub async fn ping(config: &AppConfig) -> Result<()> {
    let manager = connect(config).await?;
    let target = config
        .redis
        .url
        .clone()
        .unwrap_or_else(|| format!("{}:{}/{}", config.redis.host, config.redis.port, config.redis.db));
    println!(
        "{} {} is {} (prefix {})",
        "✓".green(),
        target.cyan(),
        "reachable".green(),
        manager.prefix().bold()
    );
    manager.close().await;
    Ok(())
}

pub async fn clear(config: &AppConfig, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!(
            "refusing to delete every '{}:*' key without --yes",
            config.redis.prefix
        );
    }
    let manager = connect(config).await?;
    let removed = JsonCache::new(manager.clone(), "admin", true).clear().await;
    if removed == 0 {
        print_warning("No keys found under the configured prefix");
    } else {
        print_success(&format!("Removed {removed} keys"));
    }
    manager.close().await;
    Ok(())
}

pub async fn invalidate_queries(config: &AppConfig, pattern: &str) -> Result<()> {
    let manager = connect(config).await?;
    let cache = QueryCache::new(manager.clone(), &config.cache);
    if !cache.enabled() {
        bail!("query cache is disabled (redis.query_cache_enabled = false)");
    }
    let removed = cache.invalidate_pattern(pattern).await;
    print_success(&format!("Invalidated {removed} cached query results matching '{pattern}'"));
    manager.close().await;
    Ok(())
}
