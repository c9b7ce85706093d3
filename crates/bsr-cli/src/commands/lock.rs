use anyhow::{Result, bail};
use bsr_cache::{AppConfig, SyncCache};

use crate::cli::OutputFormat;
use crate::commands::connect;
use crate::output::{print_lock, print_success, print_warning};

pub async fn info(config: &AppConfig, user_id: i64, format: OutputFormat) -> Result<()> {
    let manager = connect(config).await?;
    let sync = SyncCache::new(manager.clone(), &config.cache);
    match sync.get_lock_info(user_id).await {
        Some(lock) => print_lock(user_id, &lock, format),
        None if sync.is_sync_locked(user_id).await => {
            print_warning(&format!("User {user_id} is locked but the lock record is unreadable"));
        }
        None => print_success(&format!("No sync lock held for user {user_id}")),
    }
    manager.close().await;
    Ok(())
}

pub async fn unlock(config: &AppConfig, user_id: i64, force: bool) -> Result<()> {
    let manager = connect(config).await?;
    let sync = SyncCache::new(manager.clone(), &config.cache);

    if !sync.is_sync_locked(user_id).await {
        print_success(&format!("No sync lock held for user {user_id}"));
        manager.close().await;
        return Ok(());
    }
    if !force {
        let owner = sync
            .get_lock_info(user_id)
            .await
            .map(|lock| lock.owner)
            .unwrap_or_else(|| "unknown".to_string());
        manager.close().await;
        bail!("sync lock for user {user_id} is held by {owner}; pass --force to remove it");
    }

    let removed = sync.force_release_sync_lock(user_id).await;
    manager.close().await;
    if !removed {
        bail!("sync lock for user {user_id} could not be removed");
    }
    print_success(&format!("Removed sync lock for user {user_id}"));
    Ok(())
}
