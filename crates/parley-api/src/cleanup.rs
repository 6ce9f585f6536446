use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};

use parley_db::Database;

use crate::storage::Storage;

/// Background task that prunes uploads no message ever referenced.
///
/// Runs on an interval; an upload older than `retention` with no attachment
/// row is deleted from disk and from the files table. Sends aborted halfway
/// through their uploads leave exactly these behind.
pub async fn run_cleanup_loop(
    db: Arc<Database>,
    storage: Arc<Storage>,
    interval: Duration,
    retention: chrono::Duration,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        match cleanup_unattached(&db, &storage, retention).await {
            Ok(count) => {
                if count > 0 {
                    info!("Cleanup: pruned {} unattached uploads", count);
                }
            }
            Err(e) => {
                warn!("Cleanup error: {}", e);
            }
        }
    }
}

pub async fn cleanup_unattached(
    db: &Arc<Database>,
    storage: &Storage,
    retention: chrono::Duration,
) -> anyhow::Result<usize> {
    let cutoff = (Utc::now() - retention).to_rfc3339_opts(SecondsFormat::Micros, true);

    let lookup = db.clone();
    let stale = tokio::task::spawn_blocking(move || lookup.find_unattached_files(&cutoff)).await??;

    let mut count = 0;
    for file in stale {
        // Row first: if a message attached it in the meantime the FK refuses.
        let remover = db.clone();
        let id = file.id.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || remover.delete_file_row(&id)).await? {
            warn!("Keeping upload {}: {}", file.id, e);
            continue;
        }

        storage.delete_file(&file.storage_name).await.ok();
        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_db::models::{FileRow, NewMessage};
    use parley_db::timestamp_now;
    use uuid::Uuid;

    fn file_row(owner: &str, storage_name: &str, created_at: &str) -> FileRow {
        FileRow {
            id: Uuid::new_v4().to_string(),
            owner_id: owner.to_string(),
            storage_name: storage_name.to_string(),
            file_name: "a.txt".into(),
            file_type: "text/plain".into(),
            size: 1,
            sha256: String::new(),
            created_at: created_at.to_string(),
        }
    }

    #[tokio::test]
    async fn only_old_unattached_uploads_are_pruned() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dir = std::env::temp_dir().join(format!("parley-cleanup-{}", Uuid::new_v4()));
        let storage = Storage::new(dir.clone()).await.unwrap();

        let alice = Uuid::new_v4().to_string();
        db.create_user(&alice, "alice@example.com", "alice", "hash", &timestamp_now())
            .unwrap();
        let (ws, channel) = (Uuid::new_v4().to_string(), Uuid::new_v4().to_string());
        db.create_workspace(&ws, "Acme", &alice, &channel, &Uuid::new_v4().to_string(), &timestamp_now())
            .unwrap();

        let old = "2020-01-01T00:00:00.000000Z";
        let orphan = file_row(&alice, "orphan.txt", old);
        let attached = file_row(&alice, "attached.txt", old);
        let fresh = file_row(&alice, "fresh.txt", &timestamp_now());
        for f in [&orphan, &attached, &fresh] {
            storage.write(&f.storage_name, b"x").await.unwrap();
            db.insert_file(f).unwrap();
        }

        db.insert_message(&NewMessage {
            id: &Uuid::new_v4().to_string(),
            channel_id: &channel,
            user_id: &alice,
            content: "see file",
            parent_id: None,
            attachments: &[attached.id.clone()],
            created_at: &timestamp_now(),
        })
        .unwrap();

        let pruned = cleanup_unattached(&db, &storage, chrono::Duration::hours(24))
            .await
            .unwrap();

        assert_eq!(pruned, 1);
        assert!(db.get_file(&orphan.id).unwrap().is_none());
        assert!(!storage.file_path("orphan.txt").exists());
        assert!(db.get_file(&attached.id).unwrap().is_some());
        assert!(db.get_file(&fresh.id).unwrap().is_some());

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }
}
