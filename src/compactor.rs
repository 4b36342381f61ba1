use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::scheduler::Scheduler;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the journal once `threshold` appends have
/// accumulated since the last compaction.
pub async fn run_compactor(scheduler: Arc<Scheduler>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&scheduler, threshold).await;
    }
}

/// One compactor pass. Returns whether a compaction ran.
pub async fn compact_if_due(scheduler: &Scheduler, threshold: u64) -> bool {
    let appends = scheduler.journal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match scheduler.compact_journal().await {
        Ok(()) => {
            metrics::counter!(crate::observability::JOURNAL_COMPACTIONS_TOTAL, "status" => "ok")
                .increment(1);
            info!(appends, "journal compacted");
            true
        }
        Err(e) => {
            metrics::counter!(crate::observability::JOURNAL_COMPACTIONS_TOTAL, "status" => "error")
                .increment(1);
            error!("journal compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::notify::NotifyHub;
    use crate::scheduler::SystemClock;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("servify_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let scheduler =
            Scheduler::open(path, Arc::new(NotifyHub::new()), Arc::new(SystemClock)).unwrap();

        scheduler.register_user("a".into(), Role::Customer, None).await.unwrap();
        scheduler.register_user("b".into(), Role::Customer, None).await.unwrap();
        assert!(!compact_if_due(&scheduler, 3).await);

        scheduler.register_user("c".into(), Role::Customer, None).await.unwrap();
        assert!(compact_if_due(&scheduler, 3).await);
        assert_eq!(scheduler.journal_appends_since_compact().await, 0);
    }
}
