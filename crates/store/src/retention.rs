use std::time::Duration;

use chrono::Utc;
use duckdb::params;
use prism_core::error::{PrismError, Result};
use tracing::info;

use crate::Store;
use crate::db::sql_timestamp;

impl Store {
    /// Deletes spans ingested longer than `ttl` ago. Returns the number removed.
    pub fn prune_ttl(&self, ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl)
                .map_err(|e| PrismError::Internal(format!("ttl conversion failed: {e}")))?;

        let conn = self.conn();
        let removed = conn
            .execute(
                "DELETE FROM spans WHERE ingested_at < ?",
                params![sql_timestamp(cutoff)],
            )
            .map_err(|e| PrismError::Store(format!("retention spans delete failed: {e}")))?;
        if removed > 0 {
            info!(removed, ttl = ?ttl, "pruned archived spans");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use testkit::sample_chain;

    use crate::Store;

    #[test]
    fn ttl_keeps_fresh_spans() {
        let store = Store::open_in_memory().unwrap();
        store.insert_spans(&sample_chain("t1")).unwrap();

        let removed = store.prune_ttl(Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.status().unwrap().spans_count, 5);
    }

    #[test]
    fn zero_ttl_prunes_everything() {
        let store = Store::open_in_memory().unwrap();
        store.insert_spans(&sample_chain("t1")).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        store.prune_ttl(Duration::ZERO).unwrap();
        assert_eq!(store.status().unwrap().spans_count, 0);
    }
}
