//! In-memory table of the latest record per container

use crate::models::ContainerRecord;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Table of container records keyed by container id.
///
/// The collector is the only writer. Readers get copies through
/// [`ContainerTable::snapshot`]; the lock is only held for map access, never
/// across a runtime call.
#[derive(Debug, Default)]
pub struct ContainerTable {
    records: RwLock<HashMap<String, ContainerRecord>>,
}

impl ContainerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current records for the given ids, skipping unknown ones
    pub async fn get_many<'a, I>(&self, ids: I) -> HashMap<String, ContainerRecord>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let records = self.records.read().await;
        ids.into_iter()
            .filter_map(|id| records.get(id).map(|r| (id.to_string(), r.clone())))
            .collect()
    }

    /// Store the records reconciled during a tick.
    ///
    /// Every record in `current` replaces the stored one. Containers that are
    /// tracked but missing from `current` are marked down with zeroed usage;
    /// their labels and expiry are left alone so they age out through
    /// [`ContainerTable::evict_expired`].
    pub async fn commit(&self, current: HashMap<String, ContainerRecord>) {
        let mut records = self.records.write().await;

        for (id, record) in records.iter_mut() {
            if !current.contains_key(id) {
                record.mark_down();
            }
        }

        records.extend(current);
    }

    /// Remove every record whose expiry is before `now`.
    /// Returns the number of removed records.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();

        records.retain(|id, record| {
            let keep = !record.is_expired(now);
            if !keep {
                debug!(
                    container_id = %id,
                    expires_at = %record.expires_at,
                    "Evicting expired container"
                );
            }
            keep
        });

        before - records.len()
    }

    /// Point-in-time copy of all records, ordered by id
    pub async fn snapshot(&self) -> Vec<ContainerRecord> {
        let mut out: Vec<ContainerRecord> = {
            let records = self.records.read().await;
            records.values().cloned().collect()
        };
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, up: bool, expires_at: DateTime<Utc>) -> ContainerRecord {
        ContainerRecord {
            id: id.to_string(),
            up,
            mem_used: 100,
            mem_total: 200,
            cpu_used: 0.25,
            labels: vec!["web".to_string()],
            expires_at,
        }
    }

    fn batch(records: Vec<ContainerRecord>) -> HashMap<String, ContainerRecord> {
        records.into_iter().map(|r| (r.id.clone(), r)).collect()
    }

    #[tokio::test]
    async fn test_commit_inserts_and_replaces() {
        let table = ContainerTable::new();
        let now = Utc::now();

        table.commit(batch(vec![record("a", true, now)])).await;
        let mut updated = record("a", true, now + Duration::minutes(5));
        updated.mem_used = 150;
        table.commit(batch(vec![updated.clone()])).await;

        let snapshot = table.snapshot().await;
        assert_eq!(snapshot, vec![updated]);
    }

    #[tokio::test]
    async fn test_commit_marks_absent_records_down() {
        let table = ContainerTable::new();
        let now = Utc::now();
        let expires_at = now + Duration::minutes(5);

        table
            .commit(batch(vec![record("a", true, expires_at), record("b", true, expires_at)]))
            .await;
        table.commit(batch(vec![record("a", true, expires_at)])).await;

        let snapshot = table.snapshot().await;
        assert_eq!(snapshot.len(), 2);

        let absent = &snapshot[1];
        assert_eq!(absent.id, "b");
        assert!(!absent.up);
        assert_eq!(absent.mem_used, 0);
        assert_eq!(absent.mem_total, 0);
        assert_eq!(absent.cpu_used, 0.0);
        // Expiry and labels survive so the row ages out normally
        assert_eq!(absent.expires_at, expires_at);
        assert_eq!(absent.labels, vec!["web".to_string()]);
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let table = ContainerTable::new();
        let now = Utc::now();

        table
            .commit(batch(vec![
                record("old", false, now - Duration::seconds(1)),
                record("fresh", true, now + Duration::minutes(5)),
            ]))
            .await;

        let evicted = table.evict_expired(now).await;
        assert_eq!(evicted, 1);

        let ids: Vec<String> = table.snapshot().await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn test_evict_ignores_up_flag() {
        let table = ContainerTable::new();
        let now = Utc::now();

        table
            .commit(batch(vec![record("a", true, now - Duration::seconds(1))]))
            .await;

        assert_eq!(table.evict_expired(now).await, 1);
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_is_independent_copy() {
        let table = ContainerTable::new();
        let now = Utc::now();
        table
            .commit(batch(vec![record("a", true, now + Duration::minutes(5))]))
            .await;

        let mut snapshot = table.snapshot().await;
        snapshot[0].mem_used = 0;

        assert_eq!(table.snapshot().await[0].mem_used, 100);
    }

    #[tokio::test]
    async fn test_get_many_skips_unknown() {
        let table = ContainerTable::new();
        let now = Utc::now();
        table
            .commit(batch(vec![record("a", true, now + Duration::minutes(5))]))
            .await;

        let found = table.get_many(["a", "missing"]).await;
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("a"));
    }
}
