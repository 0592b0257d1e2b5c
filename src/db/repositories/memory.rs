use crate::db::models::DetectionItem;
use crate::db::repositories::items::ItemStore;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Volatile item store, used when no database is configured and by tests
#[derive(Default)]
pub struct MemoryItemStore {
    items: Mutex<HashMap<Uuid, DetectionItem>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(items: &mut Vec<DetectionItem>) {
    items.sort_by(|a, b| b.start_ts.cmp(&a.start_ts));
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn get(&self, id: &Uuid) -> Result<Option<DetectionItem>> {
        Ok(self.items.lock().await.get(id).cloned())
    }

    async fn put(&self, item: &DetectionItem) -> Result<()> {
        self.items.lock().await.insert(item.id, item.clone());
        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool> {
        Ok(self.items.lock().await.remove(id).is_some())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<DetectionItem>> {
        let mut items: Vec<_> = self.items.lock().await.values().cloned().collect();
        newest_first(&mut items);
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn prune(&self, keep: i64) -> Result<u64> {
        let mut guard = self.items.lock().await;
        let mut items: Vec<_> = guard.values().cloned().collect();
        newest_first(&mut items);

        let mut removed = 0;
        for stale in items.iter().skip(keep.max(0) as usize) {
            guard.remove(&stale.id);
            removed += 1;
        }
        Ok(removed)
    }
}
