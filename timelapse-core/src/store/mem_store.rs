use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::CaptureStore;
use crate::error::TimelapseResult;
use crate::models::CapturedExchange;

#[derive(Default)]
struct Inner {
    next_seq: u64,
    rows: HashMap<Uuid, (u64, CapturedExchange)>,
}

/// Process-local store; contents are lost on restart.
#[derive(Default)]
pub struct MemCaptureStore {
    inner: RwLock<Inner>,
}

impl MemCaptureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }
}

#[async_trait]
impl CaptureStore for MemCaptureStore {
    async fn put(&self, exchange: &CapturedExchange) -> TimelapseResult<()> {
        let mut inner = self.inner.write().await;
        let seq = match inner.rows.get(&exchange.id) {
            Some((seq, _)) => *seq,
            None => {
                inner.next_seq += 1;
                inner.next_seq
            }
        };
        inner.rows.insert(exchange.id, (seq, exchange.clone()));
        Ok(())
    }

    async fn get_all(&self) -> TimelapseResult<Vec<CapturedExchange>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<&(u64, CapturedExchange)> = inner.rows.values().collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, e)| e.clone()).collect())
    }

    async fn clear(&self) -> TimelapseResult<()> {
        self.inner.write().await.rows.clear();
        Ok(())
    }

    async fn health(&self) -> TimelapseResult<String> {
        Ok(format!("{} exchanges held in memory", self.len().await))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
