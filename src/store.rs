//! Durable record of completed extractions.

use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};

use crate::schema::ExtractionRecord;

/// Where finished extractions are written.
#[async_trait::async_trait]
pub trait ExtractionStore: Send + Sync {
    fn name(&self) -> &str;
    async fn record(&self, record: &ExtractionRecord) -> Result<()>;
}

/// Process-local store, used when no database is configured.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Vec<ExtractionRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    #[allow(dead_code)]
    pub fn records(&self) -> Vec<ExtractionRecord> {
        self.inner
            .read()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ExtractionStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn record(&self, record: &ExtractionRecord) -> Result<()> {
        let mut records = self
            .inner
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        if records.iter().any(|r| r.id == record.id) {
            anyhow::bail!("extraction {} already recorded", record.id);
        }
        records.push(record.clone());
        tracing::debug!("MemoryStore: recorded {} ({} total)", record.id, records.len());
        Ok(())
    }
}
