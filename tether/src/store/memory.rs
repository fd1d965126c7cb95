use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard};

use super::{LeaseStore, WriteOutcome};
use crate::error::StoreError;
use crate::record::{LeaseRecord, Version};

/// Process-local lease table. Shares the conditional-write semantics of the
/// real backends, so it works for tests and single-host coordination.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    records: Mutex<HashMap<String, LeaseRecord>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, LeaseRecord>> {
        // Every mutation is a single map operation, so a poisoned map is intact.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn read(&self, name: &str) -> Result<Option<LeaseRecord>, StoreError> {
        Ok(self.records().get(name).cloned())
    }

    async fn create_if_absent(&self, record: &LeaseRecord) -> Result<WriteOutcome, StoreError> {
        match self.records().entry(record.name.clone()) {
            Entry::Occupied(_) => Ok(WriteOutcome::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(WriteOutcome::Applied)
            }
        }
    }

    async fn update_if_version(
        &self,
        expected: Version,
        record: &LeaseRecord,
    ) -> Result<WriteOutcome, StoreError> {
        match self.records().get_mut(&record.name) {
            Some(current) if current.version == expected => {
                *current = record.clone();
                Ok(WriteOutcome::Applied)
            }
            _ => Ok(WriteOutcome::Conflict),
        }
    }

    async fn delete_if_version(
        &self,
        name: &str,
        expected: Version,
    ) -> Result<WriteOutcome, StoreError> {
        let mut records = self.records();
        match records.get(name) {
            Some(current) if current.version == expected => {
                records.remove(name);
                Ok(WriteOutcome::Applied)
            }
            _ => Ok(WriteOutcome::Conflict),
        }
    }
}
