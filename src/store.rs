//! Process-local value storage.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::cid::ContentId;

/// Values held by this node, keyed by content id.
///
/// Single copy, no eviction, nothing survives a restart. Writers are
/// serialised by the inner mutex so concurrent inbound handlers can share one
/// store.
#[derive(Debug, Default)]
pub struct ValueStore {
    values: Mutex<HashMap<ContentId, Vec<u8>>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `cid`, replacing whatever was there.
    pub async fn put(&self, cid: ContentId, value: Vec<u8>) {
        let mut values = self.values.lock().await;
        values.insert(cid, value);
    }

    /// Look up a value. `None` means "not held here".
    pub async fn get(&self, cid: &ContentId) -> Option<Vec<u8>> {
        let values = self.values.lock().await;
        values.get(cid).cloned()
    }

    pub async fn contains(&self, cid: &ContentId) -> bool {
        self.values.lock().await.contains_key(cid)
    }

    pub async fn len(&self) -> usize {
        self.values.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.lock().await.is_empty()
    }
}
