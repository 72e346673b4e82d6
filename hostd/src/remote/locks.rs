//! Per-server execution locks

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per server. Proxy starts and stops, pipeline steps and
/// async task executions hold it for their whole read-decide-write sequence.
#[derive(Default)]
pub struct ServerLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl ServerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, server_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(server_id).or_default().clone()
    }

    /// Wait for exclusive access to a server
    pub async fn acquire(&self, server_id: Uuid) -> OwnedMutexGuard<()> {
        self.lock_for(server_id).lock_owned().await
    }
}
