//! Durable server records

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::HostError;
use crate::filesys::dir::Dir;
use crate::models::server::Server;

/// Server records, one JSON file each, mirrored in memory
pub struct ServerStore {
    dir: Dir,
    servers: RwLock<HashMap<Uuid, Server>>,
}

impl ServerStore {
    /// Open the store, loading every record found in `dir`
    pub async fn open(dir: Dir) -> Result<Self, HostError> {
        dir.create().await?;

        let mut servers = HashMap::new();
        for file in dir.list_files("json").await? {
            match file.read_json::<Server>().await {
                Ok(server) => {
                    servers.insert(server.id, server);
                }
                Err(e) => {
                    warn!("Skipping unreadable server record {}: {}", file.path().display(), e);
                }
            }
        }
        info!("Loaded {} server records", servers.len());

        Ok(Self {
            dir,
            servers: RwLock::new(servers),
        })
    }

    pub async fn get(&self, id: &Uuid) -> Option<Server> {
        self.servers.read().await.get(id).cloned()
    }

    /// Fetch a server or fail with `NotFound`
    pub async fn require(&self, id: &Uuid) -> Result<Server, HostError> {
        self.get(id)
            .await
            .ok_or_else(|| HostError::NotFound(format!("server {}", id)))
    }

    pub async fn list(&self) -> Vec<Server> {
        let mut servers: Vec<Server> = self.servers.read().await.values().cloned().collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }

    /// Persist a server. The file is written before the in-memory copy is
    /// replaced, so a failed write leaves both unchanged.
    pub async fn save(&self, server: &Server) -> Result<(), HostError> {
        let mut servers = self.servers.write().await;
        self.dir.record(&server.id).write_json(server).await?;
        servers.insert(server.id, server.clone());
        debug!(server_id = %server.id, "Saved server record");
        Ok(())
    }
}
