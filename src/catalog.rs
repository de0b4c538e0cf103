//! Catalog: the artefact store, its index and the bus wired together
//!
//! Every successful rebuild is published three ways, in order and under one
//! lock: the shared index pointer is swapped, the cached `environments.json`
//! document is re-encoded, and the snapshot is broadcast on the bus.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::artefacts::{ArtefactStore, EnvironmentPath};
use crate::compressed::CompressedFile;
use crate::environments::EnvironmentIndex;
use crate::error::Result;
use crate::socket_server::NotificationBus;

pub const ENVIRONMENTS_JSON: &str = "environments.json";

#[derive(Debug)]
pub struct Catalog {
    store: ArtefactStore,
    index: RwLock<Arc<EnvironmentIndex>>,
    bus: NotificationBus,
    environments_json: CompressedFile,
    rebuild: Mutex<()>,
}

impl Catalog {
    /// Wrap a store; the index stays empty until the first [`Catalog::reindex`]
    pub fn new(store: ArtefactStore, bus: NotificationBus) -> Self {
        Self {
            store,
            index: RwLock::new(Arc::new(EnvironmentIndex::default())),
            bus,
            environments_json: CompressedFile::new(ENVIRONMENTS_JSON),
            rebuild: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &ArtefactStore {
        &self.store
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn environments_json(&self) -> &CompressedFile {
        &self.environments_json
    }

    /// The last published index
    pub fn index(&self) -> Arc<EnvironmentIndex> {
        Arc::clone(&self.index.read())
    }

    /// Rebuild the index from the store and publish it
    ///
    /// Blocking; call from `spawn_blocking` in async code. Concurrent calls
    /// are serialised, so publications happen in rebuild order.
    pub fn reindex(&self) -> Result<Arc<EnvironmentIndex>> {
        let _rebuild = self.rebuild.lock();

        let index = Arc::new(EnvironmentIndex::rebuild(&self.store)?);
        let snapshot = index.to_json()?;

        *self.index.write() = Arc::clone(&index);
        self.environments_json.update(snapshot.clone().into_bytes())?;
        self.bus.publish(&snapshot)?;

        Ok(index)
    }

    /// Pull from the remote and re-index if anything changed
    pub fn refresh(&self) -> Result<bool> {
        if !self.store.pull()? {
            return Ok(false);
        }

        self.reindex()?;
        Ok(true)
    }

    /// Commit files into an environment, then re-index
    pub fn write_environment<I, S, R>(
        &self,
        path: &EnvironmentPath,
        files: I,
    ) -> Result<Arc<EnvironmentIndex>>
    where
        I: IntoIterator<Item = (S, R)>,
        S: AsRef<str>,
        R: Read,
    {
        self.store.add_files(path, files)?;
        Ok(self.reindex_after_write(path, self.reindex()))
    }

    /// Remove an environment, then re-index
    pub fn remove_environment(&self, path: &EnvironmentPath) -> Result<Arc<EnvironmentIndex>> {
        self.store.remove_environment(path)?;
        Ok(self.reindex_after_write(path, self.reindex()))
    }

    /// A durable write stands even when the follow-up rebuild fails; the
    /// last published index is kept until the next reindex or refresh.
    fn reindex_after_write(
        &self,
        path: &EnvironmentPath,
        reindexed: Result<Arc<EnvironmentIndex>>,
    ) -> Arc<EnvironmentIndex> {
        match reindexed {
            Ok(index) => index,
            Err(e) => {
                tracing::error!("Wrote {} but re-indexing failed: {}", path, e);
                self.index()
            }
        }
    }
}

/// Periodically pull the artefact repo; None when `interval` is zero
pub fn spawn_refresh_task(catalog: Arc<Catalog>, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        tracing::debug!("Artefact refresh disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick fires immediately; the caller has just indexed
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let catalog = Arc::clone(&catalog);
            match tokio::task::spawn_blocking(move || catalog.refresh()).await {
                Ok(Ok(true)) => tracing::info!("Artefact repo changed, index rebuilt"),
                Ok(Ok(false)) => tracing::debug!("Artefact repo unchanged"),
                Ok(Err(e)) => tracing::warn!("Artefact refresh failed: {}", e),
                Err(e) => tracing::error!("Artefact refresh task panicked: {}", e),
            }
        }
    }))
}
