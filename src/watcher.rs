//! Event-driven tracking of the running containers.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::StreamExt;
use log::{debug, trace};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::engine::{Container, ContainerEngine, ContainerEvent, EngineError};

/// Keeps a portfolio of the running containers up to date.
///
/// [`Watcher::watch`] first subscribes to lifecycle events, then takes an
/// initial inventory and flags the portfolio as ready. From then on it
/// applies events until cancelled. Subscribing before the inventory means no
/// change can slip through between the two.
pub struct Watcher<E> {
    engine: E,
    portfolio: RwLock<HashMap<String, Container>>,
    ready: watch::Sender<bool>,
}

impl<E: ContainerEngine> Watcher<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            portfolio: RwLock::new(HashMap::new()),
            ready: watch::Sender::new(false),
        }
    }

    /// Tracks containers until `cancel` fires, which is not an error.
    ///
    /// Returns an error if the engine fails or ends the event stream.
    pub async fn watch(&self, cancel: CancellationToken) -> Result<(), EngineError> {
        let mut events = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            events = self.engine.events() => events?,
        };
        let containers = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            containers = self.engine.containers() => containers?,
        };
        {
            let mut portfolio = self.write();
            portfolio.clear();
            portfolio.extend(containers.into_iter().map(|c| (c.id.clone(), c)));
            debug!("initial inventory: {} running containers", portfolio.len());
        }
        self.ready.send_replace(true);

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                event = events.next() => event,
            };
            let Some(event) = event else {
                return Err(EngineError::StreamClosed);
            };
            let event = event?;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                applied = self.apply(event) => applied?,
            }
        }
    }

    async fn apply(&self, event: ContainerEvent) -> Result<(), EngineError> {
        trace!("{event:?}");
        match event {
            ContainerEvent::Changed(id) => {
                let container = self.engine.container(&id).await?;
                let mut portfolio = self.write();
                match container {
                    Some(container) => portfolio.insert(id, container),
                    None => portfolio.remove(&id),
                };
            }
            ContainerEvent::Removed(id) => {
                self.write().remove(&id);
            }
        }
        Ok(())
    }

    /// Waits until the initial inventory has been taken.
    pub async fn ready(&self) {
        let mut ready = self.ready.subscribe();
        // The sender lives in self, so this cannot fail.
        let _ = ready.wait_for(|ready| *ready).await;
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Looks up a running container by name.
    pub fn container(&self, name: &str) -> Option<Container> {
        self.read().values().find(|c| c.name == name).cloned()
    }

    /// All running containers, in no particular order.
    pub fn containers(&self) -> Vec<Container> {
        self.read().values().cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Container>> {
        self.portfolio.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Container>> {
        self.portfolio.write().unwrap_or_else(PoisonError::into_inner)
    }
}
