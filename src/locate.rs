//! Locating the runtime container.

use std::sync::Arc;

use log::{debug, warn};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::engine::ContainerEngine;
use crate::error::{Error, Result};
use crate::watcher::Watcher;

/// Returns the PID of the initial process of the running container `name`.
///
/// A [`Watcher`] is started on `engine` and given time to take its initial
/// inventory. It is shut down again before this function returns, whatever
/// the outcome, and also when the returned future is dropped early (for
/// instance by a caller's timeout).
pub async fn locate<E: ContainerEngine + 'static>(engine: E, name: &str) -> Result<u32> {
    let watcher = Arc::new(Watcher::new(engine));
    let cancel = CancellationToken::new();
    let _stop = cancel.clone().drop_guard();
    let mut task = AbortOnDropHandle::new(tokio::spawn({
        let watcher = Arc::clone(&watcher);
        let cancel = cancel.clone();
        async move { watcher.watch(cancel).await }
    }));

    let terminated = tokio::select! {
        _ = watcher.ready() => None,
        outcome = &mut task => Some(outcome),
    };
    cancel.cancel();
    let ready = watcher.is_ready();
    let outcome = match terminated {
        Some(outcome) => outcome,
        None => task.await,
    };
    match outcome {
        Ok(Ok(())) => debug!("workload watcher stopped"),
        Ok(Err(err)) if !ready => return Err(err.into()),
        Ok(Err(err)) => warn!("workload watcher failed: {err}"),
        Err(err) if !ready => return Err(err.into()),
        Err(err) => warn!("workload watcher task failed: {err}"),
    }

    let container = watcher
        .container(name)
        .filter(|container| container.pid > 0)
        .ok_or_else(|| Error::ContainerNotFound(name.to_string()))?;
    debug!(
        "container {name:?} ({}) has PID {}",
        container.id, container.pid
    );
    Ok(container.pid)
}
