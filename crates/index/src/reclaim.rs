//! Memory reclamation checkpoints.

use folio_store::StoreHandle;
use std::time::Duration;
use tracing::trace;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;

const LOW_MEMORY_PAUSE: Duration = Duration::from_millis(10);

/// Explicit points in the build where memory is handed back.
///
/// Every `checkpoint` call counts as one unit of work; every `every`-th unit
/// (every unit in low memory mode) the store is asked to release its caches
/// and the task yields, so freed buffers can actually be returned before the
/// next batch allocates.
pub(crate) struct Reclaimer {
    store: StoreHandle,
    low_memory: bool,
    every: usize,
    units: usize,
}

impl Reclaimer {
    pub(crate) fn new(store: StoreHandle, low_memory: bool, every: usize) -> Self {
        Self {
            store,
            low_memory,
            every: every.max(1),
            units: 0,
        }
    }

    /// Count one unit of work, reclaiming when due.
    pub(crate) async fn checkpoint(&mut self, name: &'static str) -> Result<()> {
        self.units += 1;
        if self.low_memory || self.units % self.every == 0 {
            self.reclaim(name).await?;
        }
        Ok(())
    }

    /// Reclaim unconditionally, typically after a large structure was dropped.
    pub(crate) async fn reclaim(&mut self, name: &'static str) -> Result<()> {
        trace!(checkpoint = name, units = self.units, "reclaiming memory");
        self.store.release_memory().await.or_raise(|| ErrorKind::Index)?;
        if self.low_memory {
            tokio::time::sleep(LOW_MEMORY_PAUSE).await;
        } else {
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}
