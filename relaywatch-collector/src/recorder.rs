//! Sample recorder
//!
//! Thin discipline layer over the TSV store: strictly one record per
//! cycle, append failures propagate to the coordinator, and every
//! append is diffed against the immediately preceding record so field
//! transitions hit the log the moment they happen.

use relaywatch_core::changes::detect_changes;
use relaywatch_core::sample::Sample;
use relaywatch_core::store::{SampleStore, StoreError};
use tracing::{info, warn};

/// Cycles of full staleness before the operator gets warned.
const STALE_WARN_CYCLES: u32 = 3;

pub struct Recorder {
    store: SampleStore,
    last: Option<Sample>,
}

impl Recorder {
    pub fn new(store: SampleStore) -> Self {
        Self { store, last: None }
    }

    /// Appends one record. The append either completes or the error
    /// reaches the coordinator; nothing is retried or reordered here,
    /// so storage order stays temporal order.
    pub fn append(&mut self, sample: &Sample, consecutive_stale: u32) -> Result<(), StoreError> {
        self.store.append(sample)?;

        if let Some(prev) = &self.last {
            let pair = [prev.clone(), sample.clone()];
            for event in detect_changes(&pair, usize::MAX) {
                info!(
                    field = event.field,
                    old = %event.old_value,
                    new = %event.new_value,
                    "tracked field changed"
                );
            }
        }
        if consecutive_stale >= STALE_WARN_CYCLES {
            warn!(
                cycles = consecutive_stale,
                "device has yielded no fresh data; recording cached values"
            );
        }
        self.last = Some(sample.clone());
        Ok(())
    }
}
