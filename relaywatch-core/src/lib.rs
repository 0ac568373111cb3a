//! Relaywatch core - shared model and detection engines
//!
//! Everything the collector daemon and the read API have in common:
//! - The `Sample` record schema (one normalized collection cycle)
//! - The append-only TSV sample store (writer + reader)
//! - The WAN source resolver (which uplink actually carries traffic)
//! - Change detection over tracked fields
//! - Anomaly detection (signal drops, latency spikes, ping failures)
//! - Window statistics for the dashboard

pub mod anomaly;
pub mod changes;
pub mod resolver;
pub mod sample;
pub mod stats;
pub mod store;

pub use anomaly::{AnomalyConfig, AnomalyEvent, AnomalyKind, Severity};
pub use changes::{ChangeEvent, TrackedField};
pub use resolver::{InterfaceMap, WanResolver, WanSignals};
pub use sample::{Sample, WanSource, WanStatus};
pub use store::{SampleStore, StoreError};
