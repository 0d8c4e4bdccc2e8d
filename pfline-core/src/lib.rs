//! pfline core: resolve a declared portfolio structure into timeseries, fetch
//! them, and aggregate them into portfolio lines.
//!
//! - Name trees and their resolved counterparts (`tree`)
//! - The validated, immutable portfolio structure (`structure`)
//! - Series with units and frequencies (`series`)
//! - Post-fetch adjustments (`adjustment`)
//! - Aggregation into (nested) portfolio lines (`aggregate`)
//! - Timeseries sources: REST server, in-memory table, id cache (`data`)

pub mod adjustment;
pub mod aggregate;
pub mod config;
pub mod data;
pub mod example;
pub mod series;
pub mod structure;
pub mod tree;

pub use aggregate::{FlatLine, Kind, PfLine};
pub use series::{Freq, Series, ShapeError};
pub use structure::{ConfigError, LookupError, Structure};
pub use tree::{DataLeaf, IdLeaf, NameTree, Tree, TsId, TsRef};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything a tenant shares between threads is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<Structure>();
        require_sync::<Structure>();
        require_send::<Series>();
        require_sync::<Series>();
        require_send::<PfLine>();
        require_sync::<PfLine>();
        require_send::<Tree<DataLeaf>>();
        require_sync::<Tree<DataLeaf>>();
        require_send::<adjustment::AdjustmentChain>();
        require_sync::<adjustment::AdjustmentChain>();
        require_send::<data::RestSource>();
        require_sync::<data::RestSource>();
        require_send::<data::MemorySource>();
        require_sync::<data::MemorySource>();
        require_send::<data::IdCache>();
        require_sync::<data::IdCache>();
    }
}
