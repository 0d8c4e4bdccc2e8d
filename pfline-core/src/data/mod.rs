//! Timeseries sources: the source trait, the REST server, an in-memory table,
//! and the persistent id cache.

pub mod cache;
pub mod memory;
pub mod provider;
pub mod rest;

pub use cache::IdCache;
pub use memory::MemorySource;
pub use provider::{unique_match, Bound, DataSource, FetchOptions, MissingPolicy, SourceError};
pub use rest::{Access, ApiConfig, HttpReply, Metadata, RestSource, UserPasswordAccess};
