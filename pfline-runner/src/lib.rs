//! Portfolio-line runner: tenant queries on top of `pfline-core`.
//!
//! This crate provides:
//! - `Tenant`: portfolio lines, price lines and single timeseries for a time window
//! - Series-only variants returning the raw fetched leaves
//! - Sequential or parallel leaf fetching
//! - Id-cache warming over all portfolios in a structure
//! - CSV export of lines and raw leaves

pub mod export;
pub mod fetch;
pub mod tenant;

pub use export::{export_leaves_csv, export_line_csv};
pub use fetch::{adjust, fetch_data, fill_frequency, resolve_ids, FetchMode, Window};
pub use tenant::{Tenant, TenantError};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn tenant_is_send_sync() {
        assert_send::<Tenant>();
        assert_sync::<Tenant>();
    }

    #[test]
    fn window_is_send_sync() {
        assert_send::<Window>();
        assert_sync::<Window>();
    }

    #[test]
    fn tenant_error_is_send_sync() {
        assert_send::<TenantError>();
        assert_sync::<TenantError>();
    }
}
