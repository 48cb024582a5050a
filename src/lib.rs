pub mod cache;
pub mod config;
pub mod eligibility;
pub mod grid;
pub mod http;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod rate_limit;
pub mod reaper;
pub mod scheduler;
pub mod store;
pub mod validate;
pub mod wal;
