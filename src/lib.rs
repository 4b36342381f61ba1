pub mod api;
pub mod compactor;
pub mod config;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod scheduler;
pub mod session;
pub mod wal;
