pub mod audit;
pub mod auth;
pub mod blocked;
pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod recurrence;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod wal;
