pub mod audit;
pub mod booking;
pub mod config;
pub mod dates;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod restore;
pub mod store;
pub mod users;
pub mod wal;
