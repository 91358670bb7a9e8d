//! Postgres persistence for complaints, tasks, workers and the recurring
//! collections. Status columns are text and round-trip through the status
//! enums' `Display`/`FromStr`.

pub mod client;
pub mod complaints;
pub mod lease;
pub mod recurring;
pub mod tasks;
pub mod workers;

pub use client::PgStore;
