pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod transport;
