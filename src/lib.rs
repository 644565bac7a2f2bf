pub mod api;
pub mod backup;
pub mod config;
pub mod database;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod logger;
pub mod model;
pub mod time;
