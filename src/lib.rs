pub mod cli;
pub mod config;
pub mod embed;
pub mod error;
pub mod facedb;
pub mod index;
pub mod ledger;
mod metrics;
mod server;
pub mod store;
pub mod utils;
pub mod validate;

pub use config::Opts;
pub use facedb::{FaceDB, FaceDBBuilder};
