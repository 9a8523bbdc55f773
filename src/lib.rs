//! Session recording lifecycle management
//!
//! Imports finished session recordings from a gateway's output directory into
//! managed storage, catalogs them, and maintains them over time: tier
//! migration with compression, content integrity checks, retention and
//! deletion, all driven by a cron scheduler.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod services;

pub use error::{ItemError, LifecycleError, LifecycleResult};
