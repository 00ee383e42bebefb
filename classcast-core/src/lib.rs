//! Core domain for the classcast streaming origin: configuration, errors,
//! logging, the data model, and the in-memory room hub.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod room;

pub use config::Config;
pub use error::{Error, Result};
