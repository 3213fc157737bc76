pub mod activity;
pub mod config;
pub mod datasets;
pub mod entities;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod methods;
pub mod sanitize;
pub mod session;
pub mod transport;
pub mod ui;
pub mod workflows;

pub use error::{Error, Result};
