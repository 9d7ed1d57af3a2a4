pub mod agent;
pub mod charts;
pub mod config;
pub mod constants;
pub mod error;
pub mod gym;
pub mod history;
pub mod types;

pub use error::{Error, Result};
