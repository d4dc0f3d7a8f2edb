pub mod audit;
pub mod config;
pub mod error;
pub mod io;
pub mod paths;

pub use error::{CoreError, Result};
