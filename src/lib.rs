pub mod access;
pub mod audit;
pub mod error;
pub mod metadata;
pub mod service;
pub mod storage;

mod types;

pub use error::{CoreError, Result};
pub use types::*;
