pub mod config;
pub mod error;
pub mod node;
pub mod notifier;
pub mod recovery;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod store;
pub mod transport;
pub mod worker;

pub use error::{PoolError, Result};
