pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod procedure;
pub mod store;

pub use config::Config;
pub use error::{DaoError, DaoResult};
pub use store::ResultStore;
