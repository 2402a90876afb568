pub mod config;
pub mod error;
pub mod execution;
pub mod result;
pub mod task;
pub mod traits;

pub use config::Config;
pub use error::*;
pub use execution::*;
pub use result::*;
pub use task::*;
pub use traits::*;
