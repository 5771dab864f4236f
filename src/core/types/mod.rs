pub mod config;
mod error;
mod result;
mod stats;
mod target;

pub use error::*;
pub use result::*;
pub use stats::*;
pub use target::*;
