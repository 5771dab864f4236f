pub mod core;

// Re-export key items for easy importing in this crate
pub use core::types;

// Re-export key items for easy importing in other crates
pub use core::app::run_main;
pub use core::coverage::analyze_coverage;
pub use core::process::check_output;
pub use core::venv::Venv;
