//! Tool modules for the agent subscriber.

pub mod base;
pub mod registry;

pub use base::{optional_bool, optional_i64, optional_string, require_string, Tool};
pub use registry::ToolRegistry;
