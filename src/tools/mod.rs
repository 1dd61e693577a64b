//! Tool definitions, registry, and built-ins.

pub mod arguments;
pub mod builtin;
pub mod registry;
pub mod types;
pub mod validation;

pub use arguments::ToolInput;
pub use registry::{error_output, ToolContext, ToolDefinition, ToolExecutor, ToolHandler, ToolRegistry};
pub use types::ToolSchema;
