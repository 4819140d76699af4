pub mod handler;
pub mod registry;

pub use handler::{ToolDef, ToolDefinition, ToolHandler};
pub use registry::{ToolLifecycle, ToolRegistry};
