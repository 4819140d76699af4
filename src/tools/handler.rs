use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// A tool's execution handler. Consumers implement this for each tool.
/// Handlers must honor the cancellation token where they can and must
/// encode failures in the returned `Err` string; the registry turns both
/// into the uniform result envelope.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: &Value, cancel: &CancellationToken) -> Result<Value, String>;
}

/// What the model sees about a tool. The registry does not validate
/// arguments against `parameters`; tools do.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// The complete JSON definition sent to the model.
    pub fn schema(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.parameters,
        })
    }
}

/// A registered tool: definition for the model, handler for execution.
pub struct ToolDef {
    pub definition: ToolDefinition,
    pub(crate) handler: Box<dyn ToolHandler>,
}
