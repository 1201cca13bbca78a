/// Greeting and Health Check Tools
///
/// Connectivity helpers that do not touch storage: `greet` echoes a friendly
/// message back to the caller and `health_check` confirms the server is up.

use serde_json::{Value, json};

use crate::core::error::ToolError;
use crate::core::registry::{
    ParamSpec, ParamType, ReturnKind, ToolArgs, ToolContext, ToolDescriptor, ToolRegistry, ToolResult, handler,
};

pub fn register(registry: &mut ToolRegistry) -> Result<(), ToolError> {
    registry.register(
        ToolDescriptor::new("greet", "Returns a friendly greeting.", ReturnKind::Text).param(ParamSpec::required(
            "name",
            ParamType::String,
            "Name of the person to greet",
        )),
        handler(greet),
    )?;

    registry.register(
        ToolDescriptor::new("health_check", "Reports whether the server is running.", ReturnKind::Text),
        handler(health_check),
    )?;

    Ok(())
}

async fn greet(_ctx: ToolContext, args: ToolArgs) -> ToolResult {
    let name = args.string("name")?;
    Ok(json!(format!(
        "Hello {name}! It's a pleasure to connect from the GCS MCP Server."
    )))
}

async fn health_check(_ctx: ToolContext, _args: ToolArgs) -> ToolResult {
    Ok(Value::String("Server is up and running!".to_string()))
}
