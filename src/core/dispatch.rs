/// Tool Dispatcher
///
/// Validates an invocation against the tool's descriptor, applies defaults,
/// and runs the handler. Nothing a handler does escapes this boundary as
/// anything other than a `ToolError`: panics are caught and reported as
/// unclassified failures.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::{Map, Value};

use super::error::ToolError;
use super::registry::{ParamType, ReturnKind, ToolArgs, ToolContext, ToolDescriptor, ToolRegistry};

/// Successful tool output together with its declared shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub returns: ReturnKind,
    pub value: Value,
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    context: ToolContext,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, context: ToolContext) -> Self {
        Self { registry, context }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Validate and execute a tool call.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        let (descriptor, handler) = self.registry.resolve(name)?;
        let args = validate(descriptor, arguments)?;

        let started = Instant::now();
        let future = handler(self.context.clone(), args);
        let result = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(tool = name, %detail, "tool handler panicked");
                Err(ToolError::Unclassified(format!("Unexpected error while running '{name}'.")))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(tool = name, elapsed_ms, "tool call succeeded"),
            Err(e) => tracing::warn!(tool = name, elapsed_ms, category = e.category(), error = %e, "tool call failed"),
        }

        result.map(|value| ToolOutput {
            returns: descriptor.returns,
            value,
        })
    }
}

/// Check arguments against a descriptor and apply defaults.
pub fn validate(descriptor: &ToolDescriptor, arguments: Value) -> Result<ToolArgs, ToolError> {
    let provided = match arguments {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(ToolError::InvalidArgument(format!(
                "Arguments for '{}' must be an object, got {}",
                descriptor.name,
                json_type_name(&other)
            )));
        }
    };

    if let Some(unknown) = provided.keys().find(|k| descriptor.find_param(k).is_none()) {
        return Err(ToolError::InvalidArgument(format!(
            "Unknown parameter '{unknown}' for tool '{}'",
            descriptor.name
        )));
    }

    let mut validated = Map::new();
    for param in &descriptor.params {
        let value = match provided.get(param.name) {
            Some(Value::Null) | None => match &param.default {
                Some(default) => default.clone(),
                None => {
                    return Err(ToolError::InvalidArgument(format!(
                        "Missing required parameter: {}",
                        param.name
                    )));
                }
            },
            Some(value) => coerce(param.ty, value).ok_or_else(|| {
                ToolError::InvalidArgument(format!(
                    "Parameter '{}' must be of type {}, got {}",
                    param.name,
                    param.ty.schema_type(),
                    json_type_name(value)
                ))
            })?,
        };
        validated.insert(param.name.to_string(), value);
    }

    Ok(ToolArgs::from_map(validated))
}

/// Convert a JSON value to the declared type, accepting lossless coercions.
fn coerce(ty: ParamType, value: &Value) -> Option<Value> {
    match (ty, value) {
        (ParamType::String, Value::String(_)) => Some(value.clone()),
        (ParamType::Integer, Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64).map(|f| f as i64))
            .map(Value::from),
        (ParamType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (ParamType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (ParamType::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (ParamType::List, Value::Array(_)) => Some(value.clone()),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
