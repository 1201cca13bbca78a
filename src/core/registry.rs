/// Tool Registry
///
/// Holds the immutable set of tools the server exposes. Each entry pairs a
/// descriptor (name, parameters, return kind, description) with its async
/// handler. Tools are registered once at startup and the registry is then
/// shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};

use super::error::ToolError;
use crate::storage::StorageBackend;

/// Semantic type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    List,
}

impl ParamType {
    /// JSON Schema type keyword.
    pub fn schema_type(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::List => "array",
        }
    }
}

/// Declared parameter of a tool.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub description: &'static str,
    /// Value used when the caller omits the parameter. `None` means required.
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &'static str, ty: ParamType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            description,
            default: None,
        }
    }

    pub fn optional(name: &'static str, ty: ParamType, description: &'static str, default: Value) -> Self {
        Self {
            name,
            ty,
            description,
            default: Some(default),
        }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Shape of a tool's successful result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Text,
    TextList,
    Mapping,
}

/// MCP tool definition.
///
/// Each tool has a unique name, a description, and an ordered parameter
/// list from which the JSON input schema is derived.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    pub returns: ReturnKind,
}

impl ToolDescriptor {
    pub fn new(name: &'static str, description: &'static str, returns: ReturnKind) -> Self {
        Self {
            name,
            description,
            params: Vec::new(),
            returns,
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn find_param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// JSON Schema for the tool's arguments.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            let mut schema = json!({
                "type": param.ty.schema_type(),
                "description": param.description,
            });
            if let Some(default) = &param.default {
                schema["default"] = default.clone();
            }
            properties.insert(param.name.to_string(), schema);
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.is_required())
            .map(|p| p.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Serialized form used by `tools/list` (inputSchema in camelCase per MCP).
    pub fn to_mcp_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }
}

/// Dependencies handed to every handler invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub storage: Arc<dyn StorageBackend>,
}

impl ToolContext {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }
}

/// Validated tool arguments, with defaults already applied.
#[derive(Debug, Clone, Default)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub(crate) fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    fn get(&self, name: &str) -> Result<&Value, ToolError> {
        self.0
            .get(name)
            .ok_or_else(|| ToolError::InvalidArgument(format!("Missing required parameter: {name}")))
    }

    pub fn string(&self, name: &str) -> Result<String, ToolError> {
        self.get(name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ToolError::InvalidArgument(format!("Parameter '{name}' must be a string")))
    }

    pub fn integer(&self, name: &str) -> Result<i64, ToolError> {
        self.get(name)?
            .as_i64()
            .ok_or_else(|| ToolError::InvalidArgument(format!("Parameter '{name}' must be an integer")))
    }

    pub fn boolean(&self, name: &str) -> Result<bool, ToolError> {
        self.get(name)?
            .as_bool()
            .ok_or_else(|| ToolError::InvalidArgument(format!("Parameter '{name}' must be a boolean")))
    }

    pub fn list(&self, name: &str) -> Result<&Vec<Value>, ToolError> {
        self.get(name)?
            .as_array()
            .ok_or_else(|| ToolError::InvalidArgument(format!("Parameter '{name}' must be a list")))
    }
}

/// Result of a single tool invocation.
pub type ToolResult = Result<Value, ToolError>;

/// Tool handler function type definition.
///
/// Handlers receive the shared context and validated arguments and resolve
/// to either a JSON result or a categorized error. They must be Send + Sync
/// to be shared across HTTP worker threads.
pub type ToolHandler = Box<dyn Fn(ToolContext, ToolArgs) -> BoxFuture<'static, ToolResult> + Send + Sync>;

/// Box an async function or closure as a [`ToolHandler`].
pub fn handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(ToolContext, ToolArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolResult> + Send + 'static,
{
    Box::new(move |ctx, args| Box::pin(f(ctx, args)))
}

struct ToolEntry {
    descriptor: ToolDescriptor,
    handler: ToolHandler,
}

/// Registry of available MCP tools.
///
/// Keeps registration order for listing and a name index for dispatch.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<ToolEntry>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if a tool with the same name already exists.
    pub fn register(&mut self, descriptor: ToolDescriptor, handler: ToolHandler) -> Result<(), ToolError> {
        if self.index.contains_key(descriptor.name) {
            return Err(ToolError::DuplicateTool(descriptor.name.to_string()));
        }
        self.index.insert(descriptor.name, self.entries.len());
        self.entries.push(ToolEntry { descriptor, handler });
        Ok(())
    }

    /// Look up a tool's descriptor and handler by name.
    pub fn resolve(&self, name: &str) -> Result<(&ToolDescriptor, &ToolHandler), ToolError> {
        self.index
            .get(name)
            .map(|&i| {
                let entry = &self.entries[i];
                (&entry.descriptor, &entry.handler)
            })
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
