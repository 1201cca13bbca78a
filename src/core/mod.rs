/// Core Server Framework Module
///
/// This module contains the core server implementation including:
/// - config.rs: environment-driven server configuration
/// - error.rs: normalized tool error categories
/// - registry.rs: tool descriptors, parameter specs and the registry
/// - dispatch.rs: argument validation and tool invocation
/// - server.rs: MCP server implementation with HTTP and STDIO transport

pub mod config;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod server;
