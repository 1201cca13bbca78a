/// Tools Module
///
/// This module contains all MCP tool implementations. Each submodule exports a
/// `register` function that adds its tools to the registry during server
/// initialization:
/// - greet.rs: greeting and health check
/// - buckets.rs: bucket listing, creation, deletion, metadata, CORS
/// - objects.rs: object listing, transfer, deletion, rename, copy, metadata, signed URLs

pub mod buckets;
pub mod greet;
pub mod objects;

use crate::core::config::ToolDefaults;
use crate::core::error::ToolError;
use crate::core::registry::ToolRegistry;
use crate::storage::StorageError;

/// Register every tool the server exposes.
pub fn register_all(registry: &mut ToolRegistry, defaults: &ToolDefaults) -> Result<(), ToolError> {
    greet::register(registry)?;
    buckets::register(registry, defaults)?;
    objects::register(registry)?;
    Ok(())
}

/// Translation for backend errors a handler does not map itself.
pub(crate) fn backend_error(err: StorageError) -> ToolError {
    match err {
        StorageError::NotFound(detail) => ToolError::NotFound(format!("Resource not found. Details: {detail}")),
        StorageError::Forbidden(detail) => ToolError::PermissionDenied(format!("Permission denied. Details: {detail}")),
        StorageError::Conflict(detail) => ToolError::AlreadyExists(format!("Resource already exists. Details: {detail}")),
        StorageError::BadRequest(detail) => ToolError::InvalidArgument(format!("Invalid request. Details: {detail}")),
        StorageError::PreconditionFailed(detail) | StorageError::SigningUnavailable(detail) => {
            ToolError::FailedPrecondition(format!("Precondition failed. Details: {detail}"))
        }
        other => ToolError::Unclassified(format!("An unexpected error occurred: {other}")),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use super::*;
    use crate::core::dispatch::Dispatcher;
    use crate::core::registry::ToolContext;
    use crate::storage::memory::MemoryStorage;

    /// Dispatcher over all tools backed by `storage`, plus a handle to inspect it.
    pub(crate) fn dispatcher_with(storage: MemoryStorage) -> (Dispatcher, Arc<MemoryStorage>) {
        let storage = Arc::new(storage);
        let mut registry = ToolRegistry::new();
        let defaults = ToolDefaults {
            bucket_location: "US".to_string(),
        };
        register_all(&mut registry, &defaults).unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry), ToolContext::new(storage.clone()));
        (dispatcher, storage)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::dispatcher_with;
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use serde_json::{Value, json};

    const ALL_TOOLS: &[&str] = &[
        "greet",
        "health_check",
        "list_gcs_buckets",
        "create_bucket",
        "delete_bucket",
        "get_bucket_metadata",
        "set_bucket_cors",
        "list_objects",
        "upload_blob",
        "download_blob",
        "delete_blob",
        "rename_blob",
        "copy_blob",
        "get_blob_metadata",
        "generate_signed_url",
    ];

    #[test]
    fn registers_every_tool_once() {
        let (dispatcher, _) = dispatcher_with(MemoryStorage::new());
        let names: Vec<_> = dispatcher.registry().list().map(|d| d.name).collect();
        assert_eq!(names.len(), ALL_TOOLS.len());
        for tool in ALL_TOOLS {
            assert!(names.contains(tool), "missing tool {tool}");
        }
    }

    #[test]
    fn registering_twice_fails() {
        let mut registry = ToolRegistry::new();
        let defaults = ToolDefaults {
            bucket_location: "US".to_string(),
        };
        register_all(&mut registry, &defaults).unwrap();
        assert!(matches!(
            register_all(&mut registry, &defaults),
            Err(ToolError::DuplicateTool(_))
        ));
    }

    #[tokio::test]
    async fn every_required_parameter_is_enforced() {
        let (dispatcher, _) = dispatcher_with(MemoryStorage::new());
        for descriptor in dispatcher.registry().list() {
            let required: Vec<_> = descriptor.params.iter().filter(|p| p.is_required()).collect();
            for missing in &required {
                // Provide every other required parameter with a well-typed placeholder.
                let mut args = serde_json::Map::new();
                for param in required.iter().filter(|p| p.name != missing.name) {
                    let placeholder = match param.ty.schema_type() {
                        "array" => json!([]),
                        "integer" => json!(1),
                        "boolean" => json!(false),
                        _ => json!("placeholder"),
                    };
                    args.insert(param.name.to_string(), placeholder);
                }
                let err = dispatcher
                    .dispatch(descriptor.name, Value::Object(args))
                    .await
                    .unwrap_err();
                assert_eq!(
                    err,
                    ToolError::InvalidArgument(format!("Missing required parameter: {}", missing.name)),
                    "tool {}",
                    descriptor.name
                );
            }
        }
    }

    #[test]
    fn fallback_mapping_keeps_categories_distinct() {
        assert_eq!(backend_error(StorageError::NotFound("x".into())).category(), "not_found");
        assert_eq!(backend_error(StorageError::Forbidden("x".into())).category(), "permission_denied");
        assert_eq!(backend_error(StorageError::Conflict("x".into())).category(), "already_exists");
        assert_eq!(
            backend_error(StorageError::Unexpected {
                status: 500,
                message: "boom".into()
            })
            .category(),
            "unclassified"
        );
    }
}
