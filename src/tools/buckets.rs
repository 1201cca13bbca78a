/// Bucket Tools
///
/// Each handler performs one logical backend operation and maps the backend's
/// error categories to messages that name the bucket involved.

use serde_json::json;

use super::backend_error;
use crate::core::config::ToolDefaults;
use crate::core::error::ToolError;
use crate::core::registry::{
    ParamSpec, ParamType, ReturnKind, ToolArgs, ToolContext, ToolDescriptor, ToolRegistry, ToolResult, handler,
};
use crate::storage::{BucketInfo, CorsRule, StorageError};

pub fn register(registry: &mut ToolRegistry, defaults: &ToolDefaults) -> Result<(), ToolError> {
    let bucket_name = || ParamSpec::required("bucket_name", ParamType::String, "Name of the bucket");

    registry.register(
        ToolDescriptor::new(
            "list_gcs_buckets",
            "Lists all GCS buckets in the project.",
            ReturnKind::TextList,
        ),
        handler(list_gcs_buckets),
    )?;

    registry.register(
        ToolDescriptor::new(
            "create_bucket",
            "Creates a new GCS bucket. Bucket names must be globally unique.",
            ReturnKind::Text,
        )
        .param(bucket_name())
        .param(ParamSpec::optional(
            "location",
            ParamType::String,
            "Bucket location, e.g. US, EU, or a region such as us-central1",
            json!(defaults.bucket_location),
        )),
        handler(create_bucket),
    )?;

    registry.register(
        ToolDescriptor::new(
            "delete_bucket",
            "Deletes a GCS bucket. The bucket must be empty unless force is set.",
            ReturnKind::Text,
        )
        .param(bucket_name())
        .param(ParamSpec::optional(
            "force",
            ParamType::Boolean,
            "Delete every object in the bucket first",
            json!(false),
        )),
        handler(delete_bucket),
    )?;

    registry.register(
        ToolDescriptor::new(
            "get_bucket_metadata",
            "Retrieves metadata for a GCS bucket.",
            ReturnKind::Mapping,
        )
        .param(bucket_name()),
        handler(get_bucket_metadata),
    )?;

    registry.register(
        ToolDescriptor::new(
            "set_bucket_cors",
            "Sets the CORS configuration for a bucket.",
            ReturnKind::Text,
        )
        .param(bucket_name())
        .param(ParamSpec::required(
            "cors_rules",
            ParamType::List,
            "CORS rules, each with origin, method, responseHeader and maxAgeSeconds",
        )),
        handler(set_bucket_cors),
    )?;

    Ok(())
}

async fn list_gcs_buckets(ctx: ToolContext, _args: ToolArgs) -> ToolResult {
    let buckets = ctx.storage.list_buckets().await.map_err(|e| match e {
        StorageError::Forbidden(detail) => {
            ToolError::PermissionDenied(format!("Permission denied to list buckets. Details: {detail}"))
        }
        other => backend_error(other),
    })?;
    let names: Vec<String> = buckets.into_iter().map(|b| b.name).collect();
    Ok(json!(names))
}

async fn create_bucket(ctx: ToolContext, args: ToolArgs) -> ToolResult {
    let bucket = args.string("bucket_name")?;
    let location = args.string("location")?;

    let created = ctx
        .storage
        .create_bucket(&bucket, &location)
        .await
        .map_err(|e| match e {
            StorageError::Conflict(_) => ToolError::AlreadyExists(format!("Bucket '{bucket}' already exists.")),
            StorageError::BadRequest(detail) => ToolError::InvalidArgument(format!(
                "Cannot create bucket '{bucket}' in location '{location}'. Details: {detail}"
            )),
            StorageError::Forbidden(detail) => {
                ToolError::PermissionDenied(format!("Permission denied to create bucket. Details: {detail}"))
            }
            other => backend_error(other),
        })?;

    // Report the location the backend actually assigned
    let location = created.location.unwrap_or(location);
    Ok(json!(format!(
        "Bucket '{bucket}' created successfully in location '{location}'."
    )))
}

async fn delete_bucket(ctx: ToolContext, args: ToolArgs) -> ToolResult {
    let bucket = args.string("bucket_name")?;
    let force = args.boolean("force")?;

    let not_found = || ToolError::NotFound(format!("Bucket '{bucket}' not found."));
    let map_err = |e: StorageError| match e {
        StorageError::NotFound(_) => not_found(),
        StorageError::Conflict(_) => ToolError::FailedPrecondition(format!(
            "Bucket '{bucket}' is not empty. Set force to true to delete its objects first."
        )),
        StorageError::Forbidden(detail) => ToolError::PermissionDenied(format!(
            "Permission denied to delete bucket '{bucket}'. Details: {detail}"
        )),
        other => backend_error(other),
    };

    // With force, empty the bucket first; the backend refuses non-empty deletes
    let mut removed = 0usize;
    if force {
        let objects = ctx.storage.list_objects(&bucket).await.map_err(&map_err)?;
        for object in objects {
            match ctx.storage.delete_object(&bucket, &object.name).await {
                Ok(()) => removed += 1,
                // Deleted concurrently by someone else.
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(map_err(e)),
            }
        }
    }

    ctx.storage.delete_bucket(&bucket).await.map_err(&map_err)?;

    if removed > 0 {
        Ok(json!(format!(
            "Bucket '{bucket}' and its {removed} object(s) deleted successfully."
        )))
    } else {
        Ok(json!(format!("Bucket '{bucket}' deleted successfully.")))
    }
}

async fn get_bucket_metadata(ctx: ToolContext, args: ToolArgs) -> ToolResult {
    let bucket = args.string("bucket_name")?;
    let info = ctx.storage.get_bucket(&bucket).await.map_err(|e| match e {
        StorageError::NotFound(_) => ToolError::NotFound(format!("Bucket '{bucket}' not found.")),
        other => backend_error(other),
    })?;
    Ok(bucket_metadata(&info))
}

fn bucket_metadata(info: &BucketInfo) -> serde_json::Value {
    json!({
        "id": info.id,
        "name": info.name,
        "location": info.location,
        "storage_class": info.storage_class,
        "created": info.time_created.map(|t| t.to_rfc3339()),
        "updated": info.updated.map(|t| t.to_rfc3339()),
        "versioning_enabled": info.versioning_enabled,
        "labels": info.labels,
        "cors": info.cors,
    })
}

async fn set_bucket_cors(ctx: ToolContext, args: ToolArgs) -> ToolResult {
    let bucket = args.string("bucket_name")?;
    // Reject malformed rules before calling the backend
    let rules = parse_cors_rules(args.list("cors_rules")?)?;

    ctx.storage
        .set_bucket_cors(&bucket, &rules)
        .await
        .map_err(|e| match e {
            StorageError::NotFound(_) => ToolError::NotFound(format!("Bucket '{bucket}' not found.")),
            StorageError::BadRequest(detail) => {
                ToolError::InvalidArgument(format!("CORS configuration rejected for '{bucket}'. Details: {detail}"))
            }
            StorageError::Forbidden(detail) => ToolError::PermissionDenied(format!(
                "Permission denied to update bucket '{bucket}'. Details: {detail}"
            )),
            other => backend_error(other),
        })?;

    Ok(json!(format!(
        "CORS configuration updated for bucket '{bucket}' ({} rule(s)).",
        rules.len()
    )))
}

fn parse_cors_rules(values: &[serde_json::Value]) -> Result<Vec<CorsRule>, ToolError> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let rule: CorsRule = serde_json::from_value(value.clone())
                .map_err(|e| ToolError::InvalidArgument(format!("Invalid CORS rule at index {i}: {e}")))?;
            if rule.origin.is_empty() || rule.method.is_empty() {
                return Err(ToolError::InvalidArgument(format!(
                    "Invalid CORS rule at index {i}: 'origin' and 'method' must be non-empty lists"
                )));
            }
            Ok(rule)
        })
        .collect()
}
