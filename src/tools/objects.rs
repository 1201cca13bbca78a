/// Object (Blob) Tools
///
/// Listing, transfer between local files and buckets, deletion, rename, copy,
/// metadata, and signed URL generation. Local file problems are reported as
/// invalid arguments and are detected before any backend call is made.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;

use super::backend_error;
use crate::core::error::ToolError;
use crate::core::registry::{
    ParamSpec, ParamType, ReturnKind, ToolArgs, ToolContext, ToolDescriptor, ToolRegistry, ToolResult, handler,
};
use crate::storage::signing::MAX_EXPIRATION;
use crate::storage::{ObjectInfo, StorageError};

const DEFAULT_EXPIRATION_MINUTES: i64 = 15;

pub fn register(registry: &mut ToolRegistry) -> Result<(), ToolError> {
    let bucket_name = || ParamSpec::required("bucket_name", ParamType::String, "Name of the bucket");
    let blob_name = || ParamSpec::required("blob_name", ParamType::String, "Name of the object");

    registry.register(
        ToolDescriptor::new(
            "list_objects",
            "Lists all objects in a specified GCS bucket.",
            ReturnKind::TextList,
        )
        .param(bucket_name()),
        handler(list_objects),
    )?;

    registry.register(
        ToolDescriptor::new("upload_blob", "Uploads a local file to a GCS bucket.", ReturnKind::Text)
            .param(bucket_name())
            .param(ParamSpec::required(
                "source_file_name",
                ParamType::String,
                "Path of the local file to upload",
            ))
            .param(ParamSpec::required(
                "destination_blob_name",
                ParamType::String,
                "Object name to create in the bucket",
            )),
        handler(upload_blob),
    )?;

    registry.register(
        ToolDescriptor::new(
            "download_blob",
            "Downloads a blob from a GCS bucket to a local file.",
            ReturnKind::Text,
        )
        .param(bucket_name())
        .param(blob_name())
        .param(ParamSpec::required(
            "destination_file_name",
            ParamType::String,
            "Local path to write the object to",
        )),
        handler(download_blob),
    )?;

    registry.register(
        ToolDescriptor::new("delete_blob", "Deletes a blob from a GCS bucket.", ReturnKind::Text)
            .param(bucket_name())
            .param(blob_name()),
        handler(delete_blob),
    )?;

    registry.register(
        ToolDescriptor::new(
            "rename_blob",
            "Renames (moves) a blob within a GCS bucket.",
            ReturnKind::Text,
        )
        .param(bucket_name())
        .param(blob_name())
        .param(ParamSpec::required("new_name", ParamType::String, "New object name")),
        handler(rename_blob),
    )?;

    registry.register(
        ToolDescriptor::new(
            "copy_blob",
            "Copies an object from one GCS bucket to another.",
            ReturnKind::Text,
        )
        .param(ParamSpec::required(
            "source_bucket_name",
            ParamType::String,
            "Bucket holding the source object",
        ))
        .param(blob_name())
        .param(ParamSpec::required(
            "destination_bucket_name",
            ParamType::String,
            "Bucket to copy into",
        ))
        .param(ParamSpec::required(
            "destination_blob_name",
            ParamType::String,
            "Name of the copy",
        )),
        handler(copy_blob),
    )?;

    registry.register(
        ToolDescriptor::new(
            "get_blob_metadata",
            "Retrieves metadata for a specific object in a bucket.",
            ReturnKind::Mapping,
        )
        .param(bucket_name())
        .param(blob_name()),
        handler(get_blob_metadata),
    )?;

    registry.register(
        ToolDescriptor::new(
            "generate_signed_url",
            "Generates a signed URL for temporary access to a blob.",
            ReturnKind::Text,
        )
        .param(bucket_name())
        .param(blob_name())
        .param(ParamSpec::optional(
            "expiration_minutes",
            ParamType::Integer,
            "Minutes until the URL expires (1 to 10080)",
            json!(DEFAULT_EXPIRATION_MINUTES),
        )),
        handler(generate_signed_url),
    )?;

    Ok(())
}

fn object_not_found(bucket: &str, blob: &str) -> ToolError {
    ToolError::NotFound(format!("Blob '{blob}' not found in bucket '{bucket}'."))
}

fn bucket_or_object_not_found(bucket: &str, blob: &str) -> ToolError {
    ToolError::NotFound(format!("Bucket '{bucket}' or blob '{blob}' not found."))
}

async fn list_objects(ctx: ToolContext, args: ToolArgs) -> ToolResult {
    let bucket = args.string("bucket_name")?;
    let objects = ctx.storage.list_objects(&bucket).await.map_err(|e| match e {
        StorageError::NotFound(_) => ToolError::NotFound(format!("Bucket '{bucket}' not found.")),
        other => backend_error(other),
    })?;
    let names: Vec<String> = objects.into_iter().map(|o| o.name).collect();
    Ok(json!(names))
}

async fn upload_blob(ctx: ToolContext, args: ToolArgs) -> ToolResult {
    let bucket = args.string("bucket_name")?;
    let source = args.string("source_file_name")?;
    let destination = args.string("destination_blob_name")?;

    // Read the local file first so a bad path never reaches the backend
    let data = tokio::fs::read(&source).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => ToolError::InvalidArgument(format!("Local file '{source}' not found.")),
        _ => ToolError::InvalidArgument(format!("Cannot read local file '{source}': {e}")),
    })?;

    let content_type = content_type_for(Path::new(&source));
    ctx.storage
        .upload_object(&bucket, &destination, Bytes::from(data), &content_type)
        .await
        .map_err(|e| match e {
            StorageError::NotFound(_) => ToolError::NotFound(format!("Bucket '{bucket}' not found.")),
            other => backend_error(other),
        })?;

    Ok(json!(format!(
        "File '{source}' uploaded to '{destination}' in bucket '{bucket}'."
    )))
}

async fn download_blob(ctx: ToolContext, args: ToolArgs) -> ToolResult {
    let bucket = args.string("bucket_name")?;
    let blob = args.string("blob_name")?;
    let destination = args.string("destination_file_name")?;

    let data = ctx
        .storage
        .download_object(&bucket, &blob)
        .await
        .map_err(|e| match e {
            StorageError::NotFound(_) => bucket_or_object_not_found(&bucket, &blob),
            other => backend_error(other),
        })?;

    // Only touch the local filesystem once the object has been fetched
    tokio::fs::write(&destination, &data)
        .await
        .map_err(|e| ToolError::InvalidArgument(format!("Cannot write to local file '{destination}': {e}")))?;

    Ok(json!(format!(
        "Blob '{blob}' downloaded to '{destination}' ({} bytes).",
        data.len()
    )))
}

async fn delete_blob(ctx: ToolContext, args: ToolArgs) -> ToolResult {
    let bucket = args.string("bucket_name")?;
    let blob = args.string("blob_name")?;

    ctx.storage
        .delete_object(&bucket, &blob)
        .await
        .map_err(|e| match e {
            StorageError::NotFound(_) => bucket_or_object_not_found(&bucket, &blob),
            other => backend_error(other),
        })?;

    Ok(json!(format!("Blob '{blob}' deleted from bucket '{bucket}'.")))
}

async fn rename_blob(ctx: ToolContext, args: ToolArgs) -> ToolResult {
    let bucket = args.string("bucket_name")?;
    let blob = args.string("blob_name")?;
    let new_name = args.string("new_name")?;

    if new_name == blob {
        return Err(ToolError::InvalidArgument(format!(
            "New name for blob '{blob}' must differ from the current name."
        )));
    }

    // Confirm the source exists so a missing blob is reported by name
    ctx.storage.get_object(&bucket, &blob).await.map_err(|e| match e {
        StorageError::NotFound(_) => ToolError::NotFound(format!("Source blob '{blob}' not found in bucket '{bucket}'.")),
        other => backend_error(other),
    })?;

    // Rename is copy then delete; there is no atomic move
    let renamed = ctx
        .storage
        .copy_object(&bucket, &blob, &bucket, &new_name)
        .await
        .map_err(|e| match e {
            StorageError::NotFound(_) => bucket_or_object_not_found(&bucket, &blob),
            other => backend_error(other),
        })?;

    // Past this point the copy exists; a failed delete leaves both objects
    ctx.storage.delete_object(&bucket, &blob).await.map_err(|e| {
        let cause = backend_error(e);
        let message = format!(
            "Blob '{blob}' was copied to '{new_name}' in bucket '{bucket}', but the original could not be deleted; both now exist. {cause}"
        );
        cause.with_message(message)
    })?;

    Ok(json!(format!(
        "Blob '{blob}' renamed to '{}' in bucket '{bucket}'.",
        renamed.name
    )))
}

async fn copy_blob(ctx: ToolContext, args: ToolArgs) -> ToolResult {
    let source_bucket = args.string("source_bucket_name")?;
    let blob = args.string("blob_name")?;
    let destination_bucket = args.string("destination_bucket_name")?;
    let destination = args.string("destination_blob_name")?;

    ctx.storage
        .get_object(&source_bucket, &blob)
        .await
        .map_err(|e| match e {
            StorageError::NotFound(_) => ToolError::NotFound(format!(
                "Source blob '{blob}' not found in bucket '{source_bucket}'."
            )),
            other => backend_error(other),
        })?;

    // The source was just seen, so NotFound points at the destination bucket
    ctx.storage
        .copy_object(&source_bucket, &blob, &destination_bucket, &destination)
        .await
        .map_err(|e| match e {
            StorageError::NotFound(_) => ToolError::NotFound(format!(
                "Destination bucket '{destination_bucket}' not found."
            )),
            other => backend_error(other),
        })?;

    Ok(json!(format!(
        "Blob '{blob}' copied to '{destination}' in bucket '{destination_bucket}'."
    )))
}

async fn get_blob_metadata(ctx: ToolContext, args: ToolArgs) -> ToolResult {
    let bucket = args.string("bucket_name")?;
    let blob = args.string("blob_name")?;

    let info = ctx.storage.get_object(&bucket, &blob).await.map_err(|e| match e {
        StorageError::NotFound(_) => object_not_found(&bucket, &blob),
        other => backend_error(other),
    })?;
    Ok(object_metadata(&info))
}

fn object_metadata(info: &ObjectInfo) -> serde_json::Value {
    json!({
        "name": info.name,
        "bucket": info.bucket,
        "size": info.size,
        "content_type": info.content_type,
        "updated": info.updated.map(|t| t.to_rfc3339()),
        "storage_class": info.storage_class,
        "crc32c": info.crc32c,
        "md5_hash": info.md5_hash,
    })
}

async fn generate_signed_url(ctx: ToolContext, args: ToolArgs) -> ToolResult {
    let bucket = args.string("bucket_name")?;
    let blob = args.string("blob_name")?;
    let minutes = args.integer("expiration_minutes")?;

    // Bounds are checked before any backend call
    let max_minutes = (MAX_EXPIRATION.as_secs() / 60) as i64;
    if !(1..=max_minutes).contains(&minutes) {
        return Err(ToolError::InvalidArgument(format!(
            "expiration_minutes must be between 1 and {max_minutes}, got {minutes}."
        )));
    }

    ctx.storage.get_object(&bucket, &blob).await.map_err(|e| match e {
        StorageError::NotFound(_) => object_not_found(&bucket, &blob),
        other => backend_error(other),
    })?;

    let url = ctx
        .storage
        .signed_url(&bucket, &blob, Duration::from_secs(minutes as u64 * 60))
        .await
        .map_err(|e| match e {
            StorageError::SigningUnavailable(detail) => ToolError::FailedPrecondition(format!(
                "Cannot generate a signed URL without signing credentials. Details: {detail}"
            )),
            other => backend_error(other),
        })?;

    Ok(json!(url))
}

/// Content type for an upload, guessed from the file extension.
fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
