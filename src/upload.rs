//! 表单上传处理器：只读检查、multipart 解析、限额校验与提交。

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Extension, Multipart};
use axum::http::StatusCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::UPLOAD_FIELD_NAME;
use crate::error::ApiError;
use crate::http::ClientAddr;
use crate::storage::{Storage, StorageError};

pub const UPLOAD_SUCCESS: &str = "File upload successful.";
pub const UPLOAD_FAILED: &str = "File upload failed! See log for details.";
pub const FILE_TOO_LARGE: &str = "File too large!";
pub const NOT_ENOUGH_SPACE: &str = "Not enough space to upload this file.";
pub const READ_ONLY: &str =
    "Cannot upload file: Directory is marked as readonly in the settings.";
pub const INVALID_FILE_NAME: &str = "Invalid file name.";

/// 处理 `POST /upload`，表单字段名为 `fileUpload`。
pub async fn upload_file(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(client): Extension<ClientAddr>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, &'static str), ApiError> {
    if storage.limits().read_only {
        warn!(%client, "{}", READ_ONLY);
        return Err(ApiError::Forbidden(READ_ONLY.into()));
    }

    let mut multipart = multipart.map_err(|err| {
        warn!(%client, error = %err, "error when parsing file upload");
        ApiError::BadRequest(UPLOAD_FAILED.into())
    })?;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                warn!(%client, field = UPLOAD_FIELD_NAME, "upload form has no file field");
                return Err(ApiError::BadRequest(UPLOAD_FAILED.into()));
            }
            Err(err) => {
                return Err(rejection(&client, "", StorageError::from(err)));
            }
        };
        if field.name() != Some(UPLOAD_FIELD_NAME) {
            continue;
        }

        let Some(file_name) = field.file_name().map(str::to_string) else {
            warn!(%client, field = UPLOAD_FIELD_NAME, "file field has no file name");
            return Err(ApiError::BadRequest(UPLOAD_FAILED.into()));
        };
        info!(%client, name = file_name, "uploading file");
        return match storage.store(&file_name, field).await {
            Ok(stored) => {
                info!(
                    %client,
                    name = stored.name,
                    size = stored.size,
                    space_used = stored.space_used,
                    "file upload successful"
                );
                Ok((StatusCode::CREATED, UPLOAD_SUCCESS))
            }
            Err(err) => Err(rejection(&client, &file_name, err)),
        };
    }
}

fn rejection(client: &ClientAddr, file_name: &str, err: StorageError) -> ApiError {
    match err {
        StorageError::InvalidName | StorageError::InvalidPath => {
            warn!(%client, name = file_name, "rejected unsafe file name");
            ApiError::BadRequest(INVALID_FILE_NAME.into())
        }
        StorageError::FileTooLarge => {
            warn!(%client, name = file_name, "file too large");
            ApiError::PayloadTooLarge(FILE_TOO_LARGE.into())
        }
        StorageError::QuotaExceeded => {
            warn!(%client, name = file_name, "not enough space for the file");
            ApiError::InsufficientStorage(NOT_ENOUGH_SPACE.into())
        }
        StorageError::Stream(cause) => {
            warn!(%client, name = file_name, error = cause, "error when parsing file upload");
            ApiError::BadRequest(UPLOAD_FAILED.into())
        }
        StorageError::Io(cause) => {
            error!(%client, name = file_name, error = %cause, "failed to store uploaded file");
            ApiError::Internal(UPLOAD_FAILED.into())
        }
    }
}
