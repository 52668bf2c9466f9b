//! 上传目录的文件列表与下载处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path as UrlPath};
use axum::http::Request;
use axum::response::{Html, IntoResponse, Response};
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::debug;

use crate::error::ApiError;
use crate::storage::{FileEntry, Storage};

/// 列出上传目录（纯文本式 HTML 列表）。
pub async fn list_uploads(
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Html<String>, ApiError> {
    let entries = storage.list_files().await?;
    debug!(count = entries.len(), "list uploads");
    Ok(Html(render_listing(&entries)))
}

/// 下载上传目录中的文件，路径经过穿越与符号链接检查。
pub async fn serve_upload(
    UrlPath(path): UrlPath<String>,
    Extension(storage): Extension<Arc<Storage>>,
    request: Request<AxumBody>,
) -> Result<Response, ApiError> {
    let target = storage.resolve_path_checked(&path).await?;
    let metadata = tokio::fs::metadata(&target)
        .await
        .map_err(crate::storage::StorageError::from)?;
    if metadata.is_dir() {
        return Err(ApiError::NotFound("not found".into()));
    }
    let Ok(response) = ServeFile::new(target).oneshot(request).await;
    Ok(response.into_response())
}

fn render_listing(entries: &[FileEntry]) -> String {
    let mut html = String::from("<!doctype html>\n<meta charset=\"utf-8\">\n<pre>\n");
    for entry in entries {
        html.push_str(&format!(
            "<a href=\"/uploads/{}\">{}</a>  {}  {}\n",
            urlencoding::encode(&entry.name),
            escape_html(&entry.name),
            entry.size,
            entry.modified.as_deref().unwrap_or("-"),
        ));
    }
    html.push_str("</pre>\n");
    html
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
