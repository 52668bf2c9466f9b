//! 首次运行时生成的默认页面（内嵌于二进制）。

use rust_embed::RustEmbed;
use std::io::{self, ErrorKind};
use std::path::Path;
use tokio::fs;
use tracing::info;

pub const INDEX_PAGE: &str = "index.html";
pub const UPLOAD_PAGE: &str = "upload.html";

#[derive(RustEmbed)]
#[folder = "assets/www"]
/// 默认页面模板。
pub struct DefaultPages;

/// 渲染默认页面，替换版本占位符。
pub fn render_default_page(name: &str) -> Option<String> {
    let asset = DefaultPages::get(name)?;
    let text = String::from_utf8_lossy(&asset.data);
    Some(text.replace("{{version}}", env!("CARGO_PKG_VERSION")))
}

/// 创建 www 目录，并写入缺失的 index.html 与 upload.html；已有页面不会被覆盖。
pub async fn ensure_default_pages(www_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(www_dir).await?;
    for name in [INDEX_PAGE, UPLOAD_PAGE] {
        let path = www_dir.join(name);
        match fs::metadata(&path).await {
            Ok(_) => continue,
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        let content = render_default_page(name).ok_or_else(|| {
            io::Error::new(ErrorKind::NotFound, format!("missing embedded page {name}"))
        })?;
        info!(path = ?path, "page does not exist, creating it");
        fs::write(&path, content).await?;
    }
    Ok(())
}
