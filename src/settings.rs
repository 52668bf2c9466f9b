//! 设置文件的加载、保存与首次运行引导。

use serde::{Deserialize, Serialize};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::{
    DEFAULT_SINGLE_FILE_SIZE_LIMIT_MIB, DEFAULT_SIZE_LIMIT_MIB, DEFAULT_UPLOAD_FOLDER, MIB,
    MULTIPART_OVERHEAD_BYTES,
};

/// 持久化的服务器设置，字段名与 `settings.json` 保持一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Settings {
    pub folder_path: String,
    /// 上传目录总配额（MiB）
    pub size_limit: u64,
    /// 单文件大小上限（MiB）
    pub single_file_size_limit: u64,
    pub read_only: bool,
    pub forbidden_extensions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            folder_path: DEFAULT_UPLOAD_FOLDER.to_string(),
            size_limit: DEFAULT_SIZE_LIMIT_MIB,
            single_file_size_limit: DEFAULT_SINGLE_FILE_SIZE_LIMIT_MIB,
            read_only: false,
            forbidden_extensions: vec![".html".to_string()],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings file {0} does not exist")]
    NotFound(PathBuf),
    #[error("failed to access settings file: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// 启动阶段的结果：写入了默认设置，或加载了已有设置。
#[derive(Debug)]
pub enum Startup {
    WroteDefaults(PathBuf),
    Loaded(Settings),
}

/// 运行时使用的字节级限制，只在启动时由 MiB 换算一次。
#[derive(Debug, Clone)]
pub struct Limits {
    pub size_limit_bytes: u64,
    pub single_file_size_limit_bytes: u64,
    pub max_multipart_bytes: u64,
    pub read_only: bool,
    pub forbidden_extensions: Vec<String>,
}

impl Settings {
    /// 从 JSON 文件读取设置。
    pub async fn load(path: &Path) -> Result<Self, SettingsError> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SettingsError::NotFound(path.to_path_buf()));
            }
            Err(err) => return Err(SettingsError::Io(err)),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// 序列化为 JSON 并覆盖写入。
    pub async fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.folder_path.trim().is_empty() {
            return Err(SettingsError::Invalid("FolderPath must not be empty".into()));
        }
        if self.size_limit == 0 {
            return Err(SettingsError::Invalid("SizeLimit must be positive".into()));
        }
        if self.single_file_size_limit > self.size_limit {
            return Err(SettingsError::Invalid(format!(
                "SingleFileSizeLimit ({}) exceeds SizeLimit ({})",
                self.single_file_size_limit, self.size_limit
            )));
        }
        if let Some(ext) = self
            .forbidden_extensions
            .iter()
            .find(|ext| !ext.starts_with('.') || ext.len() < 2)
        {
            return Err(SettingsError::Invalid(format!(
                "forbidden extension {ext:?} must start with '.'"
            )));
        }
        self.limits().map(|_| ())
    }

    /// 将 MiB 配置换算为字节限制。
    pub fn limits(&self) -> Result<Limits, SettingsError> {
        let size_limit_bytes = mib_to_bytes(self.size_limit, "SizeLimit")?;
        let single_file_size_limit_bytes =
            mib_to_bytes(self.single_file_size_limit, "SingleFileSizeLimit")?;
        Ok(Limits {
            size_limit_bytes,
            single_file_size_limit_bytes,
            max_multipart_bytes: single_file_size_limit_bytes
                .saturating_add(MULTIPART_OVERHEAD_BYTES),
            read_only: self.read_only,
            forbidden_extensions: self.forbidden_extensions.clone(),
        })
    }
}

fn mib_to_bytes(value: u64, field: &str) -> Result<u64, SettingsError> {
    value
        .checked_mul(MIB)
        .ok_or_else(|| SettingsError::Invalid(format!("{field} is too large")))
}

/// 加载设置；文件不存在时写入默认设置并返回 `WroteDefaults`。
pub async fn bootstrap(path: &Path) -> Result<Startup, SettingsError> {
    match Settings::load(path).await {
        Ok(settings) => {
            settings.validate()?;
            Ok(Startup::Loaded(settings))
        }
        Err(SettingsError::NotFound(path)) => {
            Settings::default().save(&path).await?;
            Ok(Startup::WroteDefaults(path))
        }
        Err(err) => Err(err),
    }
}
