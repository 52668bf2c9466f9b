//! CLI arguments and server configuration defaults.

use clap::Parser;

pub const DEFAULT_SETTINGS_PATH: &str = "settings.json";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_WWW_DIR: &str = "./www";
pub const DEFAULT_STATIC_DIR: &str = "./static";
pub const DEFAULT_LOG_DIR: &str = "./logs";
pub const DEFAULT_UPLOAD_FOLDER: &str = "./uploads";
pub const DEFAULT_SIZE_LIMIT_MIB: u64 = 128;
pub const DEFAULT_SINGLE_FILE_SIZE_LIMIT_MIB: u64 = 8;
pub const MIB: u64 = 1 << 20;
pub const MULTIPART_OVERHEAD_BYTES: u64 = 10 << 10;
pub const UPLOAD_FIELD_NAME: &str = "fileUpload";
pub const NEUTRALIZED_SUFFIX: &str = ".txt";
pub const LATEST_LOG_NAME: &str = "latest.txt";
pub const SESSION_LOG_FORMAT: &str = "%Y_%m_%d_at_%H_%M_%S";
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "simple-file-server", version, about = "Simple file server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "SFS_SETTINGS",
        default_value = DEFAULT_SETTINGS_PATH,
        help = "Path of the JSON settings file"
    )]
    pub settings: String,
    #[arg(
        short = 'b',
        long,
        env = "SFS_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "SFS_PORT",
        default_value_t = DEFAULT_HTTP_PORT,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        long,
        env = "SFS_WWW_DIR",
        default_value = DEFAULT_WWW_DIR,
        help = "Directory holding index.html and upload.html"
    )]
    pub www_dir: String,
    #[arg(
        long,
        env = "SFS_STATIC_DIR",
        default_value = DEFAULT_STATIC_DIR,
        help = "Directory served under /static"
    )]
    pub static_dir: String,
    #[arg(
        long,
        env = "SFS_LOG_DIR",
        default_value = DEFAULT_LOG_DIR,
        help = "Directory for session and latest log files"
    )]
    pub log_dir: String,
    #[arg(
        long,
        env = "SFS_NO_LOG_FILES",
        default_value_t = false,
        help = "Log to the console only"
    )]
    pub no_log_files: bool,
}
