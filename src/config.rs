//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const METADATA_FILE: &str = "metadata.json";
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_PORT: u16 = 5000;
pub const ALLOWED_EXTENSIONS: [&str; 11] = [
    "txt", "pdf", "png", "jpg", "jpeg", "gif", "doc", "docx", "xls", "xlsx", "zip",
];

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "file-depot", version = VERSION_INFO, about = "File depot server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "FILE_DEPOT_STORAGE_DIR",
        default_value = "storage",
        help = "Storage root for uploaded files and metadata.json"
    )]
    pub storage_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "FILE_DEPOT_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "FILE_DEPOT_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max request body size in bytes"
    )]
    pub max_upload_size: usize,
    #[arg(
        long,
        env = "FILE_DEPOT_CORS_ORIGINS",
        help = "Comma separated CORS origins"
    )]
    pub cors_origins: Option<String>,
}
