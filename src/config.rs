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

pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_ALLOWED_EXTENSIONS: &str = "zip,rar,7z,tar,gz,bz2,xz,tar.gz";
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 15 * 60;
pub const DEFAULT_RATE_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 10 * 60;
pub const TOKEN_COOKIE_NAME: &str = "ARQ_TOKEN";
pub const NAME_RETRY_LIMIT: u32 = 16;
pub const MAX_BASE_NAME_LEN: usize = 128;
pub const HASH_READ_BUF: usize = 64 * 1024;
pub const GATE_PRUNE_INTERVAL_SECS: u64 = 300;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "arq-drop", version = VERSION_INFO, about = "ArqDrop archive upload server")]
pub struct Args {
    #[arg(
        short = 'd',
        long,
        env = "ARQ_UPLOAD_DIR",
        default_value = DEFAULT_UPLOAD_DIR,
        help = "Directory where uploaded archives are stored"
    )]
    pub upload_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "ARQ_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "ARQ_HTTP_PORT",
        default_value_t = 3000,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 'P',
        long,
        env = "ARQ_HTTPS_PORT",
        default_value_t = 3443,
        help = "HTTPS port"
    )]
    pub https_port: u16,
    #[arg(short = 'c', long, env = "ARQ_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "ARQ_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(long, env = "ARQ_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "ARQ_SECRET",
        help = "Shared upload secret; unset runs the server open"
    )]
    pub secret: Option<String>,
    #[arg(
        long,
        env = "ARQ_TOKEN_TTL_SECS",
        default_value_t = DEFAULT_TOKEN_TTL_SECS,
        help = "Access token expiration in seconds (0 to disable)"
    )]
    pub token_ttl_secs: u64,
    #[arg(
        long,
        env = "ARQ_RATE_WINDOW_SECS",
        default_value_t = DEFAULT_RATE_WINDOW_SECS,
        help = "Upload rate limit window in seconds"
    )]
    pub rate_window_secs: u64,
    #[arg(
        long,
        env = "ARQ_RATE_MAX_ATTEMPTS",
        default_value_t = DEFAULT_RATE_MAX_ATTEMPTS,
        help = "Max upload attempts per address and window (0 to disable)"
    )]
    pub rate_max_attempts: u32,
    #[arg(
        long,
        env = "ARQ_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max upload size in bytes"
    )]
    pub max_upload_size: u64,
    #[arg(
        long,
        env = "ARQ_ALLOWED_EXTENSIONS",
        default_value = DEFAULT_ALLOWED_EXTENSIONS,
        help = "Comma separated allowed archive extensions"
    )]
    pub allowed_extensions: String,
    #[arg(
        long,
        env = "ARQ_ALLOWED_CONTENT_TYPES",
        help = "Comma separated allowed content types; unset checks extensions only"
    )]
    pub allowed_content_types: Option<String>,
    #[arg(
        long,
        env = "ARQ_STRICT_CONTENT_TYPES",
        default_value_t = false,
        help = "Reject mismatched content types instead of warning"
    )]
    pub strict_content_types: bool,
    #[arg(
        long,
        env = "ARQ_UPLOAD_TIMEOUT_SECS",
        default_value_t = DEFAULT_UPLOAD_TIMEOUT_SECS,
        help = "Upload wall clock timeout in seconds (0 to disable)"
    )]
    pub upload_timeout_secs: u64,
}
