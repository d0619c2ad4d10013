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

pub const DEFAULT_STORAGE_DIR: &str = "./uploads";
pub const DEFAULT_API_KEY: &str = "my-secret-api-key";
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_LOCK_WAIT_TIMEOUT_SECS: u64 = 30;
pub const API_KEY_HEADER: &str = "x-api-key";
pub const METADATA_SUFFIX: &str = ".metadata";
pub const PUBLIC_PATH_PREFIX: &str = "/uploads/";

/// CLI arguments. Every option defaults to the compiled-in constant above.
#[derive(Parser, Debug)]
#[command(name = "upload-shelf", version = VERSION_INFO, about = "File upload service")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "SHELF_STORAGE_DIR",
        default_value = DEFAULT_STORAGE_DIR,
        help = "Directory that receives uploaded files and their metadata"
    )]
    pub storage_dir: String,
    #[arg(
        long,
        env = "SHELF_API_KEY",
        default_value = DEFAULT_API_KEY,
        hide_env_values = true,
        help = "Shared secret expected in the X-API-Key header"
    )]
    pub api_key: String,
    #[arg(
        short = 'b',
        long = "bind",
        env = "SHELF_BIND",
        default_value = DEFAULT_BIND,
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "SHELF_PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "SHELF_CORS_ORIGIN",
        default_value = DEFAULT_CORS_ORIGIN,
        help = "Single origin allowed by CORS (empty to disable CORS)"
    )]
    pub cors_origin: String,
    #[arg(
        long = "lock-wait-secs",
        env = "SHELF_LOCK_WAIT_SECS",
        default_value_t = DEFAULT_LOCK_WAIT_TIMEOUT_SECS,
        help = "How long an upload waits for another upload of the same name"
    )]
    pub lock_wait_secs: u64,
}
