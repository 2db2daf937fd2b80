use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_AGE_SECS: u64 = 30 * 60;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub max_upload_bytes: u64,
    pub sweep_interval_secs: u64,
    pub max_age_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "ZIP-to-APK build service")]
pub struct Args {
    /// Host to bind to (overrides APK_FORGE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploads are stored (overrides APK_FORGE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Maximum accepted upload size in bytes (overrides APK_FORGE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Seconds between expiry sweeps (overrides APK_FORGE_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Age in seconds after which an undownloaded upload is reclaimed
    /// (overrides APK_FORGE_MAX_AGE_SECS)
    #[arg(long)]
    pub max_age_secs: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("APK_FORGE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse::<u16>("PORT")?.unwrap_or(DEFAULT_PORT);
        let env_storage = env::var("APK_FORGE_STORAGE_DIR").unwrap_or_else(|_| "./uploads".into());
        let env_max_upload =
            env_parse::<u64>("APK_FORGE_MAX_UPLOAD_BYTES")?.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        let env_sweep_interval = env_parse::<u64>("APK_FORGE_SWEEP_INTERVAL_SECS")?
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
        let env_max_age = env_parse::<u64>("APK_FORGE_MAX_AGE_SECS")?.unwrap_or(DEFAULT_MAX_AGE_SECS);

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            sweep_interval_secs: args.sweep_interval_secs.unwrap_or(env_sweep_interval),
            max_age_secs: args.max_age_secs.unwrap_or(env_max_age),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an environment variable, treating "not present" as None.
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
