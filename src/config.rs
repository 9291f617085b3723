use anyhow::Result;
use regex::Regex;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_TRANSCODE_EXTENSIONS: &[&str] = &["flac", "wav", "ape", "alac", "aiff", "wv", "tta", "dsf", "dff"];
pub const DEFAULT_WORK_ID_PATTERN: &str = r"^[RBV]J\d{6,8}$";

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,

    // Transcoding
    pub transcode_cache_dir: PathBuf,
    pub ffmpeg_path: String,
    pub transcode_extensions: Vec<String>,
    pub min_bitrate: u32,
    pub max_bitrate: u32,
    /// `None` lets the encoder run without a wall clock limit
    pub transcode_timeout_seconds: Option<u64>,

    // Delivery
    pub media_cache_max_age_seconds: u64,

    // Storage
    pub webdav_timeout_seconds: u64,
    pub work_id_pattern: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: "0.0.0.0:8888".to_string(),
            database_url: "sqlite://media-vault.db?mode=rwc".to_string(),
            transcode_cache_dir: PathBuf::from("./cache/transcode"),
            ffmpeg_path: "ffmpeg".to_string(),
            transcode_extensions: DEFAULT_TRANSCODE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            min_bitrate: 32,
            max_bitrate: 512,
            transcode_timeout_seconds: Some(3600),
            media_cache_max_age_seconds: 604_800,
            webdav_timeout_seconds: 30,
            work_id_pattern: DEFAULT_WORK_ID_PATTERN.to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", name, value, e)),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!("Failed to load .env file: {}", e);
            }
        }

        let defaults = Config::default();

        let transcode_extensions = match env::var("TRANSCODE_EXTENSIONS") {
            Ok(value) => value
                .split(',')
                .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
            Err(_) => defaults.transcode_extensions.clone(),
        };

        let transcode_timeout_seconds = match parse_env("TRANSCODE_TIMEOUT_SECONDS", 3600u64)? {
            0 => None,
            seconds => Some(seconds),
        };

        let config = Config {
            server_address: env::var("SERVER_ADDRESS").unwrap_or(defaults.server_address),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            transcode_cache_dir: env::var("TRANSCODE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.transcode_cache_dir),
            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            transcode_extensions,
            min_bitrate: parse_env("TRANSCODE_MIN_BITRATE", defaults.min_bitrate)?,
            max_bitrate: parse_env("TRANSCODE_MAX_BITRATE", defaults.max_bitrate)?,
            transcode_timeout_seconds,
            media_cache_max_age_seconds: parse_env("MEDIA_CACHE_MAX_AGE_SECONDS", defaults.media_cache_max_age_seconds)?,
            webdav_timeout_seconds: parse_env("WEBDAV_TIMEOUT_SECONDS", defaults.webdav_timeout_seconds)?,
            work_id_pattern: env::var("WORK_ID_PATTERN").unwrap_or(defaults.work_id_pattern),
        };

        config.validate()?;

        info!("Configuration loaded:");
        info!("  SERVER_ADDRESS: {}", config.server_address);
        info!("  DATABASE_URL: {}", config.database_url);
        info!("  TRANSCODE_CACHE_DIR: {}", config.transcode_cache_dir.display());
        info!("  TRANSCODE_EXTENSIONS: {}", config.transcode_extensions.join(","));
        info!("  TRANSCODE_BITRATE_RANGE: {}-{} kbps", config.min_bitrate, config.max_bitrate);

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_bitrate == 0 || self.min_bitrate > self.max_bitrate {
            return Err(anyhow::anyhow!(
                "Invalid transcode bitrate range {}-{}",
                self.min_bitrate,
                self.max_bitrate
            ));
        }
        self.work_id_regex()?;
        Ok(())
    }

    pub fn work_id_regex(&self) -> Result<Regex> {
        Regex::new(&self.work_id_pattern)
            .map_err(|e| anyhow::anyhow!("Invalid WORK_ID_PATTERN '{}': {}", self.work_id_pattern, e))
    }

    pub fn webdav_timeout(&self) -> Duration {
        Duration::from_secs(self.webdav_timeout_seconds)
    }

    pub fn transcode_timeout(&self) -> Option<Duration> {
        self.transcode_timeout_seconds.map(Duration::from_secs)
    }

    pub fn is_transcodable_extension(&self, extension: &str) -> bool {
        self.transcode_extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }
}
