//! Configuration loaded from the environment (and an optional `.env`).

use crate::domain::transcode::{CodecMode, HlsProfile};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Whether a conversion request waits for the transcoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvocationMode {
    /// Respond after the transcoder exits.
    Sync,
    /// Respond immediately; progress is reported by the status endpoint.
    Detached,
}

/// CORS origins the service answers for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Directory holding one subdirectory per session
    pub artifact_root: PathBuf,
    /// Where temporary input files are written
    pub scratch_dir: PathBuf,
    /// Name or path of the ffmpeg executable
    pub ffmpeg_bin: String,
    pub profile: HlsProfile,
    pub invocation: InvocationMode,
    pub download_timeout: Duration,
    pub transcode_timeout: Option<Duration>,
    pub retention: Duration,
    pub reaper_interval: Duration,
    pub reaper_enabled: bool,
    pub allowed_origins: AllowedOrigins,
    /// Enables `video_path` requests, resolved under this directory
    pub local_source_root: Option<PathBuf>,
    pub max_upload_bytes: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let codec = match get("HLS_CODEC_MODE").as_deref() {
            None | Some("reencode") => CodecMode::Reencode {
                video: get("HLS_VIDEO_CODEC").unwrap_or_else(|| String::from("libx264")),
                audio: get("HLS_AUDIO_CODEC").unwrap_or_else(|| String::from("aac")),
            },
            Some("copy") => CodecMode::Copy,
            Some(other) => return Err(invalid("HLS_CODEC_MODE", other, "expected copy or reencode")),
        };

        let invocation = match get("INVOCATION_MODE").as_deref() {
            None | Some("sync") => InvocationMode::Sync,
            Some("detached") => InvocationMode::Detached,
            Some(other) => return Err(invalid("INVOCATION_MODE", other, "expected sync or detached")),
        };

        let segment_seconds = parse_u64(&get, "HLS_SEGMENT_SECONDS", 4)?;
        let segment_seconds = u32::try_from(segment_seconds)
            .map_err(|e| invalid("HLS_SEGMENT_SECONDS", &segment_seconds.to_string(), &e.to_string()))?;
        if segment_seconds == 0 {
            return Err(invalid("HLS_SEGMENT_SECONDS", "0", "must be positive"));
        }

        let max_upload_bytes = parse_u64(&get, "MAX_UPLOAD_BYTES", 2 * 1024 * 1024 * 1024)?;
        let max_upload_bytes = usize::try_from(max_upload_bytes)
            .map_err(|e| invalid("MAX_UPLOAD_BYTES", &max_upload_bytes.to_string(), &e.to_string()))?;

        let transcode_timeout = match get("TRANSCODE_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_secs("TRANSCODE_TIMEOUT_SECS", &raw)?)),
            None => None,
        };

        let reaper_enabled = match get("REAPER_ENABLED").as_deref() {
            None => true,
            Some(raw) => raw
                .parse::<bool>()
                .map_err(|e| invalid("REAPER_ENABLED", raw, &e.to_string()))?,
        };

        Ok(Self {
            addr: get("ADDR").unwrap_or_else(|| String::from("127.0.0.1")),
            port: get("PORT").unwrap_or_else(|| String::from("3000")),
            artifact_root: PathBuf::from(get("ARTIFACT_ROOT").unwrap_or_else(|| String::from("static"))),
            scratch_dir: get("SCRATCH_DIR").map(PathBuf::from).unwrap_or_else(env::temp_dir),
            ffmpeg_bin: get("FFMPEG_BIN").unwrap_or_else(|| String::from("ffmpeg")),
            profile: HlsProfile {
                segment_seconds,
                codec,
            },
            invocation,
            download_timeout: Duration::from_secs(parse_u64(&get, "DOWNLOAD_TIMEOUT_SECS", 60)?),
            transcode_timeout,
            retention: Duration::from_secs(parse_u64(&get, "RETENTION_SECS", 3600)?),
            reaper_interval: Duration::from_secs(parse_u64(&get, "REAPER_INTERVAL_SECS", 3600)?.max(1)),
            reaper_enabled,
            allowed_origins: parse_origins(get("ALLOWED_ORIGINS")),
            local_source_root: get("LOCAL_SOURCE_ROOT").map(PathBuf::from),
            max_upload_bytes,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

fn parse_origins(raw: Option<String>) -> AllowedOrigins {
    let Some(raw) = raw else {
        return AllowedOrigins::Any;
    };
    let origins: Vec<String> = raw
        .split(',')
        .map(|o| o.trim().trim_end_matches('/').to_string())
        .filter(|o| !o.is_empty())
        .collect();
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowedOrigins::Any
    } else {
        AllowedOrigins::List(origins)
    }
}

fn parse_u64<G>(get: &G, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_secs(key, &raw),
        None => Ok(default),
    }
}

fn parse_secs(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| invalid(key, raw, &e.to_string()))
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:3000");
        assert_eq!(config.artifact_root, PathBuf::from("static"));
        assert_eq!(config.profile.segment_seconds, 4);
        assert!(matches!(config.profile.codec, CodecMode::Reencode { .. }));
        assert_eq!(config.invocation, InvocationMode::Sync);
        assert_eq!(config.download_timeout, Duration::from_secs(60));
        assert_eq!(config.transcode_timeout, None);
        assert_eq!(config.retention, Duration::from_secs(3600));
        assert!(config.reaper_enabled);
        assert_eq!(config.allowed_origins, AllowedOrigins::Any);
        assert!(config.local_source_root.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("HLS_CODEC_MODE", "copy"),
            ("HLS_SEGMENT_SECONDS", "10"),
            ("INVOCATION_MODE", "detached"),
            ("TRANSCODE_TIMEOUT_SECS", "900"),
            ("REAPER_ENABLED", "false"),
            ("ALLOWED_ORIGINS", "https://serenekeks.com/, https://example.org"),
        ])
        .unwrap();

        assert_eq!(config.profile.codec, CodecMode::Copy);
        assert_eq!(config.profile.segment_seconds, 10);
        assert_eq!(config.invocation, InvocationMode::Detached);
        assert_eq!(config.transcode_timeout, Some(Duration::from_secs(900)));
        assert!(!config.reaper_enabled);
        assert_eq!(
            config.allowed_origins,
            AllowedOrigins::List(vec![
                "https://serenekeks.com".to_string(),
                "https://example.org".to_string()
            ])
        );
    }

    #[test]
    fn test_wildcard_origin_means_any() {
        let config = config_from(&[("ALLOWED_ORIGINS", "https://a.test,*")]).unwrap();
        assert_eq!(config.allowed_origins, AllowedOrigins::Any);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = config_from(&[("RETENTION_SECS", "an hour")]).unwrap_err();
        assert_eq!(err.key, "RETENTION_SECS");

        let err = config_from(&[("HLS_CODEC_MODE", "av1")]).unwrap_err();
        assert_eq!(err.key, "HLS_CODEC_MODE");

        let err = config_from(&[("HLS_SEGMENT_SECONDS", "0")]).unwrap_err();
        assert_eq!(err.key, "HLS_SEGMENT_SECONDS");
    }

    #[test]
    fn test_out_of_range_segment_seconds() {
        let err = config_from(&[("HLS_SEGMENT_SECONDS", "4294967296")]).unwrap_err();
        assert_eq!(err.key, "HLS_SEGMENT_SECONDS");
        assert_eq!(err.value, "4294967296");

        let config = config_from(&[("HLS_SEGMENT_SECONDS", "4294967295")]).unwrap();
        assert_eq!(config.profile.segment_seconds, u32::MAX);
    }

    #[test]
    fn test_max_upload_bytes() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.max_upload_bytes as u64, 2 * 1024 * 1024 * 1024);

        let config = config_from(&[("MAX_UPLOAD_BYTES", "1048576")]).unwrap();
        assert_eq!(config.max_upload_bytes, 1024 * 1024);

        let err = config_from(&[("MAX_UPLOAD_BYTES", "-1")]).unwrap_err();
        assert_eq!(err.key, "MAX_UPLOAD_BYTES");
    }
}
