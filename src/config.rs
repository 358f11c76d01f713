use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_API_URL: &str = "http://127.0.0.1:4000/api";
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SOURCE: &str = "stub://webcam";
const DEFAULT_CAPTURE_WIDTH: u32 = 640;
const DEFAULT_CAPTURE_HEIGHT: u32 = 480;
const DEFAULT_CAPTURE_FPS: u32 = 30;
const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_MIN_SCORE: f32 = 0.5;
const DEFAULT_MAX_DETECTIONS: usize = 20;
const DEFAULT_TICK_INTERVAL_MS: u64 = 16;
const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:4000";
const DEFAULT_DB_PATH: &str = "detections.db";

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    api_url: Option<String>,
    http_timeout_ms: Option<u64>,
    capture: Option<CaptureConfigFile>,
    detector: Option<DetectorConfigFile>,
    overlay_path: Option<PathBuf>,
    tick_interval_ms: Option<u64>,
    server: Option<ServerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    min_score: Option<f32>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    addr: Option<String>,
    db_path: Option<String>,
}

/// Settings for the interactive client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the persistence store; `/detections` is appended.
    pub api_url: String,
    pub http_timeout: Duration,
    pub capture: CaptureSettings,
    pub detector: DetectorSettings,
    /// When set, every rendered overlay is also written here as an image.
    pub overlay_path: Option<PathBuf>,
    /// Minimum spacing between detection ticks (one display refresh).
    pub tick_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// `stub://<name>` for the synthetic camera, or a local directory of stills.
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// `stub` or `tract`.
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub min_score: f32,
    pub max_detections: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR.to_string(),
            model_path: None,
            min_score: DEFAULT_MIN_SCORE,
            max_detections: DEFAULT_MAX_DETECTIONS,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            width: DEFAULT_CAPTURE_WIDTH,
            height: DEFAULT_CAPTURE_HEIGHT,
            target_fps: DEFAULT_CAPTURE_FPS,
        }
    }
}

impl ClientConfig {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::from_file(load_config_file()?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let capture_file = file.capture.unwrap_or_default();
        let detector_file = file.detector.unwrap_or_default();
        let capture_defaults = CaptureSettings::default();
        let detector_defaults = DetectorSettings::default();
        Ok(Self {
            api_url: file.api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            http_timeout: Duration::from_millis(
                file.http_timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS),
            ),
            capture: CaptureSettings {
                source: capture_file.source.unwrap_or(capture_defaults.source),
                width: capture_file.width.unwrap_or(capture_defaults.width),
                height: capture_file.height.unwrap_or(capture_defaults.height),
                target_fps: capture_file
                    .target_fps
                    .unwrap_or(capture_defaults.target_fps),
            },
            detector: DetectorSettings {
                backend: detector_file.backend.unwrap_or(detector_defaults.backend),
                model_path: detector_file.model_path,
                min_score: detector_file
                    .min_score
                    .unwrap_or(detector_defaults.min_score),
                max_detections: detector_file
                    .max_detections
                    .unwrap_or(detector_defaults.max_detections),
            },
            overlay_path: file.overlay_path,
            tick_interval: Duration::from_millis(
                file.tick_interval_ms.unwrap_or(DEFAULT_TICK_INTERVAL_MS),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("VISION_CLERK_API_URL") {
            if !url.trim().is_empty() {
                self.api_url = url.trim().to_string();
            }
        }
        if let Ok(timeout) = std::env::var("VISION_CLERK_HTTP_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().map_err(|_| {
                anyhow!("VISION_CLERK_HTTP_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.http_timeout = Duration::from_millis(millis);
        }
        if let Ok(source) = std::env::var("VISION_CLERK_SOURCE") {
            if !source.trim().is_empty() {
                self.capture.source = source;
            }
        }
        if let Ok(backend) = std::env::var("VISION_CLERK_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_lowercase();
            }
        }
        if let Ok(path) = std::env::var("VISION_CLERK_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(score) = std::env::var("VISION_CLERK_MIN_SCORE") {
            self.detector.min_score = score
                .parse()
                .map_err(|_| anyhow!("VISION_CLERK_MIN_SCORE must be a number in [0, 1]"))?;
        }
        if let Ok(path) = std::env::var("VISION_CLERK_OVERLAY_PATH") {
            if !path.trim().is_empty() {
                self.overlay_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        validate_api_url(&self.api_url)?;
        if self.http_timeout.is_zero() {
            return Err(anyhow!("http timeout must be greater than zero"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.capture.target_fps == 0 {
            return Err(anyhow!("capture target_fps must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_score) {
            return Err(anyhow!(
                "detector min_score must be within [0, 1], got {}",
                self.detector.min_score
            ));
        }
        if self.detector.max_detections == 0 {
            return Err(anyhow!("detector max_detections must be >= 1"));
        }
        Ok(())
    }
}

/// Settings for the `detections_api` persistence server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub db_path: String,
}

impl ServerConfig {
    pub fn load() -> Result<Self> {
        let file = load_config_file()?.server.unwrap_or_default();
        let mut cfg = Self {
            addr: file.addr.unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string()),
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("PORT must be a TCP port number"))?;
            self.addr = format!("0.0.0.0:{port}");
        }
        if let Ok(addr) = std::env::var("VISION_CLERK_SERVER_ADDR") {
            if !addr.trim().is_empty() {
                self.addr = addr;
            }
        }
        if let Ok(path) = std::env::var("VISION_CLERK_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        Ok(())
    }
}

/// Check that a persistence base URL is an absolute http(s) URL.
pub fn validate_api_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| anyhow!("invalid api url '{}': {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!(
            "unsupported api url scheme '{}'; expected http or https",
            other
        )),
    }
}

fn load_config_file() -> Result<ConfigFile> {
    match std::env::var("VISION_CLERK_CONFIG").ok().as_deref() {
        Some(path) if !path.trim().is_empty() => read_config_file(Path::new(path)),
        _ => Ok(ConfigFile::default()),
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
