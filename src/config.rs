//! Configuration management for CrabCapture
//!
//! Default camera request, image-stream, audio-stream and recording parameters,
//! loaded from and saved to TOML.

use crate::errors::CaptureError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrabCaptureConfig {
    pub camera: CameraConfig,
    pub image_stream: ImageStreamConfig,
    pub audio: AudioConfig,
    pub recording: RecordingConfig,
}

/// Camera selection and requested format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Index into the enumerated device list
    pub camera_index: usize,
    /// Requested video size [width, height]
    pub video_size: [u32; 2],
    /// Requested frames per second
    pub frame_rate: u32,
}

/// Image stream defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageStreamConfig {
    /// Reader pixel format (YUV_420_888, RGB_565, RGB8, JPEG)
    pub format: String,
    /// Forward every Nth frame
    pub frame_skip_interval: u32,
    /// "planar" or "jpeg"
    pub transport: String,
    /// JPEG quality (1-100) for the jpeg transport
    pub jpeg_quality: u8,
    /// Maximum frames the reader may hold at once
    pub max_images: usize,
}

/// Raw PCM audio stream defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub buffer_size_kb: u32,
}

/// Recorder defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Directory receiving `video_<timestamp>.<ext>` files
    pub output_directory: String,
    /// "mov" or "mp4"
    pub container: String,
    pub video_bitrate: u32,
    pub audio_enabled: bool,
    pub audio_channels: u16,
    pub audio_sample_rate: u32,
    pub audio_bitrate: u32,
}

impl Default for CrabCaptureConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                camera_index: 0,
                video_size: [1280, 720],
                frame_rate: 30,
            },
            image_stream: ImageStreamConfig {
                format: "YUV_420_888".to_string(),
                frame_skip_interval: 1,
                transport: "planar".to_string(),
                jpeg_quality: 85,
                max_images: 2,
            },
            audio: AudioConfig {
                sample_rate: 44100,
                buffer_size_kb: 4,
            },
            recording: RecordingConfig {
                output_directory: "./recordings".to_string(),
                container: "mov".to_string(),
                video_bitrate: 5_000_000,
                audio_enabled: true,
                audio_channels: 1,
                audio_sample_rate: 44100,
                audio_bitrate: 128_000,
            },
        }
    }
}

impl CrabCaptureConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CaptureError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: CrabCaptureConfig = toml::from_str(&contents)
            .map_err(|e| CaptureError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate().map_err(CaptureError::ConfigError)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CaptureError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CaptureError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CaptureError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CaptureError::ConfigError(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("crabcapture.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.camera.video_size[0] == 0 || self.camera.video_size[1] == 0 {
            return Err("Invalid video size".to_string());
        }
        if self.camera.frame_rate == 0 || self.camera.frame_rate > 240 {
            return Err("Invalid frame rate (must be 1-240)".to_string());
        }

        if self.image_stream.frame_skip_interval == 0 {
            return Err("Frame skip interval must be at least 1".to_string());
        }
        if self.image_stream.jpeg_quality == 0 || self.image_stream.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }
        if self.image_stream.max_images == 0 {
            return Err("Reader must hold at least one image".to_string());
        }

        if self.audio.sample_rate == 0 {
            return Err("Audio sample rate must be positive".to_string());
        }

        match self.recording.container.to_ascii_lowercase().as_str() {
            "mov" | "mp4" => {}
            other => return Err(format!("Unsupported container '{}'", other)),
        }
        if self.recording.audio_enabled && self.recording.audio_channels == 0 {
            return Err("Audio channels must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = CrabCaptureConfig::default();
        assert_eq!(config.camera.video_size, [1280, 720]);
        assert_eq!(config.camera.frame_rate, 30);
        assert_eq!(config.image_stream.format, "YUV_420_888");
        assert_eq!(config.recording.container, "mov");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = CrabCaptureConfig::default();
        bad.image_stream.frame_skip_interval = 0;
        assert!(bad.validate().is_err());

        let mut bad = CrabCaptureConfig::default();
        bad.recording.container = "avi".to_string();
        assert!(bad.validate().unwrap_err().contains("avi"));
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("crabcapture.toml");

        let mut config = CrabCaptureConfig::default();
        config.camera.frame_rate = 60;
        config.save_to_file(&path).unwrap();

        let loaded = CrabCaptureConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_toml_sections() {
        let toml_string = toml::to_string_pretty(&CrabCaptureConfig::default()).unwrap();
        assert!(toml_string.contains("[camera]"));
        assert!(toml_string.contains("[image_stream]"));
        assert!(toml_string.contains("[audio]"));
        assert!(toml_string.contains("[recording]"));
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "camera = 5").unwrap();

        let err = CrabCaptureConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, CaptureError::ConfigError(_)));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = CrabCaptureConfig::load_from_file("does_not_exist.toml").unwrap();
        assert_eq!(config.audio.buffer_size_kb, 4);
    }
}
