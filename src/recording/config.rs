//! Recording request and recorder settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::CrabCaptureConfig;
use crate::errors::{CaptureError, Result};
use crate::types::Size;

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mov,
    Mp4,
}

impl Container {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mov" | "quicktime" => Some(Container::Mov),
            "mp4" | "mpeg4" => Some(Container::Mp4),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mov => "mov",
            Container::Mp4 => "mp4",
        }
    }
}

/// Caller-supplied recording parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecordRequest {
    pub output_directory: PathBuf,
    pub container: Container,
    /// Bits per second
    pub video_bitrate: u32,
    pub audio_enabled: bool,
    pub audio_channels: u16,
    pub audio_sample_rate: u32,
    /// Bits per second
    pub audio_bitrate: u32,
}

impl VideoRecordRequest {
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            output_directory: output_directory.into(),
            container: Container::Mov,
            video_bitrate: 5_000_000,
            audio_enabled: true,
            audio_channels: 1,
            audio_sample_rate: 44100,
            audio_bitrate: 128_000,
        }
    }

    pub fn with_container(mut self, container: Container) -> Self {
        self.container = container;
        self
    }

    pub fn with_video_bitrate(mut self, bitrate: u32) -> Self {
        self.video_bitrate = bitrate;
        self
    }

    pub fn with_audio(mut self, enabled: bool) -> Self {
        self.audio_enabled = enabled;
        self
    }

    pub fn from_config(config: &CrabCaptureConfig) -> Self {
        let section = &config.recording;
        Self {
            output_directory: PathBuf::from(&section.output_directory),
            container: Container::from_name(&section.container).unwrap_or(Container::Mov),
            video_bitrate: section.video_bitrate,
            audio_enabled: section.audio_enabled,
            audio_channels: section.audio_channels,
            audio_sample_rate: section.audio_sample_rate,
            audio_bitrate: section.audio_bitrate,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.video_bitrate == 0 {
            return Err(CaptureError::InvalidArgument("video bitrate must be positive".to_string()));
        }
        if self.audio_enabled && (self.audio_channels == 0 || self.audio_sample_rate == 0) {
            return Err(CaptureError::InvalidArgument(
                "audio channels and sample rate must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything a recorder needs to configure its file target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderSettings {
    pub output_path: PathBuf,
    pub container: Container,
    pub size: Size,
    pub frame_rate: u32,
    /// Clockwise rotation written as the orientation hint
    pub orientation_hint: u32,
    pub video_bitrate: u32,
    pub audio_enabled: bool,
    pub audio_channels: u16,
    pub audio_sample_rate: u32,
    pub audio_bitrate: u32,
}

impl RecorderSettings {
    pub fn new(request: &VideoRecordRequest, output_path: PathBuf, size: Size, frame_rate: u32, orientation_hint: u32) -> Self {
        Self {
            output_path,
            container: request.container,
            size,
            frame_rate,
            orientation_hint,
            video_bitrate: request.video_bitrate,
            audio_enabled: request.audio_enabled,
            audio_channels: request.audio_channels,
            audio_sample_rate: request.audio_sample_rate,
            audio_bitrate: request.audio_bitrate,
        }
    }
}

/// `video_<unix-seconds>.<ext>` inside `dir`, suffixed `_<n>` if that name is taken.
///
/// Creates `dir` when missing.
pub fn unique_output_path(dir: &Path, container: Container) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .map_err(|e| CaptureError::IoError(format!("Failed to create recording directory {:?}: {}", dir, e)))?;

    let stamp = chrono::Utc::now().timestamp();
    let ext = container.extension();
    let mut path = dir.join(format!("video_{}.{}", stamp, ext));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("video_{}_{}.{}", stamp, n, ext));
        n += 1;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_output_path_convention() {
        let dir = tempdir().unwrap();
        let path = unique_output_path(dir.path(), Container::Mov).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("video_"));
        assert!(name.ends_with(".mov"));
    }

    #[test]
    fn test_output_path_is_unique() {
        let dir = tempdir().unwrap();
        let first = unique_output_path(dir.path(), Container::Mp4).unwrap();
        std::fs::write(&first, b"taken").unwrap();
        let second = unique_output_path(dir.path(), Container::Mp4).unwrap();
        assert_ne!(first, second);
        assert!(!second.exists());
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        unique_output_path(&nested, Container::Mov).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_request_from_config_and_validate() {
        let request = VideoRecordRequest::from_config(&CrabCaptureConfig::default());
        assert_eq!(request.container, Container::Mov);
        assert!(request.validate().is_ok());

        let bad = request.with_video_bitrate(0);
        assert!(bad.validate().is_err());
    }
}
