//! Repeating capture request, rebuilt alongside every session

use serde::{Deserialize, Serialize};

use super::targets::{OutputTarget, TargetKind};
use crate::types::CapturedFrame;

/// Capture template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestTemplate {
    Preview,
    /// Stable frame rate for the encoder while a recorder is attached
    Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AeMode {
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AwbMode {
    Off,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    Off,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRateRange {
    pub min: u32,
    pub max: u32,
}

/// Capture instruction repeated against the current session until replaced
#[derive(Debug, Clone)]
pub struct RepeatingRequest {
    pub template: RequestTemplate,
    pub ae_mode: AeMode,
    pub awb_mode: AwbMode,
    pub control_mode: ControlMode,
    pub frame_rate_range: FrameRateRange,
    pub targets: Vec<OutputTarget>,
}

impl RepeatingRequest {
    /// Auto exposure and white balance at a fixed negotiated rate, aimed at every
    /// target of the session.
    pub fn for_targets(targets: Vec<OutputTarget>, frame_rate: u32) -> Self {
        let template = if targets.iter().any(|t| t.kind() == TargetKind::Recorder) {
            RequestTemplate::Record
        } else {
            RequestTemplate::Preview
        };

        Self {
            template,
            ae_mode: AeMode::On,
            awb_mode: AwbMode::Auto,
            control_mode: ControlMode::Auto,
            frame_rate_range: FrameRateRange {
                min: frame_rate,
                max: frame_rate,
            },
            targets,
        }
    }

    pub fn target_kinds(&self) -> Vec<TargetKind> {
        self.targets.iter().map(|t| t.kind()).collect()
    }

    /// Fan one frame out to every target. Returns how many consumers took it.
    pub fn deliver(&self, frame: &CapturedFrame) -> usize {
        self.targets
            .iter()
            .filter(|target| target.deliver(frame.clone()))
            .count()
    }
}
