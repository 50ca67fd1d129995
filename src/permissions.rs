//! Camera and microphone permission checks
//!
//! The pipeline only consumes [`PermissionProvider`]; hosts with a real consent
//! dialog implement it, tests use [`StaticPermissions`].

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::errors::{CaptureError, Result};

/// Capability guarded by a permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Capability {
    Camera,
    Microphone,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Camera => write!(f, "camera"),
            Capability::Microphone => write!(f, "microphone"),
        }
    }
}

/// Permission status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PermissionStatus {
    /// Permission granted
    Granted,
    /// Permission denied
    Denied,
    /// Permission not determined (user hasn't been asked yet)
    NotDetermined,
    /// Permission restricted (parental controls, etc)
    Restricted,
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionStatus::Granted => write!(f, "granted"),
            PermissionStatus::Denied => write!(f, "denied"),
            PermissionStatus::NotDetermined => write!(f, "not_determined"),
            PermissionStatus::Restricted => write!(f, "restricted"),
        }
    }
}

impl PermissionStatus {
    fn to_u8(self) -> u8 {
        match self {
            PermissionStatus::Granted => 0,
            PermissionStatus::Denied => 1,
            PermissionStatus::NotDetermined => 2,
            PermissionStatus::Restricted => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => PermissionStatus::Granted,
            1 => PermissionStatus::Denied,
            3 => PermissionStatus::Restricted,
            _ => PermissionStatus::NotDetermined,
        }
    }
}

/// Detailed permission information
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PermissionInfo {
    pub status: PermissionStatus,
    pub message: String,
    pub can_request: bool,
}

/// Callback receiving the outcome of an access request
pub type AccessCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// Source of permission state for the pipeline
pub trait PermissionProvider: Send + Sync {
    fn status(&self, capability: Capability) -> PermissionInfo;

    fn check_granted(&self, capability: Capability) -> bool {
        self.status(capability).status == PermissionStatus::Granted
    }

    /// Ask for access. The callback may fire on any thread.
    fn request_access(&self, capability: Capability, callback: AccessCallback);
}

/// Fail with `PermissionDenied` unless `capability` is granted
pub fn require(provider: &dyn PermissionProvider, capability: Capability) -> Result<()> {
    if provider.check_granted(capability) {
        Ok(())
    } else {
        Err(CaptureError::PermissionDenied(format!(
            "{} permission not granted",
            capability
        )))
    }
}

/// Fixed permission answers, settable at runtime
#[derive(Debug)]
pub struct StaticPermissions {
    camera: AtomicU8,
    microphone: AtomicU8,
    grant_on_request: AtomicBool,
}

impl StaticPermissions {
    pub fn new(camera: PermissionStatus, microphone: PermissionStatus) -> Self {
        Self {
            camera: AtomicU8::new(camera.to_u8()),
            microphone: AtomicU8::new(microphone.to_u8()),
            grant_on_request: AtomicBool::new(true),
        }
    }

    pub fn granted() -> Self {
        Self::new(PermissionStatus::Granted, PermissionStatus::Granted)
    }

    pub fn denied() -> Self {
        Self::new(PermissionStatus::Denied, PermissionStatus::Denied)
    }

    /// Whether an access request for a not-yet-determined capability is accepted
    pub fn set_grant_on_request(&self, grant: bool) {
        self.grant_on_request.store(grant, Ordering::SeqCst);
    }

    pub fn set(&self, capability: Capability, status: PermissionStatus) {
        self.slot(capability).store(status.to_u8(), Ordering::SeqCst);
    }

    fn slot(&self, capability: Capability) -> &AtomicU8 {
        match capability {
            Capability::Camera => &self.camera,
            Capability::Microphone => &self.microphone,
        }
    }
}

impl Default for StaticPermissions {
    fn default() -> Self {
        Self::granted()
    }
}

impl PermissionProvider for StaticPermissions {
    fn status(&self, capability: Capability) -> PermissionInfo {
        let status = PermissionStatus::from_u8(self.slot(capability).load(Ordering::SeqCst));
        PermissionInfo {
            status,
            message: format!("{} permission {}", capability, status),
            can_request: status == PermissionStatus::NotDetermined,
        }
    }

    fn request_access(&self, capability: Capability, callback: AccessCallback) {
        let current = self.status(capability).status;
        let granted = match current {
            PermissionStatus::Granted => true,
            PermissionStatus::Denied | PermissionStatus::Restricted => false,
            PermissionStatus::NotDetermined => {
                let grant = self.grant_on_request.load(Ordering::SeqCst);
                let next = if grant {
                    PermissionStatus::Granted
                } else {
                    PermissionStatus::Denied
                };
                self.set(capability, next);
                grant
            }
        };
        callback(granted);
    }
}

/// Permission state queried from the operating system
///
/// Desktop platforms have no consent dialog; a request is recorded as consent
/// unless the query reports the capability as denied or restricted.
#[derive(Debug, Default)]
pub struct SystemPermissions {
    camera_consent: AtomicBool,
    microphone_consent: AtomicBool,
}

impl SystemPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    fn consent(&self, capability: Capability) -> &AtomicBool {
        match capability {
            Capability::Camera => &self.camera_consent,
            Capability::Microphone => &self.microphone_consent,
        }
    }

    fn query(capability: Capability) -> PermissionInfo {
        #[cfg(target_os = "linux")]
        {
            match capability {
                Capability::Camera => check_camera_linux(),
                Capability::Microphone => check_microphone_linux(),
            }
        }

        #[cfg(not(target_os = "linux"))]
        {
            PermissionInfo {
                status: PermissionStatus::NotDetermined,
                message: format!("{} permission cannot be queried on this platform", capability),
                can_request: true,
            }
        }
    }
}

impl PermissionProvider for SystemPermissions {
    fn status(&self, capability: Capability) -> PermissionInfo {
        let info = Self::query(capability);
        if info.status == PermissionStatus::NotDetermined && self.consent(capability).load(Ordering::SeqCst) {
            return PermissionInfo {
                status: PermissionStatus::Granted,
                message: format!("{} access granted on request", capability),
                can_request: false,
            };
        }
        info
    }

    fn request_access(&self, capability: Capability, callback: AccessCallback) {
        let info = Self::query(capability);
        let granted = match info.status {
            PermissionStatus::Denied | PermissionStatus::Restricted => {
                log::warn!("{} access unavailable: {}", capability, info.message);
                false
            }
            PermissionStatus::Granted | PermissionStatus::NotDetermined => {
                self.consent(capability).store(true, Ordering::SeqCst);
                true
            }
        };
        callback(granted);
    }
}

#[cfg(target_os = "linux")]
fn check_camera_linux() -> PermissionInfo {
    use std::fs;
    use std::path::Path;

    let video_devices: Vec<_> = (0..10)
        .map(|i| format!("/dev/video{}", i))
        .filter(|path| Path::new(path).exists())
        .collect();

    let Some(first_device) = video_devices.first() else {
        return PermissionInfo {
            status: PermissionStatus::NotDetermined,
            message: "No video devices found at /dev/video*".to_string(),
            can_request: false,
        };
    };

    match fs::metadata(first_device) {
        Ok(_) if in_linux_group(&["video", "plugdev"]) => PermissionInfo {
            status: PermissionStatus::Granted,
            message: format!("Camera access granted (user in video group, {} found)", first_device),
            can_request: false,
        },
        Ok(_) => PermissionInfo {
            status: PermissionStatus::Denied,
            message: format!(
                "Camera device {} exists but user not in video group - run: sudo usermod -a -G video $USER",
                first_device
            ),
            can_request: true,
        },
        Err(e) => PermissionInfo {
            status: PermissionStatus::Denied,
            message: format!("Cannot access {}: {}", first_device, e),
            can_request: true,
        },
    }
}

#[cfg(target_os = "linux")]
fn check_microphone_linux() -> PermissionInfo {
    use std::path::Path;

    if !Path::new("/dev/snd").exists() {
        return PermissionInfo {
            status: PermissionStatus::NotDetermined,
            message: "No sound devices found at /dev/snd".to_string(),
            can_request: false,
        };
    }

    if in_linux_group(&["audio"]) {
        PermissionInfo {
            status: PermissionStatus::Granted,
            message: "Microphone access granted (user in audio group)".to_string(),
            can_request: false,
        }
    } else {
        // PulseAudio/PipeWire sessions grant access without group membership.
        PermissionInfo {
            status: PermissionStatus::NotDetermined,
            message: "User not in audio group; access depends on the sound server".to_string(),
            can_request: true,
        }
    }
}

#[cfg(target_os = "linux")]
fn in_linux_group(names: &[&str]) -> bool {
    use std::process::Command;

    let Ok(output) = Command::new("groups").output() else {
        return false;
    };
    match String::from_utf8(output.stdout) {
        Ok(groups) => groups.split_whitespace().any(|g| names.contains(&g)),
        Err(_) => false,
    }
}
