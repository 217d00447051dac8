//! Audio device enumeration.
//!
//! Indices are the enumeration order of the default host. They are what
//! `SessionConfig::input_device` / `output_device` refer to, and stay stable
//! as long as the set of attached devices does not change.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SvcError};

/// Metadata about one audio device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Position in the host's enumeration order.
    pub index: usize,
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Host API the device belongs to (WASAPI, CoreAudio, ALSA…).
    pub host_api: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceDirection {
    Input,
    Output,
}

impl DeviceDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Check that `index` (when given) names a device in `devices`.
pub fn check_index(
    devices: &[DeviceInfo],
    index: Option<usize>,
    direction: DeviceDirection,
) -> Result<()> {
    match index {
        Some(i) if !devices.iter().any(|d| d.index == i) => Err(SvcError::config(format!(
            "{} device index {i} is out of range ({} devices)",
            direction.as_str(),
            devices.len()
        ))),
        _ => Ok(()),
    }
}

/// List all audio input devices of the default host.
///
/// Returns an empty `Vec` if enumeration fails or cpal is not compiled in.
pub fn list_input_devices() -> Vec<DeviceInfo> {
    list(DeviceDirection::Input)
}

/// List all audio output devices of the default host.
pub fn list_output_devices() -> Vec<DeviceInfo> {
    list(DeviceDirection::Output)
}

#[cfg(feature = "audio-cpal")]
fn list(direction: DeviceDirection) -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let host_api = host.id().name().to_string();
    let (default_name, devices) = match direction {
        DeviceDirection::Input => (
            host.default_input_device().and_then(|d| d.name().ok()),
            host.input_devices().map(|d| d.collect::<Vec<_>>()),
        ),
        DeviceDirection::Output => (
            host.default_output_device().and_then(|d| d.name().ok()),
            host.output_devices().map(|d| d.collect::<Vec<_>>()),
        ),
    };

    match devices {
        Ok(devices) => devices
            .iter()
            .enumerate()
            .map(|(index, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("{} device {}", direction.as_str(), index + 1));
                DeviceInfo {
                    index,
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    name,
                    host_api: host_api.clone(),
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate {} devices: {e}", direction.as_str());
            Vec::new()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
fn list(_direction: DeviceDirection) -> Vec<DeviceInfo> {
    Vec::new()
}

/// Resolve a device by index, or the host default when `index` is `None`.
#[cfg(feature = "audio-cpal")]
pub(crate) fn resolve(direction: DeviceDirection, index: Option<usize>) -> Result<cpal::Device> {
    use cpal::traits::HostTrait;

    let host = cpal::default_host();
    match (direction, index) {
        (DeviceDirection::Input, None) => host
            .default_input_device()
            .ok_or(SvcError::NoDefaultInputDevice),
        (DeviceDirection::Output, None) => host
            .default_output_device()
            .ok_or(SvcError::NoDefaultOutputDevice),
        (direction, Some(i)) => {
            let mut devices = match direction {
                DeviceDirection::Input => host.input_devices(),
                DeviceDirection::Output => host.output_devices(),
            }
            .map_err(|e| SvcError::AudioDevice(e.to_string()))?;
            devices.nth(i).ok_or_else(|| {
                SvcError::config(format!(
                    "{} device index {i} is out of range",
                    direction.as_str()
                ))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<DeviceInfo> {
        vec![
            DeviceInfo {
                index: 0,
                name: "Microphone (USB)".into(),
                host_api: "WASAPI".into(),
                is_default: true,
            },
            DeviceInfo {
                index: 1,
                name: "Line In".into(),
                host_api: "WASAPI".into(),
                is_default: false,
            },
        ]
    }

    #[test]
    fn index_check_accepts_known_or_default() {
        assert!(check_index(&devices(), None, DeviceDirection::Input).is_ok());
        assert!(check_index(&devices(), Some(1), DeviceDirection::Input).is_ok());
        assert!(check_index(&[], None, DeviceDirection::Output).is_ok());
    }

    #[test]
    fn index_check_rejects_out_of_range() {
        let err = check_index(&devices(), Some(5), DeviceDirection::Output).unwrap_err();
        assert!(matches!(err, SvcError::Configuration(ref m) if m.contains("output")));
    }

    #[test]
    fn device_info_serializes_camel_case() {
        let json = serde_json::to_value(&devices()[0]).unwrap();
        assert_eq!(json["hostApi"], "WASAPI");
        assert_eq!(json["isDefault"], true);
    }
}
