// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Global settings for the rendering system, loadable from JSON.

use super::backend::BackendSelectionConfig;
use crate::math::LinearRgba;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A collection of settings that configure contexts and the render engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Frames the CPU may record ahead of the GPU (`1..=3`).
    pub frames_in_flight: usize,
    /// Initial canvas width.
    pub width: u32,
    /// Initial canvas height.
    pub height: u32,
    /// Main pass clear color.
    pub clear_color: LinearRgba,
    /// Which backend to start with and what to fall back to.
    pub backend: BackendSelectionConfig,
    /// Whether contexts report contract violations.
    pub validation: bool,
    /// Directory holding shader sources/blobs; embedded defaults are used when unset.
    pub shader_dir: Option<PathBuf>,
    /// Bound for per-frame fence waits.
    pub fence_timeout_ms: u64,
    /// Device memory budget; unlimited when unset.
    pub memory_budget_bytes: Option<u64>,
    /// Edge length of each shadow map layer.
    pub shadow_map_size: u32,
    /// Water reflection/refraction target size relative to the canvas.
    pub water_target_scale: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            width: 1280,
            height: 720,
            clear_color: LinearRgba::new(0.1, 0.1, 0.12, 1.0),
            backend: BackendSelectionConfig::default(),
            validation: true,
            shader_dir: None,
            fence_timeout_ms: 1000,
            memory_budget_bytes: None,
            shadow_map_size: 512,
            water_target_scale: 0.5,
        }
    }
}

/// An error raised while loading or validating [`RenderSettings`].
#[derive(Debug)]
pub enum SettingsError {
    /// The settings file could not be read.
    Io(std::io::Error),
    /// The settings file is not valid JSON for this schema.
    Parse(serde_json::Error),
    /// A value is out of range.
    Invalid(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io(err) => write!(f, "Failed to read render settings: {err}"),
            SettingsError::Parse(err) => write!(f, "Failed to parse render settings: {err}"),
            SettingsError::Invalid(msg) => write!(f, "Invalid render settings: {msg}"),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Io(err) => Some(err),
            SettingsError::Parse(err) => Some(err),
            SettingsError::Invalid(_) => None,
        }
    }
}

impl RenderSettings {
    /// Parses settings from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json).map_err(SettingsError::Parse)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(SettingsError::Io)?;
        Self::from_json(&text)
    }

    /// Serializes the settings to pretty JSON.
    pub fn to_json(&self) -> Result<String, SettingsError> {
        serde_json::to_string_pretty(self).map_err(SettingsError::Parse)
    }

    /// Rejects values no backend can honor.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.width == 0 || self.height == 0 {
            return Err(SettingsError::Invalid(format!(
                "canvas size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if !(1..=3).contains(&self.frames_in_flight) {
            return Err(SettingsError::Invalid(format!(
                "frames_in_flight must be within 1..=3, got {}",
                self.frames_in_flight
            )));
        }
        if self.shadow_map_size == 0 {
            return Err(SettingsError::Invalid("shadow_map_size must be non-zero".into()));
        }
        if !(self.water_target_scale > 0.0 && self.water_target_scale <= 1.0) {
            return Err(SettingsError::Invalid(format!(
                "water_target_scale must be within (0, 1], got {}",
                self.water_target_scale
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::api::backend::GraphicsBackendType;

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings = RenderSettings::from_json(
            r#"{ "width": 64, "height": 64, "backend": { "preferred": "CommandListV2" } }"#,
        )
        .unwrap();
        assert_eq!(settings.width, 64);
        assert_eq!(settings.frames_in_flight, 2);
        assert_eq!(settings.backend.preferred, GraphicsBackendType::CommandListV2);
        assert_eq!(settings.backend.fallback_order.len(), 4);
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        assert!(matches!(
            RenderSettings::from_json(r#"{ "frames_in_flight": 0 }"#),
            Err(SettingsError::Invalid(_))
        ));
        assert!(matches!(
            RenderSettings::from_json(r#"{ "width": 0 }"#),
            Err(SettingsError::Invalid(_))
        ));
        assert!(matches!(
            RenderSettings::from_json("{ not json"),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let settings = RenderSettings {
            memory_budget_bytes: Some(1 << 20),
            ..RenderSettings::default()
        };
        let back = RenderSettings::from_json(&settings.to_json().unwrap()).unwrap();
        assert_eq!(back, settings);
    }
}
