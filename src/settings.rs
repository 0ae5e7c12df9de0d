//! Simulation and audio settings
//!
//! Persisted separately from scenes: LocalStorage on the web, a JSON file on
//! native. Every field has a default so partial files load.

use std::path::Path;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::consts::*;

/// Simulation settings/preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // === Physics ===
    /// World gravity (pixels/s², +y is down)
    pub gravity: Vec2,
    /// Fixed step duration in seconds
    pub timestep: f32,

    // === Collision sounds ===
    /// Impacts where neither body moves faster than this are silent
    pub velocity_threshold: f32,
    /// Lowest note velocity for a collision strike
    pub note_velocity_min: u8,
    /// Highest note velocity for a collision strike (inclusive)
    pub note_velocity_max: u8,
    /// Collision note length in seconds
    pub note_duration: f32,
    /// Seed for strike velocity variation
    pub seed: u64,
    /// Play notes while fast-forwarding to a target tick after a reload
    pub replay_audio: bool,

    // === Audio ===
    /// Instrument preset name
    pub instrument: String,
    /// Master volume (0.0 - 1.0)
    pub master_volume: f32,
    pub muted: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gravity: Vec2::from(GRAVITY),
            timestep: SIM_DT,

            velocity_threshold: MIN_VELOCITY_THRESHOLD,
            note_velocity_min: NOTE_VELOCITY_MIN,
            note_velocity_max: NOTE_VELOCITY_MAX,
            note_duration: NOTE_DURATION,
            seed: 0x6d61_7262_6c65,
            replay_audio: false,

            instrument: "marimba".to_string(),
            master_volume: 0.8,
            muted: false,
        }
    }
}

impl Settings {
    /// Note velocity band with the bounds ordered and clamped to MIDI range
    pub fn note_velocity_range(&self) -> (u8, u8) {
        let lo = self.note_velocity_min.min(MAX_PITCH);
        let hi = self.note_velocity_max.min(MAX_PITCH);
        (lo.min(hi), lo.max(hi))
    }

    /// Parse settings JSON (missing fields take defaults)
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialization cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Load settings from a JSON file, falling back to defaults when the file
    /// is missing or unreadable
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(json) => match Self::from_json(&json) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("Ignoring malformed settings {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("Using default settings");
                Self::default()
            }
        }
    }

    /// Save settings as JSON
    pub fn save_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, self.to_json())
    }

    /// LocalStorage key
    #[allow(dead_code)]
    const STORAGE_KEY: &'static str = "marble_machine_settings";

    /// Load settings from LocalStorage (WASM only)
    #[cfg(target_arch = "wasm32")]
    pub fn load() -> Self {
        let storage = web_sys::window()
            .and_then(|w| w.local_storage().ok())
            .flatten();

        if let Some(storage) = storage {
            if let Ok(Some(json)) = storage.get_item(Self::STORAGE_KEY) {
                if let Ok(settings) = Self::from_json(&json) {
                    log::info!("Loaded settings from LocalStorage");
                    return settings;
                }
            }
        }

        log::info!("Using default settings");
        Self::default()
    }

    /// Save settings to LocalStorage (WASM only)
    #[cfg(target_arch = "wasm32")]
    pub fn save(&self) {
        let storage = web_sys::window()
            .and_then(|w| w.local_storage().ok())
            .flatten();

        if let Some(storage) = storage {
            let _ = storage.set_item(Self::STORAGE_KEY, &self.to_json());
            log::info!("Settings saved");
        }
    }
}
