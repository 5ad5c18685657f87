//! # Behavior Configuration
//!
//! Per-session tuning for brains and triggers. Loaded from TOML and copied
//! into each brain when it is built, so nothing reads shared mutable state
//! while a brain is running.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{BehaviorError, BehaviorResult};

/// Tuning values shared by every brain an app builds.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize, Reflect)]
#[reflect(Resource)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Generic brains switch the local avatar's camera to third person
    pub force_third_person: bool,

    /// Default fade-in rate for generic brains (blend per second, 0 = instant)
    pub default_fade_in: f32,

    /// Default fade-out rate for generic brains (blend per second, 0 = instant)
    pub default_fade_out: f32,

    /// Animation-name marker that classifies a sequence as a ladder
    pub ladder_marker: String,

    /// Height above the feet where climb probes start
    pub probe_origin_height: f32,

    /// Vertical probe length when the climb animations carry no travel
    pub default_vertical_probe: f32,

    /// Horizontal probe length when the climb animations carry no travel
    pub default_horizontal_probe: f32,

    /// Fade-out rate of a climb release / fall-off stage
    pub exit_stage_fade_rate: f32,

    /// Blend at which the climb stage under an exit stage is dropped
    pub exit_stage_peak_blend: f32,

    /// Turn speed multiplier exposed to input hosts
    pub turn_speed: f32,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            force_third_person: true,
            default_fade_in: 6.0,
            default_fade_out: 0.0,
            ladder_marker: "Ladder".to_string(),
            probe_origin_height: 3.0,
            default_vertical_probe: 4.0,   // roughly one climb cycle up
            default_horizontal_probe: 3.0, // roughly one climb cycle sideways
            exit_stage_fade_rate: 2.0,
            exit_stage_peak_blend: 0.99,
            turn_speed: 1.0,
        }
    }
}

impl BehaviorConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> BehaviorResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml(&content)?.validated())
    }

    /// Like [`load`](Self::load), falling back to defaults when the file is
    /// missing or unusable.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            debug!("no behavior config at {}, using defaults", path.display());
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            warn!("behavior config {} rejected ({}): {}", path.display(), e.code(), e);
            Self::default()
        })
    }

    /// Save to TOML file
    pub fn save(&self, path: &Path) -> BehaviorResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| BehaviorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parse from a TOML string. Values are taken as written; see
    /// [`validated`](Self::validated).
    pub fn from_toml(content: &str) -> BehaviorResult<Self> {
        toml::from_str(content).map_err(|e| BehaviorError::Config(e.to_string()))
    }

    /// Replace values brains can't run with by their defaults.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        let rates = [
            ("default_fade_in", &mut self.default_fade_in, defaults.default_fade_in),
            ("default_fade_out", &mut self.default_fade_out, defaults.default_fade_out),
        ];
        for (name, value, fallback) in rates {
            if !value.is_finite() || *value < 0.0 {
                warn!("{} = {} is not a fade rate, using {}", name, value, fallback);
                *value = fallback;
            }
        }

        // Zero here would stall a climb exit or never probe
        let positive = [
            ("probe_origin_height", &mut self.probe_origin_height, defaults.probe_origin_height),
            ("default_vertical_probe", &mut self.default_vertical_probe, defaults.default_vertical_probe),
            ("default_horizontal_probe", &mut self.default_horizontal_probe, defaults.default_horizontal_probe),
            ("exit_stage_fade_rate", &mut self.exit_stage_fade_rate, defaults.exit_stage_fade_rate),
            ("turn_speed", &mut self.turn_speed, defaults.turn_speed),
        ];
        for (name, value, fallback) in positive {
            if !value.is_finite() || *value <= 0.0 {
                warn!("{} = {} must be positive, using {}", name, value, fallback);
                *value = fallback;
            }
        }

        if !(self.exit_stage_peak_blend > 0.0 && self.exit_stage_peak_blend <= 1.0) {
            warn!("exit_stage_peak_blend = {} is outside (0, 1], using {}", self.exit_stage_peak_blend, defaults.exit_stage_peak_blend);
            self.exit_stage_peak_blend = defaults.exit_stage_peak_blend;
        }
        if self.ladder_marker.trim().is_empty() {
            // An empty marker would make every sequence a ladder
            warn!("empty ladder_marker, using {:?}", defaults.ladder_marker);
            self.ladder_marker = defaults.ladder_marker;
        }
        self
    }
}
