//! Calibration values for the body control module.
//!
//! Everything here is plain data with serde derives so a host tool can load
//! it from JSON; the core never touches the filesystem.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_DOORS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("door count {0} outside 1..=8")]
    DoorCount(u8),
    #[error("auto-on threshold {on} must be below auto-off threshold {off}")]
    LightingHysteresis { on: u8, off: u8 },
    #[error("{0} must be non-zero")]
    ZeroDuration(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoorConfig {
    pub door_count: u8,
    pub auto_lock_enabled: bool,
    pub auto_lock_speed_kmh: u16,
}

impl Default for DoorConfig {
    fn default() -> Self {
        Self {
            door_count: 4,
            auto_lock_enabled: true,
            auto_lock_speed_kmh: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// Ambient level below which Auto turns the headlights on (0-255 scale).
    pub auto_on_threshold: u8,
    /// Ambient level above which Auto turns the headlights off.
    pub auto_off_threshold: u8,
    pub ambient_timeout_ms: u32,
    pub default_ambient: u8,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            auto_on_threshold: 80,
            auto_off_threshold: 120,
            ambient_timeout_ms: 10_000,
            default_ambient: 128,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashTiming {
    pub on_ms: u32,
    pub off_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnSignalConfig {
    pub normal: FlashTiming,
    pub hazard: FlashTiming,
    pub fast_flash: FlashTiming,
    pub bulb_current_threshold_ma: u16,
    pub inactivity_timeout_ms: u32,
}

impl Default for TurnSignalConfig {
    fn default() -> Self {
        Self {
            normal: FlashTiming { on_ms: 500, off_ms: 500 },
            hazard: FlashTiming { on_ms: 400, off_ms: 400 },
            fast_flash: FlashTiming { on_ms: 250, off_ms: 250 },
            bulb_current_threshold_ma: 100,
            inactivity_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    pub debounce_ms: u32,
    pub healing_ms: u32,
    pub max_recovery_attempts: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            healing_ms: 1000,
            max_recovery_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BcmConfig {
    pub door: DoorConfig,
    pub lighting: LightingConfig,
    pub turn_signal: TurnSignalConfig,
    pub fault: FaultConfig,
}

impl BcmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let doors = self.door.door_count;
        if doors == 0 || usize::from(doors) > MAX_DOORS {
            return Err(ConfigError::DoorCount(doors));
        }

        let lighting = &self.lighting;
        if lighting.auto_on_threshold >= lighting.auto_off_threshold {
            return Err(ConfigError::LightingHysteresis {
                on: lighting.auto_on_threshold,
                off: lighting.auto_off_threshold,
            });
        }

        let turn = &self.turn_signal;
        for (name, timing) in [
            ("turn signal timing", turn.normal),
            ("hazard timing", turn.hazard),
            ("fast flash timing", turn.fast_flash),
        ] {
            if timing.on_ms == 0 || timing.off_ms == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        if self.fault.debounce_ms == 0 {
            return Err(ConfigError::ZeroDuration("fault debounce"));
        }

        Ok(())
    }
}
