use super::{CommandResult, Subsystem};
use crate::codec::{dlc, id, ProtocolError, RollingCounter, TxCounter, TRAILER_LEN};
use crate::config::LightingConfig;
use crate::fault::{codes, FaultCode, FaultManager, FaultSeverity};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const HEADLIGHT_OFF: u8 = 0x00;
const HEADLIGHT_ON: u8 = 0x01;
const HEADLIGHT_AUTO: u8 = 0x02;
const HIGH_BEAM_ON: u8 = 0x03;
const HIGH_BEAM_OFF: u8 = 0x04;

const INTERIOR_MODE_MASK: u8 = 0x03;
const MAX_BRIGHTNESS: u8 = 0x0F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadlightMode {
    Off,
    On,
    Auto,
}

/// Lamp output as reported on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum HeadlightOutput {
    Off = 0,
    On = 1,
    AutoOn = 2,
    HighBeam = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum InteriorMode {
    Off = 0,
    On = 1,
    Auto = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadlightCommand {
    Off,
    On,
    Auto,
    HighBeamOn,
    HighBeamOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightingCommand {
    pub headlight: HeadlightCommand,
    pub interior: InteriorMode,
    pub brightness: u8,
}

impl LightingCommand {
    pub fn to_bytes(self) -> [u8; 2] {
        let headlight = match self.headlight {
            HeadlightCommand::Off => HEADLIGHT_OFF,
            HeadlightCommand::On => HEADLIGHT_ON,
            HeadlightCommand::Auto => HEADLIGHT_AUTO,
            HeadlightCommand::HighBeamOn => HIGH_BEAM_ON,
            HeadlightCommand::HighBeamOff => HIGH_BEAM_OFF,
        };
        let interior = (self.interior as u8) | ((self.brightness & MAX_BRIGHTNESS) << 4);
        [headlight, interior]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightingState {
    pub headlight_mode: HeadlightMode,
    pub headlight_output: HeadlightOutput,
    pub high_beam: bool,
    pub interior_mode: InteriorMode,
    pub interior_brightness: u8,
    pub ambient_light: u8,
    pub last_result: CommandResult,
}

#[derive(Debug)]
pub struct LightingSystem {
    config: LightingConfig,
    mode: HeadlightMode,
    output: HeadlightOutput,
    high_beam: bool,
    /// Hysteresis latch for Auto.
    auto_lit: bool,
    interior_mode: InteriorMode,
    interior_brightness: u8,
    ambient_light: u8,
    /// Last ambient update or Auto entry, whichever is later.
    ambient_reference_ms: u32,
    rx_counter: RollingCounter,
    tx_counter: TxCounter,
    last_result: CommandResult,
}

impl LightingSystem {
    pub fn new(config: LightingConfig) -> Self {
        Self {
            config,
            mode: HeadlightMode::Off,
            output: HeadlightOutput::Off,
            high_beam: false,
            auto_lit: false,
            interior_mode: InteriorMode::Off,
            interior_brightness: 0,
            ambient_light: config.default_ambient,
            ambient_reference_ms: 0,
            rx_counter: RollingCounter::new(),
            tx_counter: TxCounter::new(),
            last_result: CommandResult::Ok,
        }
    }

    pub fn headlight_mode(&self) -> HeadlightMode {
        self.mode
    }

    pub fn headlight_output(&self) -> HeadlightOutput {
        self.output
    }

    pub fn headlights_on(&self) -> bool {
        self.output != HeadlightOutput::Off
    }

    pub fn ambient_light(&self) -> u8 {
        self.ambient_light
    }

    pub fn set_headlight_mode(&mut self, mode: HeadlightMode, now: u32) {
        if mode == HeadlightMode::Auto && self.mode != HeadlightMode::Auto {
            self.ambient_reference_ms = now;
            self.auto_lit = self.ambient_light < self.config.auto_on_threshold;
        }
        if mode == HeadlightMode::Off {
            self.high_beam = false;
        }
        self.mode = mode;
        self.refresh_output();
    }

    pub fn set_high_beam(&mut self, on: bool) {
        self.high_beam = on;
        self.refresh_output();
    }

    /// Interior lamp. Brightness applies only in `On`; `Off` darkens it.
    pub fn set_interior(&mut self, mode: InteriorMode, brightness: u8) {
        self.interior_mode = mode;
        match mode {
            InteriorMode::On => self.interior_brightness = brightness.min(MAX_BRIGHTNESS),
            InteriorMode::Off => self.interior_brightness = 0,
            InteriorMode::Auto => {}
        }
    }

    /// Ambient light sensor input on a 0-255 scale. Heals a present sensor
    /// timeout.
    pub fn set_ambient_light(&mut self, level: u8, now: u32, faults: &mut FaultManager) {
        self.ambient_light = level;
        self.ambient_reference_ms = now;

        if faults.is_present(codes::LIGHTING_AMBIENT_TIMEOUT) {
            if let Err(e) = faults.heal(codes::LIGHTING_AMBIENT_TIMEOUT, now) {
                debug!(error = %e, "ambient timeout heal skipped");
            }
        }
        self.refresh_output();
    }

    fn refresh_output(&mut self) {
        if self.mode == HeadlightMode::Auto {
            if self.ambient_light < self.config.auto_on_threshold {
                self.auto_lit = true;
            } else if self.ambient_light > self.config.auto_off_threshold {
                self.auto_lit = false;
            }
        }

        let base = match self.mode {
            HeadlightMode::Off => HeadlightOutput::Off,
            HeadlightMode::On => HeadlightOutput::On,
            HeadlightMode::Auto if self.auto_lit => HeadlightOutput::AutoOn,
            HeadlightMode::Auto => HeadlightOutput::Off,
        };
        let output = if self.high_beam && base != HeadlightOutput::Off {
            HeadlightOutput::HighBeam
        } else {
            base
        };

        if output != self.output {
            debug!(from = ?self.output, to = ?output, ambient = self.ambient_light, "headlight output");
            self.output = output;
        }
    }

    fn interior_byte(&self) -> u8 {
        (self.interior_mode as u8) | (self.interior_brightness << 4)
    }
}

impl Subsystem for LightingSystem {
    type State = LightingState;
    type Command = LightingCommand;

    const COMMAND_ID: u16 = id::LIGHTING_CMD;
    const STATUS_ID: u16 = id::LIGHTING_STATUS;
    const FAULT_BASE: FaultCode = codes::LIGHTING_BASE;

    fn rx_counter_mut(&mut self) -> &mut RollingCounter {
        &mut self.rx_counter
    }

    fn tx_counter_mut(&mut self) -> &mut TxCounter {
        &mut self.tx_counter
    }

    fn last_result(&self) -> CommandResult {
        self.last_result
    }

    fn set_last_result(&mut self, result: CommandResult) {
        self.last_result = result;
    }

    fn decode(&self, data: &[u8]) -> Result<LightingCommand, ProtocolError> {
        let (headlight, interior) = match data {
            [headlight, interior, ..] => (*headlight, *interior),
            _ => return Err(ProtocolError::CommandOutOfRange),
        };

        let headlight = match headlight {
            HEADLIGHT_OFF => HeadlightCommand::Off,
            HEADLIGHT_ON => HeadlightCommand::On,
            HEADLIGHT_AUTO => HeadlightCommand::Auto,
            HIGH_BEAM_ON => HeadlightCommand::HighBeamOn,
            HIGH_BEAM_OFF => HeadlightCommand::HighBeamOff,
            _ => return Err(ProtocolError::CommandOutOfRange),
        };
        let interior_mode = match interior & INTERIOR_MODE_MASK {
            0 => InteriorMode::Off,
            1 => InteriorMode::On,
            2 => InteriorMode::Auto,
            _ => return Err(ProtocolError::CommandOutOfRange),
        };

        Ok(LightingCommand {
            headlight,
            interior: interior_mode,
            brightness: (interior >> 4) & MAX_BRIGHTNESS,
        })
    }

    fn execute(&mut self, command: LightingCommand, now: u32, _faults: &mut FaultManager) {
        match command.headlight {
            HeadlightCommand::Off => self.set_headlight_mode(HeadlightMode::Off, now),
            HeadlightCommand::On => self.set_headlight_mode(HeadlightMode::On, now),
            HeadlightCommand::Auto => self.set_headlight_mode(HeadlightMode::Auto, now),
            HeadlightCommand::HighBeamOn => self.set_high_beam(true),
            HeadlightCommand::HighBeamOff => self.set_high_beam(false),
        }
        self.set_interior(command.interior, command.brightness);
    }

    fn update(&mut self, now: u32, faults: &mut FaultManager) {
        self.refresh_output();

        // The fault engine is the latch: a cleared timeout is raised again
        // while the sensor stays silent.
        if self.mode != HeadlightMode::Auto || faults.is_present(codes::LIGHTING_AMBIENT_TIMEOUT) {
            return;
        }
        if now.wrapping_sub(self.ambient_reference_ms) >= self.config.ambient_timeout_ms {
            warn!(ambient = self.ambient_light, "ambient light sensor timeout");
            if let Err(e) = faults.report(
                codes::LIGHTING_AMBIENT_TIMEOUT,
                FaultSeverity::Warning,
                None,
                now,
            ) {
                debug!(error = %e, "ambient timeout not recorded");
            }
        }
    }

    fn state(&self) -> LightingState {
        LightingState {
            headlight_mode: self.mode,
            headlight_output: self.output,
            high_beam: self.high_beam,
            interior_mode: self.interior_mode,
            interior_brightness: self.interior_brightness,
            ambient_light: self.ambient_light,
            last_result: self.last_result,
        }
    }

    fn status_payload(&self, _faults: &FaultManager) -> [u8; dlc::STATUS - TRAILER_LEN] {
        [
            self.output as u8,
            self.interior_byte(),
            self.ambient_light,
            self.last_result as u8,
        ]
    }
}

impl Default for LightingSystem {
    fn default() -> Self {
        Self::new(LightingConfig::default())
    }
}
