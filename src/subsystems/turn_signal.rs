use super::{CommandResult, Subsystem};
use crate::codec::{dlc, id, ProtocolError, RollingCounter, TxCounter, TRAILER_LEN};
use crate::config::{FlashTiming, TurnSignalConfig};
use crate::fault::{codes, FaultCode, FaultManager, FaultSeverity};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const CMD_OFF: u8 = 0x00;
const CMD_LEFT: u8 = 0x01;
const CMD_RIGHT: u8 = 0x02;
const CMD_HAZARD_ON: u8 = 0x03;
const CMD_HAZARD_OFF: u8 = 0x04;

const OUT_LEFT: u8 = 0x01;
const OUT_RIGHT: u8 = 0x02;
const OUT_LEFT_BULB_FAILED: u8 = 0x10;
const OUT_RIGHT_BULB_FAILED: u8 = 0x20;
const OUT_FAST_FLASH: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TurnMode {
    Off = 0,
    Left = 1,
    Right = 2,
    Hazard = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnCommand {
    Off,
    Left,
    Right,
    HazardOn,
    HazardOff,
}

impl TurnCommand {
    pub fn to_bytes(self) -> [u8; 2] {
        let cmd = match self {
            TurnCommand::Off => CMD_OFF,
            TurnCommand::Left => CMD_LEFT,
            TurnCommand::Right => CMD_RIGHT,
            TurnCommand::HazardOn => CMD_HAZARD_ON,
            TurnCommand::HazardOff => CMD_HAZARD_OFF,
        };
        [cmd, 0x00]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct TurnSignalState {
    pub mode: TurnMode,
    pub left_on: bool,
    pub right_on: bool,
    pub blink_count: u8,
    pub left_bulb_ok: bool,
    pub right_bulb_ok: bool,
    pub fast_flash: bool,
    pub last_result: CommandResult,
}

#[derive(Debug, Clone, Copy)]
struct Bulb {
    ok: bool,
    current_ma: Option<u16>,
}

impl Bulb {
    const fn new() -> Self {
        Self {
            ok: true,
            current_ma: None,
        }
    }
}

#[derive(Debug)]
pub struct TurnSignalSystem {
    config: TurnSignalConfig,
    mode: TurnMode,
    output_on: bool,
    last_toggle_ms: u32,
    last_command_ms: u32,
    blink_count: u8,
    left: Bulb,
    right: Bulb,
    timed_out: bool,
    rx_counter: RollingCounter,
    tx_counter: TxCounter,
    last_result: CommandResult,
}

impl TurnSignalSystem {
    pub fn new(config: TurnSignalConfig) -> Self {
        Self {
            config,
            mode: TurnMode::Off,
            output_on: false,
            last_toggle_ms: 0,
            last_command_ms: 0,
            blink_count: 0,
            left: Bulb::new(),
            right: Bulb::new(),
            timed_out: false,
            rx_counter: RollingCounter::new(),
            tx_counter: TxCounter::new(),
            last_result: CommandResult::Ok,
        }
    }

    pub fn mode(&self) -> TurnMode {
        self.mode
    }

    pub fn blink_count(&self) -> u8 {
        self.blink_count
    }

    pub fn left_on(&self) -> bool {
        self.output_on && matches!(self.mode, TurnMode::Left | TurnMode::Hazard)
    }

    pub fn right_on(&self) -> bool {
        self.output_on && matches!(self.mode, TurnMode::Right | TurnMode::Hazard)
    }

    pub fn left_bulb_ok(&self) -> bool {
        self.left.ok
    }

    pub fn right_bulb_ok(&self) -> bool {
        self.right.ok
    }

    /// Fast flash runs while any bulb is marked failed.
    pub fn fast_flash(&self) -> bool {
        !self.left.ok || !self.right.ok
    }

    /// Selects a mode. Re-selecting the active mode only refreshes the
    /// inactivity timer; a new mode starts lit with a fresh blink.
    pub fn set_mode(&mut self, mode: TurnMode, now: u32, faults: &mut FaultManager) {
        self.last_command_ms = now;
        if self.timed_out && mode != TurnMode::Off {
            self.timed_out = false;
            if let Err(e) = faults.heal(codes::TURN_TIMEOUT, now) {
                debug!(error = %e, "turn timeout heal skipped");
            }
        }
        if mode == self.mode {
            return;
        }

        debug!(from = ?self.mode, to = ?mode, "turn signal mode");
        self.mode = mode;
        self.last_toggle_ms = now;
        if mode == TurnMode::Off {
            self.output_on = false;
            self.blink_count = 0;
        } else {
            self.output_on = true;
            self.blink_count = 1;
        }
    }

    pub fn hazard_off(&mut self, now: u32, faults: &mut FaultManager) {
        if self.mode == TurnMode::Hazard {
            self.set_mode(TurnMode::Off, now, faults);
        }
    }

    /// Bulb current sense inputs in milliamps.
    pub fn update_bulb_current(&mut self, left_ma: u16, right_ma: u16) {
        self.left.current_ma = Some(left_ma);
        self.right.current_ma = Some(right_ma);
    }

    pub fn clear_bulb_faults(&mut self) {
        self.left = Bulb::new();
        self.right = Bulb::new();
    }

    /// Cancels Left or Right after the inactivity window. Runs on the
    /// 1000 ms cadence.
    pub fn check_timeout(&mut self, now: u32, faults: &mut FaultManager) {
        if !matches!(self.mode, TurnMode::Left | TurnMode::Right) {
            return;
        }
        if now.wrapping_sub(self.last_command_ms) < self.config.inactivity_timeout_ms {
            return;
        }

        warn!(mode = ?self.mode, "turn signal inactivity timeout");
        self.set_mode(TurnMode::Off, now, faults);
        self.timed_out = true;
        if let Err(e) = faults.report(codes::TURN_TIMEOUT, FaultSeverity::Warning, None, now) {
            debug!(error = %e, "turn timeout not recorded");
        }
    }

    fn timing(&self) -> FlashTiming {
        if self.fast_flash() {
            self.config.fast_flash
        } else if self.mode == TurnMode::Hazard {
            self.config.hazard
        } else {
            self.config.normal
        }
    }

    fn check_bulbs(&mut self, now: u32, faults: &mut FaultManager) {
        let threshold = self.config.bulb_current_threshold_ma;
        let sides = [
            (self.left_on(), codes::TURN_LEFT_BULB),
            (self.right_on(), codes::TURN_RIGHT_BULB),
        ];

        for (lit, code) in sides {
            if !lit {
                continue;
            }
            let bulb = if code == codes::TURN_LEFT_BULB {
                &mut self.left
            } else {
                &mut self.right
            };
            let Some(current) = bulb.current_ma else {
                continue;
            };

            if bulb.ok && current < threshold {
                bulb.ok = false;
                warn!(code, current_ma = current, "turn bulb failure, fast flash");
                if let Err(e) = faults.report(code, FaultSeverity::Warning, None, now) {
                    debug!(code, error = %e, "bulb fault not recorded");
                }
            } else if !bulb.ok && current >= threshold {
                bulb.ok = true;
                info!(code, current_ma = current, "turn bulb restored");
                if let Err(e) = faults.heal(code, now) {
                    debug!(code, error = %e, "bulb heal skipped");
                }
            }
        }
    }

    fn output_bits(&self) -> u8 {
        let mut bits = 0;
        if self.left_on() {
            bits |= OUT_LEFT;
        }
        if self.right_on() {
            bits |= OUT_RIGHT;
        }
        if !self.left.ok {
            bits |= OUT_LEFT_BULB_FAILED;
        }
        if !self.right.ok {
            bits |= OUT_RIGHT_BULB_FAILED;
        }
        if self.fast_flash() {
            bits |= OUT_FAST_FLASH;
        }
        bits
    }
}

impl Subsystem for TurnSignalSystem {
    type State = TurnSignalState;
    type Command = TurnCommand;

    const COMMAND_ID: u16 = id::TURN_CMD;
    const STATUS_ID: u16 = id::TURN_STATUS;
    const FAULT_BASE: FaultCode = codes::TURN_BASE;

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

    fn decode(&self, data: &[u8]) -> Result<TurnCommand, ProtocolError> {
        match data.first().copied() {
            Some(CMD_OFF) => Ok(TurnCommand::Off),
            Some(CMD_LEFT) => Ok(TurnCommand::Left),
            Some(CMD_RIGHT) => Ok(TurnCommand::Right),
            Some(CMD_HAZARD_ON) => Ok(TurnCommand::HazardOn),
            Some(CMD_HAZARD_OFF) => Ok(TurnCommand::HazardOff),
            _ => Err(ProtocolError::CommandOutOfRange),
        }
    }

    fn execute(&mut self, command: TurnCommand, now: u32, faults: &mut FaultManager) {
        match command {
            TurnCommand::Off => self.set_mode(TurnMode::Off, now, faults),
            TurnCommand::Left => self.set_mode(TurnMode::Left, now, faults),
            TurnCommand::Right => self.set_mode(TurnMode::Right, now, faults),
            TurnCommand::HazardOn => self.set_mode(TurnMode::Hazard, now, faults),
            TurnCommand::HazardOff => self.hazard_off(now, faults),
        }
    }

    fn update(&mut self, now: u32, faults: &mut FaultManager) {
        if self.mode == TurnMode::Off {
            return;
        }

        let timing = self.timing();
        let threshold = if self.output_on { timing.on_ms } else { timing.off_ms };
        if now.wrapping_sub(self.last_toggle_ms) >= threshold {
            self.output_on = !self.output_on;
            self.last_toggle_ms = now;
            if self.output_on {
                self.blink_count = self.blink_count.wrapping_add(1);
            }
        }

        if self.output_on {
            self.check_bulbs(now, faults);
        }
    }

    fn state(&self) -> TurnSignalState {
        TurnSignalState {
            mode: self.mode,
            left_on: self.left_on(),
            right_on: self.right_on(),
            blink_count: self.blink_count,
            left_bulb_ok: self.left.ok,
            right_bulb_ok: self.right.ok,
            fast_flash: self.fast_flash(),
            last_result: self.last_result,
        }
    }

    fn status_payload(&self, _faults: &FaultManager) -> [u8; dlc::STATUS - TRAILER_LEN] {
        [
            self.mode as u8,
            self.output_bits(),
            self.blink_count,
            self.last_result as u8,
        ]
    }
}

impl Default for TurnSignalSystem {
    fn default() -> Self {
        Self::new(TurnSignalConfig::default())
    }
}
