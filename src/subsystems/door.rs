use super::{CommandResult, Subsystem, SubsystemError};
use crate::codec::{dlc, id, ProtocolError, RollingCounter, TxCounter, TRAILER_LEN};
use crate::config::{DoorConfig, MAX_DOORS};
use crate::fault::{codes, FaultCode, FaultManager};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Actuator travel time. One 10 ms tick.
pub const LOCK_TRAVEL_MS: u32 = 10;

const CMD_LOCK_ALL: u8 = 0x01;
const CMD_UNLOCK_ALL: u8 = 0x02;
const CMD_LOCK_SINGLE: u8 = 0x03;
const CMD_UNLOCK_SINGLE: u8 = 0x04;

pub const ALL_DOORS: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    Unlocked,
    Locking,
    Locked,
    Unlocking,
}

impl LockState {
    pub fn is_transient(self) -> bool {
        matches!(self, LockState::Locking | LockState::Unlocking)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorCommand {
    LockAll,
    UnlockAll,
    LockSingle(u8),
    UnlockSingle(u8),
}

impl DoorCommand {
    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            DoorCommand::LockAll => [CMD_LOCK_ALL, ALL_DOORS],
            DoorCommand::UnlockAll => [CMD_UNLOCK_ALL, ALL_DOORS],
            DoorCommand::LockSingle(door) => [CMD_LOCK_SINGLE, door],
            DoorCommand::UnlockSingle(door) => [CMD_UNLOCK_SINGLE, door],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorState {
    pub door_count: u8,
    pub locks: [LockState; MAX_DOORS],
    pub open: [bool; MAX_DOORS],
    pub vehicle_speed_kmh: u16,
    pub auto_lock_enabled: bool,
    pub auto_lock_triggered: bool,
    pub last_result: CommandResult,
}

#[derive(Debug, Clone, Copy)]
struct Door {
    lock: LockState,
    open: bool,
    moving_since: u32,
}

#[derive(Debug)]
pub struct DoorSystem {
    config: DoorConfig,
    doors: [Door; MAX_DOORS],
    vehicle_speed_kmh: u16,
    auto_lock_triggered: bool,
    rx_counter: RollingCounter,
    tx_counter: TxCounter,
    last_result: CommandResult,
}

impl DoorSystem {
    pub fn new(config: DoorConfig) -> Self {
        let door = Door {
            lock: LockState::Unlocked,
            open: false,
            moving_since: 0,
        };
        Self {
            config,
            doors: [door; MAX_DOORS],
            vehicle_speed_kmh: 0,
            auto_lock_triggered: false,
            rx_counter: RollingCounter::new(),
            tx_counter: TxCounter::new(),
            last_result: CommandResult::Ok,
        }
    }

    fn door_count(&self) -> usize {
        usize::from(self.config.door_count).min(MAX_DOORS)
    }

    fn check_index(&self, door: u8) -> Result<usize, SubsystemError> {
        let index = usize::from(door);
        if index < self.door_count() {
            Ok(index)
        } else {
            Err(SubsystemError::InvalidDoor(door))
        }
    }

    fn drive(&mut self, index: usize, lock: bool, now: u32) {
        let door = &mut self.doors[index];
        let next = match (door.lock, lock) {
            (LockState::Unlocked | LockState::Unlocking, true) => LockState::Locking,
            (LockState::Locked | LockState::Locking, false) => LockState::Unlocking,
            _ => return,
        };
        debug!(door = index, from = ?door.lock, to = ?next, "door actuator");
        door.lock = next;
        door.moving_since = now;
    }

    fn drive_all(&mut self, lock: bool, now: u32) {
        for index in 0..self.door_count() {
            self.drive(index, lock, now);
        }
    }

    pub fn lock_all(&mut self, now: u32) {
        self.drive_all(true, now);
    }

    pub fn unlock_all(&mut self, now: u32) {
        self.drive_all(false, now);
    }

    pub fn lock_door(&mut self, door: u8, now: u32) -> Result<(), SubsystemError> {
        let index = self.check_index(door)?;
        self.drive(index, true, now);
        Ok(())
    }

    pub fn unlock_door(&mut self, door: u8, now: u32) -> Result<(), SubsystemError> {
        let index = self.check_index(door)?;
        self.drive(index, false, now);
        Ok(())
    }

    pub fn lock_state(&self, door: u8) -> Option<LockState> {
        self.check_index(door).ok().map(|i| self.doors[i].lock)
    }

    pub fn all_locked(&self) -> bool {
        self.doors[..self.door_count()]
            .iter()
            .all(|d| d.lock == LockState::Locked)
    }

    pub fn any_unlocked(&self) -> bool {
        self.doors[..self.door_count()]
            .iter()
            .any(|d| d.lock == LockState::Unlocked)
    }

    pub fn any_open(&self) -> bool {
        self.doors[..self.door_count()].iter().any(|d| d.open)
    }

    /// Door-open sensor input. Reported only; it does not block locking.
    pub fn set_door_open(&mut self, door: u8, open: bool) -> Result<(), SubsystemError> {
        let index = self.check_index(door)?;
        self.doors[index].open = open;
        Ok(())
    }

    pub fn set_auto_lock(&mut self, enabled: bool) {
        self.config.auto_lock_enabled = enabled;
    }

    /// Locks every door once when speed reaches the threshold; stopping
    /// re-arms the trigger.
    pub fn update_vehicle_speed(&mut self, kmh: u16, now: u32) {
        self.vehicle_speed_kmh = kmh;

        if kmh == 0 {
            self.auto_lock_triggered = false;
        } else if self.config.auto_lock_enabled
            && !self.auto_lock_triggered
            && kmh >= self.config.auto_lock_speed_kmh
        {
            info!(speed_kmh = kmh, "auto-lock");
            self.auto_lock_triggered = true;
            self.lock_all(now);
        }
    }

    fn lock_bits(&self) -> u8 {
        self.doors[..self.door_count()]
            .iter()
            .enumerate()
            .filter(|(_, d)| d.lock == LockState::Locked)
            .fold(0u8, |bits, (i, _)| bits | (1u8 << i))
    }

    fn open_bits(&self) -> u8 {
        self.doors[..self.door_count()]
            .iter()
            .enumerate()
            .filter(|(_, d)| d.open)
            .fold(0u8, |bits, (i, _)| bits | (1u8 << i))
    }
}

impl Subsystem for DoorSystem {
    type State = DoorState;
    type Command = DoorCommand;

    const COMMAND_ID: u16 = id::DOOR_CMD;
    const STATUS_ID: u16 = id::DOOR_STATUS;
    const FAULT_BASE: FaultCode = codes::DOOR_BASE;

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

    fn decode(&self, data: &[u8]) -> Result<DoorCommand, ProtocolError> {
        let (cmd, door) = match data {
            [cmd, door, ..] => (*cmd, *door),
            _ => return Err(ProtocolError::CommandOutOfRange),
        };
        let single = |door: u8| {
            self.check_index(door)
                .map(|_| door)
                .map_err(|_| ProtocolError::CommandOutOfRange)
        };

        match cmd {
            CMD_LOCK_ALL => Ok(DoorCommand::LockAll),
            CMD_UNLOCK_ALL => Ok(DoorCommand::UnlockAll),
            CMD_LOCK_SINGLE => single(door).map(DoorCommand::LockSingle),
            CMD_UNLOCK_SINGLE => single(door).map(DoorCommand::UnlockSingle),
            _ => Err(ProtocolError::CommandOutOfRange),
        }
    }

    fn execute(&mut self, command: DoorCommand, now: u32, _faults: &mut FaultManager) {
        match command {
            DoorCommand::LockAll => self.lock_all(now),
            DoorCommand::UnlockAll => self.unlock_all(now),
            DoorCommand::LockSingle(door) | DoorCommand::UnlockSingle(door) => {
                let lock = matches!(command, DoorCommand::LockSingle(_));
                if let Ok(index) = self.check_index(door) {
                    self.drive(index, lock, now);
                }
            }
        }
    }

    fn update(&mut self, now: u32, _faults: &mut FaultManager) {
        let count = self.door_count();
        for (index, door) in self.doors[..count].iter_mut().enumerate() {
            if door.lock.is_transient() && now.wrapping_sub(door.moving_since) >= LOCK_TRAVEL_MS {
                door.lock = match door.lock {
                    LockState::Locking => LockState::Locked,
                    _ => LockState::Unlocked,
                };
                debug!(door = index, state = ?door.lock, "door settled");
            }
        }
    }

    fn state(&self) -> DoorState {
        let mut state = DoorState {
            door_count: self.config.door_count,
            locks: [LockState::Unlocked; MAX_DOORS],
            open: [false; MAX_DOORS],
            vehicle_speed_kmh: self.vehicle_speed_kmh,
            auto_lock_enabled: self.config.auto_lock_enabled,
            auto_lock_triggered: self.auto_lock_triggered,
            last_result: self.last_result,
        };
        for (i, door) in self.doors.iter().enumerate() {
            state.locks[i] = door.lock;
            state.open[i] = door.open;
        }
        state
    }

    fn status_payload(&self, faults: &FaultManager) -> [u8; dlc::STATUS - TRAILER_LEN] {
        let fault_count = u8::try_from(faults.present_in(Self::FAULT_BASE)).unwrap_or(u8::MAX);
        [
            self.lock_bits(),
            self.open_bits(),
            self.last_result as u8,
            fault_count,
        ]
    }
}

impl Default for DoorSystem {
    fn default() -> Self {
        Self::new(DoorConfig::default())
    }
}
