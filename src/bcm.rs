use crate::bus::{BusError, CanBus};
use crate::codec::{encode_frame, id, CanFrame, FrameError, TxCounter};
use crate::config::{BcmConfig, ConfigError};
use crate::event_log::{EventKind, EventLog};
use crate::fault::{
    DtcEntry, FaultCode, FaultError, FaultManager, FaultRecord, FaultSeverity, RecoveryAction,
    MAX_FAULT_RECORDS,
};
use crate::scheduler::{DueTasks, ScheduleClock};
use crate::subsystems::{
    CommandResult, DoorState, DoorSystem, HeadlightMode, InteriorMode, LightingState,
    LightingSystem, Subsystem, SubsystemError, TurnMode, TurnSignalState, TurnSignalSystem,
};
use alloc::boxed::Box;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

const MS_PER_MINUTE: u32 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BcmState {
    Init,
    Normal,
    /// A critical fault is pending or active.
    Fault,
}

impl BcmState {
    pub fn as_byte(self) -> u8 {
        match self {
            BcmState::Init => 0,
            BcmState::Normal => 1,
            BcmState::Fault => 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum BcmError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Subsystem(#[from] SubsystemError),
    #[error(transparent)]
    Fault(#[from] FaultError),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BcmStats {
    pub frames_received: u32,
    pub frames_dispatched: u32,
    pub frames_rejected: u32,
    pub unknown_frames: u32,
    pub frames_sent: u32,
    pub tx_failures: u32,
    pub fault_overflows: u32,
}

/// All mutable module state. Owned by [`BodyControlModule`] and lent to each
/// component call; nothing lives in statics.
#[derive(Debug)]
pub struct BcmContext {
    pub door: DoorSystem,
    pub lighting: LightingSystem,
    pub turn_signal: TurnSignalSystem,
    pub faults: FaultManager,
    pub state: BcmState,
    pub uptime_ms: u32,
    heartbeat_counter: TxCounter,
    fault_status_counter: TxCounter,
}

impl BcmContext {
    pub fn new(config: &BcmConfig) -> Self {
        Self {
            door: DoorSystem::new(config.door),
            lighting: LightingSystem::new(config.lighting),
            turn_signal: TurnSignalSystem::new(config.turn_signal),
            faults: FaultManager::new(config.fault),
            state: BcmState::Init,
            uptime_ms: 0,
            heartbeat_counter: TxCounter::new(),
            fault_status_counter: TxCounter::new(),
        }
    }

    /// Wraps after 255 minutes.
    pub fn uptime_minutes(&self) -> u8 {
        ((self.uptime_ms / MS_PER_MINUTE) & 0xFF) as u8
    }

    pub fn build_heartbeat(&mut self) -> Result<CanFrame, FrameError> {
        let payload = [self.state.as_byte(), self.uptime_minutes()];
        encode_frame(id::HEARTBEAT, &payload, &mut self.heartbeat_counter)
    }

    pub fn build_fault_status(&mut self) -> Result<CanFrame, FrameError> {
        self.faults.build_status_frame(&mut self.fault_status_counter)
    }
}

/// Serializable view of the module for host tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BcmSnapshot {
    pub state: BcmState,
    pub uptime_ms: u32,
    pub door: DoorState,
    pub lighting: LightingState,
    pub turn_signal: TurnSignalState,
    pub faults: Vec<FaultRecord>,
    pub stats: BcmStats,
}

/// Control loop of the body control module.
///
/// Call [`process`](Self::process) with a monotonic millisecond timestamp as
/// often as possible. Each call drains the bus and runs whichever of the
/// 10, 100 and 1000 ms task groups are due. It never blocks.
#[derive(Debug)]
pub struct BodyControlModule<B: CanBus> {
    ctx: BcmContext,
    clock: ScheduleClock,
    bus: B,
    stats: BcmStats,
    events: EventLog,
}

impl<B: CanBus> BodyControlModule<B> {
    pub fn new(bus: B, config: BcmConfig) -> Result<Self, BcmError> {
        config.validate()?;
        Ok(Self {
            ctx: BcmContext::new(&config),
            clock: ScheduleClock::new(),
            bus,
            stats: BcmStats::default(),
            events: EventLog::new(),
        })
    }

    pub fn process(&mut self, now: u32) -> DueTasks {
        self.ctx.uptime_ms = now;
        if self.ctx.state == BcmState::Init {
            self.set_state(BcmState::Normal, now);
        }

        while let Some(frame) = self.bus.try_receive() {
            self.dispatch(&frame, now);
        }

        let due = self.clock.poll(now);
        if due.fast {
            self.run_fast_tasks(now);
        }
        if due.medium {
            self.run_medium_tasks(now);
        }
        if due.slow {
            self.run_slow_tasks(now);
        }
        due
    }

    /// Routes one inbound frame to its subsystem. Unknown identifiers are
    /// ignored and yield `None`.
    pub fn dispatch(&mut self, frame: &CanFrame, now: u32) -> Option<CommandResult> {
        self.stats.frames_received = self.stats.frames_received.wrapping_add(1);

        let ctx = &mut self.ctx;
        let result = match frame.id() {
            id::DOOR_CMD => ctx.door.handle_frame(frame, now, &mut ctx.faults),
            id::LIGHTING_CMD => ctx.lighting.handle_frame(frame, now, &mut ctx.faults),
            id::TURN_CMD => ctx.turn_signal.handle_frame(frame, now, &mut ctx.faults),
            other => {
                debug!(frame_id = other, "ignoring unknown frame");
                self.stats.unknown_frames = self.stats.unknown_frames.wrapping_add(1);
                return None;
            }
        };

        let [id_hi, id_lo] = frame.id().to_be_bytes();
        if result == CommandResult::Ok {
            self.stats.frames_dispatched = self.stats.frames_dispatched.wrapping_add(1);
            let data = frame.data();
            self.events.record(
                now,
                EventKind::CommandAccepted,
                [id_hi, id_lo, data[0], data[1]],
            );
        } else {
            self.stats.frames_rejected = self.stats.frames_rejected.wrapping_add(1);
            self.events
                .record(now, EventKind::CommandRejected, [id_hi, id_lo, result as u8, 0]);
        }
        Some(result)
    }

    fn run_fast_tasks(&mut self, now: u32) {
        let ctx = &mut self.ctx;
        ctx.door.update(now, &mut ctx.faults);
        ctx.lighting.update(now, &mut ctx.faults);
        ctx.turn_signal.update(now, &mut ctx.faults);
    }

    fn run_medium_tasks(&mut self, now: u32) {
        let door = self.ctx.door.build_status_frame(&self.ctx.faults);
        self.transmit(door);
        let lighting = self.ctx.lighting.build_status_frame(&self.ctx.faults);
        self.transmit(lighting);
        let turn = self.ctx.turn_signal.build_status_frame(&self.ctx.faults);
        self.transmit(turn);

        self.ctx.faults.tick(now);
    }

    fn run_slow_tasks(&mut self, now: u32) {
        let ctx = &mut self.ctx;
        ctx.turn_signal.check_timeout(now, &mut ctx.faults);

        let next = if self.ctx.faults.any_critical() {
            BcmState::Fault
        } else {
            BcmState::Normal
        };
        self.set_state(next, now);

        // Heartbeat carries the state decided on this tick.
        let heartbeat = self.ctx.build_heartbeat();
        self.transmit(heartbeat);
        let fault_status = self.ctx.build_fault_status();
        self.transmit(fault_status);
    }

    fn transmit(&mut self, frame: Result<CanFrame, FrameError>) {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "frame encoding failed");
                self.stats.tx_failures = self.stats.tx_failures.wrapping_add(1);
                return;
            }
        };

        match self.bus.send(&frame) {
            Ok(()) => self.stats.frames_sent = self.stats.frames_sent.wrapping_add(1),
            Err(nb::Error::WouldBlock) => {
                warn!(frame_id = frame.id(), "transmitter busy, frame dropped");
                self.stats.tx_failures = self.stats.tx_failures.wrapping_add(1);
            }
            Err(nb::Error::Other(e)) => {
                warn!(frame_id = frame.id(), error = %e, "transmit failed");
                self.stats.tx_failures = self.stats.tx_failures.wrapping_add(1);
            }
        }
    }

    fn set_state(&mut self, next: BcmState, now: u32) {
        if self.ctx.state == next {
            return;
        }
        info!(from = ?self.ctx.state, to = ?next, "bcm state change");
        self.events.record(
            now,
            EventKind::StateChange,
            [self.ctx.state.as_byte(), next.as_byte(), 0, 0],
        );
        self.ctx.state = next;
    }

    // Door

    pub fn lock_all(&mut self, now: u32) {
        self.ctx.door.lock_all(now);
    }

    pub fn unlock_all(&mut self, now: u32) {
        self.ctx.door.unlock_all(now);
    }

    pub fn lock_door(&mut self, door: u8, now: u32) -> Result<(), BcmError> {
        Ok(self.ctx.door.lock_door(door, now)?)
    }

    pub fn unlock_door(&mut self, door: u8, now: u32) -> Result<(), BcmError> {
        Ok(self.ctx.door.unlock_door(door, now)?)
    }

    pub fn set_door_open(&mut self, door: u8, open: bool) -> Result<(), BcmError> {
        Ok(self.ctx.door.set_door_open(door, open)?)
    }

    pub fn set_auto_lock(&mut self, enabled: bool) {
        self.ctx.door.set_auto_lock(enabled);
    }

    pub fn update_vehicle_speed(&mut self, kmh: u16, now: u32) {
        self.ctx.door.update_vehicle_speed(kmh, now);
    }

    // Lighting

    pub fn set_headlight_mode(&mut self, mode: HeadlightMode, now: u32) {
        self.ctx.lighting.set_headlight_mode(mode, now);
    }

    pub fn set_high_beam(&mut self, on: bool) {
        self.ctx.lighting.set_high_beam(on);
    }

    pub fn set_interior_light(&mut self, mode: InteriorMode, brightness: u8) {
        self.ctx.lighting.set_interior(mode, brightness);
    }

    pub fn set_ambient_light(&mut self, level: u8, now: u32) {
        let ctx = &mut self.ctx;
        ctx.lighting.set_ambient_light(level, now, &mut ctx.faults);
    }

    // Turn signal

    pub fn set_turn_signal(&mut self, mode: TurnMode, now: u32) {
        let ctx = &mut self.ctx;
        ctx.turn_signal.set_mode(mode, now, &mut ctx.faults);
    }

    pub fn update_bulb_current(&mut self, left_ma: u16, right_ma: u16) {
        self.ctx.turn_signal.update_bulb_current(left_ma, right_ma);
    }

    /// Marks both bulbs good again and heals their faults.
    pub fn clear_bulb_faults(&mut self, now: u32) {
        use crate::fault::codes::{TURN_LEFT_BULB, TURN_RIGHT_BULB};

        self.ctx.turn_signal.clear_bulb_faults();
        for code in [TURN_LEFT_BULB, TURN_RIGHT_BULB] {
            if self.ctx.faults.is_present(code) {
                if let Err(e) = self.ctx.faults.heal(code, now) {
                    debug!(code, error = %e, "bulb heal skipped");
                }
            }
        }
    }

    // Faults

    pub fn report_fault(
        &mut self,
        code: FaultCode,
        severity: FaultSeverity,
        freeze_frame: Option<[u8; 8]>,
        now: u32,
    ) -> Result<(), BcmError> {
        self.ctx.faults.report(code, severity, freeze_frame, now)?;
        let [hi, lo] = code.to_be_bytes();
        self.events
            .record(now, EventKind::FaultReported, [hi, lo, severity as u8, 0]);
        Ok(())
    }

    pub fn heal_fault(&mut self, code: FaultCode, now: u32) -> Result<(), BcmError> {
        Ok(self.ctx.faults.heal(code, now)?)
    }

    pub fn clear_fault(&mut self, code: FaultCode) -> Result<(), BcmError> {
        self.ctx.faults.clear(code)?;
        let [hi, lo] = code.to_be_bytes();
        self.events
            .record(self.ctx.uptime_ms, EventKind::FaultCleared, [hi, lo, 0, 0]);
        Ok(())
    }

    pub fn clear_all_faults(&mut self) {
        self.ctx.faults.clear_all();
        self.events
            .record(self.ctx.uptime_ms, EventKind::FaultCleared, [0xFF, 0xFF, 0, 0]);
    }

    pub fn register_recovery(
        &mut self,
        code: FaultCode,
        action: Box<dyn RecoveryAction>,
    ) -> Result<(), BcmError> {
        Ok(self.ctx.faults.register_recovery(code, action)?)
    }

    pub fn any_critical_fault(&self) -> bool {
        self.ctx.faults.any_critical()
    }

    pub fn read_dtc_by_status(&self, mask: u8) -> heapless::Vec<DtcEntry, MAX_FAULT_RECORDS> {
        self.ctx.faults.read_dtc_by_status(mask)
    }

    pub fn clear_dtc(&mut self, group: u32) -> Result<(), BcmError> {
        self.ctx.faults.clear_dtc(group)?;
        let [_, g2, g1, g0] = group.to_be_bytes();
        self.events
            .record(self.ctx.uptime_ms, EventKind::FaultCleared, [g2, g1, g0, 1]);
        Ok(())
    }

    // Accessors

    pub fn context(&self) -> &BcmContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut BcmContext {
        &mut self.ctx
    }

    pub fn state(&self) -> BcmState {
        self.ctx.state
    }

    pub fn door(&self) -> &DoorSystem {
        &self.ctx.door
    }

    pub fn lighting(&self) -> &LightingSystem {
        &self.ctx.lighting
    }

    pub fn turn_signal(&self) -> &TurnSignalSystem {
        &self.ctx.turn_signal
    }

    pub fn faults(&self) -> &FaultManager {
        &self.ctx.faults
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn stats(&self) -> BcmStats {
        BcmStats {
            fault_overflows: self.ctx.faults.overflow_count(),
            ..self.stats
        }
    }

    pub fn snapshot(&self) -> BcmSnapshot {
        BcmSnapshot {
            state: self.ctx.state,
            uptime_ms: self.ctx.uptime_ms,
            door: self.ctx.door.state(),
            lighting: self.ctx.lighting.state(),
            turn_signal: self.ctx.turn_signal.state(),
            faults: self.ctx.faults.records().cloned().collect(),
            stats: self.stats(),
        }
    }
}
