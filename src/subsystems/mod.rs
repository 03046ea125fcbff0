pub mod door;
pub mod lighting;
pub mod turn_signal;

pub use door::{DoorCommand, DoorState, DoorSystem, LockState};
pub use lighting::{
    HeadlightCommand, HeadlightMode, HeadlightOutput, InteriorMode, LightingCommand, LightingState,
    LightingSystem,
};
pub use turn_signal::{TurnCommand, TurnMode, TurnSignalState, TurnSignalSystem};

use crate::codec::{
    self, dlc, encode_frame, CanFrame, FrameError, ProtocolError, RollingCounter, TxCounter,
};
use crate::fault::{codes, FaultCode, FaultError, FaultManager, FaultSeverity};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Result code of the last command a subsystem processed, as carried in its
/// status frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandResult {
    Ok = 0,
    WrongLength = 1,
    ChecksumMismatch = 2,
    CounterMismatch = 3,
    CommandOutOfRange = 4,
}

impl From<ProtocolError> for CommandResult {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::WrongLength { .. } => CommandResult::WrongLength,
            ProtocolError::ChecksumMismatch { .. } => CommandResult::ChecksumMismatch,
            ProtocolError::CounterMismatch { .. } => CommandResult::CounterMismatch,
            ProtocolError::CommandOutOfRange => CommandResult::CommandOutOfRange,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubsystemError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("door index {0} out of range")]
    InvalidDoor(u8),
    #[error(transparent)]
    Fault(#[from] FaultError),
}

/// Fault kind recorded for a rejected command frame.
pub fn protocol_fault_kind(error: ProtocolError) -> FaultCode {
    match error {
        ProtocolError::WrongLength { .. } => codes::WRONG_LENGTH,
        ProtocolError::ChecksumMismatch { .. } => codes::CHECKSUM,
        ProtocolError::CounterMismatch { .. } => codes::COUNTER,
        ProtocolError::CommandOutOfRange => codes::COMMAND_RANGE,
    }
}

/// A body function driven by one command frame and reporting one status
/// frame.
pub trait Subsystem {
    type State: Clone + Serialize;
    type Command: Copy + core::fmt::Debug;

    const COMMAND_ID: u16;
    const STATUS_ID: u16;
    const FAULT_BASE: FaultCode;

    fn rx_counter_mut(&mut self) -> &mut RollingCounter;
    fn tx_counter_mut(&mut self) -> &mut TxCounter;
    fn last_result(&self) -> CommandResult;
    fn set_last_result(&mut self, result: CommandResult);

    /// Decodes the payload of a frame that already passed integrity checks.
    fn decode(&self, data: &[u8]) -> Result<Self::Command, ProtocolError>;
    fn execute(&mut self, command: Self::Command, now: u32, faults: &mut FaultManager);

    /// Periodic timing work on the 10 ms cadence.
    fn update(&mut self, now: u32, faults: &mut FaultManager);

    fn state(&self) -> Self::State;
    fn status_payload(&self, faults: &FaultManager) -> [u8; dlc::STATUS - codec::TRAILER_LEN];

    /// Validates, decodes and applies a command frame. Rejections are mirrored
    /// into the fault manager with the frame bytes as freeze frame.
    fn handle_frame(&mut self, frame: &CanFrame, now: u32, faults: &mut FaultManager) -> CommandResult {
        let outcome = codec::validate(frame, dlc::COMMAND, self.rx_counter_mut())
            .and_then(|()| self.decode(frame.data()));

        let result = match outcome {
            Ok(command) => {
                debug!(frame_id = Self::COMMAND_ID, ?command, "command accepted");
                self.execute(command, now, faults);
                CommandResult::Ok
            }
            Err(error) => {
                warn!(frame_id = Self::COMMAND_ID, %error, "command rejected");
                let mut freeze = [0u8; 8];
                freeze[..frame.dlc()].copy_from_slice(frame.data());
                let code = Self::FAULT_BASE | protocol_fault_kind(error);
                if let Err(e) = faults.report(code, FaultSeverity::Warning, Some(freeze), now) {
                    debug!(code, error = %e, "protocol fault not recorded");
                }
                error.into()
            }
        };

        self.set_last_result(result);
        result
    }

    fn build_status_frame(&mut self, faults: &FaultManager) -> Result<CanFrame, FrameError> {
        let payload = self.status_payload(faults);
        encode_frame(Self::STATUS_ID, &payload, self.tx_counter_mut())
    }
}
