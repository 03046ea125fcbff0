//! # Body Control Module Core
//!
//! Control logic for an automotive body control module: validated CAN command
//! handling, door lock / lighting / turn signal state machines, and a fault
//! lifecycle engine with debounce, healing, bounded recovery and DTC export.
//!
//! ## Features
//!
//! - **Frame integrity**: seeded XOR checksum and 4-bit rolling counter on every frame
//! - **Subsystem state machines**: doors, headlights and interior light, turn signals and hazards
//! - **Fault lifecycle**: Pending, Active, Healed and Stored states with timed transitions
//! - **Diagnostics**: read DTCs by status mask, clear by group
//! - **Deterministic scheduling**: 10 ms, 100 ms and 1000 ms task groups from one timestamp
//! - **Embedded-friendly**: bounded `heapless` containers, no allocation on the control path
//!
//! ## Quick Start
//!
//! ```rust
//! use bcm::{BcmConfig, BodyControlModule, LoopbackBus};
//! use bcm::codec::{encode_frame, id, TxCounter};
//! use bcm::subsystems::{DoorCommand, LockState};
//!
//! let mut module = BodyControlModule::new(LoopbackBus::new(), BcmConfig::default()).unwrap();
//!
//! let mut counter = TxCounter::new();
//! let frame = encode_frame(id::DOOR_CMD, &DoorCommand::LockAll.to_bytes(), &mut counter).unwrap();
//! module.bus_mut().inject(frame).unwrap();
//!
//! module.process(0);
//! module.process(10);
//! assert_eq!(module.door().lock_state(0), Some(LockState::Locked));
//! ```
//!
//! ## Architecture
//!
//! - [`codec`] - frame layout, checksum and rolling counters
//! - [`fault`] - fault lifecycle engine and DTC interface
//! - [`subsystems`] - door, lighting and turn signal state machines
//! - [`scheduler`] - cadence bookkeeping
//! - [`bcm`] - the context and control loop tying it all together
//! - [`bus`] - transport interface and an in-memory loopback bus

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

extern crate alloc;

pub mod bcm;
pub mod bus;
pub mod codec;
pub mod config;
pub mod event_log;
pub mod fault;
pub mod scheduler;
pub mod subsystems;

pub use bcm::{BcmContext, BcmError, BcmState, BodyControlModule};
pub use bus::{CanBus, LoopbackBus};
pub use codec::{CanFrame, ProtocolError};
pub use config::BcmConfig;
pub use fault::{FaultCode, FaultManager, FaultSeverity, FaultStatus};
