//! Fault lifecycle engine.
//!
//! Each fault code owns one [`FaultRecord`] that moves through
//!
//! ```text
//! Inactive --report--> Pending --debounce--> Active --heal--> Healed --healing--> Stored
//! ```
//!
//! `Pending` may also be healed directly, and `clear` drops any record back
//! to `Inactive`. Timers are derived from the `now` timestamps passed in, so
//! the engine has no clock of its own.

use crate::codec::{encode_frame, id, CanFrame, FrameError, TxCounter};
use crate::config::FaultConfig;
use alloc::boxed::Box;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const MAX_FAULT_RECORDS: usize = 32;
pub const MAX_RECOVERY_ACTIONS: usize = 16;

/// Group value that clears every DTC.
pub const CLEAR_ALL_DTC_GROUP: u32 = 0x00FF_FFFF;

pub mod dtc_status {
    pub const TEST_FAILED: u8 = 0x01;
    pub const PENDING_DTC: u8 = 0x04;
    pub const CONFIRMED_DTC: u8 = 0x08;
}

const_assert!(MAX_FAULT_RECORDS <= u16::MAX as usize);

pub type FaultCode = u16;

/// Fault code namespaces. The high nibble names the subsystem, the low byte
/// the kind of fault.
pub mod codes {
    use super::FaultCode;

    pub const DOOR_BASE: FaultCode = 0x1000;
    pub const LIGHTING_BASE: FaultCode = 0x2000;
    pub const TURN_BASE: FaultCode = 0x3000;
    pub const SYSTEM_BASE: FaultCode = 0x5000;

    pub const WRONG_LENGTH: FaultCode = 0x01;
    pub const CHECKSUM: FaultCode = 0x02;
    pub const COUNTER: FaultCode = 0x03;
    pub const COMMAND_RANGE: FaultCode = 0x04;
    pub const TIMEOUT: FaultCode = 0x05;
    pub const LEFT_BULB: FaultCode = 0x06;
    pub const RIGHT_BULB: FaultCode = 0x07;

    pub const LIGHTING_AMBIENT_TIMEOUT: FaultCode = LIGHTING_BASE | TIMEOUT;
    pub const TURN_TIMEOUT: FaultCode = TURN_BASE | TIMEOUT;
    pub const TURN_LEFT_BULB: FaultCode = TURN_BASE | LEFT_BULB;
    pub const TURN_RIGHT_BULB: FaultCode = TURN_BASE | RIGHT_BULB;

    pub const fn namespace(code: FaultCode) -> FaultCode {
        code & 0xF000
    }

    pub const fn kind(code: FaultCode) -> FaultCode {
        code & 0x00FF
    }

    /// One-byte form used in the fault status frame: namespace nibble high,
    /// kind nibble low.
    pub const fn compact(code: FaultCode) -> u8 {
        (((code >> 8) & 0xF0) | (code & 0x0F)) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultStatus {
    Inactive,
    /// Reported, waiting out the debounce interval.
    Pending,
    Active,
    /// Healing interval running.
    Healed,
    Stored,
}

impl FaultStatus {
    pub fn is_present(self) -> bool {
        matches!(self, FaultStatus::Pending | FaultStatus::Active)
    }

    pub fn dtc_status(self) -> u8 {
        match self {
            FaultStatus::Active => {
                dtc_status::TEST_FAILED | dtc_status::PENDING_DTC | dtc_status::CONFIRMED_DTC
            }
            FaultStatus::Pending => dtc_status::PENDING_DTC,
            FaultStatus::Stored => dtc_status::CONFIRMED_DTC,
            FaultStatus::Inactive | FaultStatus::Healed => 0,
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            FaultStatus::Inactive => 0,
            FaultStatus::Pending => 1,
            FaultStatus::Active => 2,
            FaultStatus::Healed => 3,
            FaultStatus::Stored => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FaultSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub code: FaultCode,
    pub status: FaultStatus,
    pub severity: FaultSeverity,
    pub first_occurrence: u32,
    pub last_occurrence: u32,
    pub occurrence_count: u16,
    pub recovery_attempts: u8,
    pub freeze_frame: Option<[u8; 8]>,
    /// Start of the running debounce or healing timer.
    #[serde(skip)]
    status_since: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtcEntry {
    pub code: FaultCode,
    pub status: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("recovery failed: {reason}")]
pub struct RecoveryError {
    pub reason: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FaultError {
    #[error("fault table full")]
    BufferFull,
    #[error("unknown fault code {0:#06x}")]
    UnknownCode(FaultCode),
    #[error("DTC group {0:#08x} names no fault code")]
    UnknownGroup(u32),
    #[error("no recovery action registered for {0:#06x}")]
    RecoveryNotRegistered(FaultCode),
    #[error("recovery attempts exhausted for {0:#06x}")]
    RecoveryBudgetExhausted(FaultCode),
    #[error("recovery registry full")]
    RegistryFull,
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

/// Something that can try to bring a faulted function back.
pub trait RecoveryAction {
    fn attempt_recovery(&mut self, code: FaultCode) -> Result<(), RecoveryError>;
}

impl<F> RecoveryAction for F
where
    F: FnMut(FaultCode) -> Result<(), RecoveryError>,
{
    fn attempt_recovery(&mut self, code: FaultCode) -> Result<(), RecoveryError> {
        self(code)
    }
}

pub struct FaultManager {
    records: Vec<FaultRecord, MAX_FAULT_RECORDS>,
    recovery_actions: Vec<(FaultCode, Box<dyn RecoveryAction>), MAX_RECOVERY_ACTIONS>,
    config: FaultConfig,
    total_reports: u32,
    overflow_count: u32,
    most_recent: Option<FaultCode>,
    last_report_ms: u32,
}

impl core::fmt::Debug for FaultManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let registered: Vec<FaultCode, MAX_RECOVERY_ACTIONS> =
            self.recovery_actions.iter().map(|(code, _)| *code).collect();
        f.debug_struct("FaultManager")
            .field("records", &self.records)
            .field("recovery_actions", &registered)
            .field("config", &self.config)
            .field("total_reports", &self.total_reports)
            .field("overflow_count", &self.overflow_count)
            .finish_non_exhaustive()
    }
}

impl FaultManager {
    pub fn new(config: FaultConfig) -> Self {
        Self {
            records: Vec::new(),
            recovery_actions: Vec::new(),
            config,
            total_reports: 0,
            overflow_count: 0,
            most_recent: None,
            last_report_ms: 0,
        }
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    /// Reports an occurrence of `code`.
    ///
    /// A new or dormant fault enters `Pending` and starts its debounce timer.
    /// Repeated reports while `Pending` or `Active` only update the
    /// occurrence data.
    pub fn report(
        &mut self,
        code: FaultCode,
        severity: FaultSeverity,
        freeze_frame: Option<[u8; 8]>,
        now: u32,
    ) -> Result<(), FaultError> {
        if let Some(record) = self.records.iter_mut().find(|r| r.code == code) {
            if !record.status.is_present() {
                debug!(code, from = ?record.status, "fault re-entering debounce");
                record.status = FaultStatus::Pending;
                record.status_since = now;
            }
            record.severity = severity;
            record.last_occurrence = now;
            record.occurrence_count = record.occurrence_count.saturating_add(1);
            if freeze_frame.is_some() {
                record.freeze_frame = freeze_frame;
            }
        } else {
            let record = FaultRecord {
                code,
                status: FaultStatus::Pending,
                severity,
                first_occurrence: now,
                last_occurrence: now,
                occurrence_count: 1,
                recovery_attempts: 0,
                freeze_frame,
                status_since: now,
            };
            if self.records.push(record).is_err() {
                self.overflow_count = self.overflow_count.saturating_add(1);
                warn!(code, "fault table full, report dropped");
                return Err(FaultError::BufferFull);
            }
            debug!(code, ?severity, "new fault pending");
        }

        self.total_reports = self.total_reports.saturating_add(1);
        self.most_recent = Some(code);
        self.last_report_ms = now;
        Ok(())
    }

    /// Forces `code` to `Inactive` and resets its recovery budget.
    pub fn clear(&mut self, code: FaultCode) -> Result<(), FaultError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.code == code)
            .ok_or(FaultError::UnknownCode(code))?;
        record.status = FaultStatus::Inactive;
        record.recovery_attempts = 0;
        info!(code, "fault cleared");
        Ok(())
    }

    pub fn clear_all(&mut self) {
        for record in &mut self.records {
            record.status = FaultStatus::Inactive;
            record.recovery_attempts = 0;
        }
        info!(records = self.records.len(), "all faults cleared");
    }

    /// Starts healing a `Pending` or `Active` fault. Other states are left
    /// alone.
    pub fn heal(&mut self, code: FaultCode, now: u32) -> Result<(), FaultError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.code == code)
            .ok_or(FaultError::UnknownCode(code))?;
        if record.status.is_present() {
            record.status = FaultStatus::Healed;
            record.status_since = now;
            info!(code, "fault healing");
        }
        Ok(())
    }

    /// Advances debounce and healing timers and retries recovery for
    /// confirmed faults that still have budget left.
    pub fn tick(&mut self, now: u32) {
        let debounce = self.config.debounce_ms;
        let healing = self.config.healing_ms;
        let mut recover: Vec<FaultCode, MAX_FAULT_RECORDS> = Vec::new();

        for record in &mut self.records {
            let elapsed = now.wrapping_sub(record.status_since);
            match record.status {
                FaultStatus::Pending if elapsed >= debounce => {
                    record.status = FaultStatus::Active;
                    record.status_since = now;
                    info!(code = record.code, severity = ?record.severity, "fault confirmed");
                }
                FaultStatus::Healed if elapsed >= healing => {
                    record.status = FaultStatus::Stored;
                    record.status_since = now;
                    info!(code = record.code, "fault stored");
                }
                _ => {}
            }

            if record.status == FaultStatus::Active
                && record.recovery_attempts < self.config.max_recovery_attempts
                && self.recovery_actions.iter().any(|(c, _)| *c == record.code)
            {
                // Capacities match, so this push cannot fail.
                let _ = recover.push(record.code);
            }
        }

        for code in recover {
            if let Err(e) = self.attempt_recovery(code, now) {
                debug!(code, error = %e, "automatic recovery failed");
            }
        }
    }

    /// Registers the recovery action for `code`, replacing any earlier one.
    pub fn register_recovery(
        &mut self,
        code: FaultCode,
        action: Box<dyn RecoveryAction>,
    ) -> Result<(), FaultError> {
        if let Some(slot) = self.recovery_actions.iter_mut().find(|(c, _)| *c == code) {
            slot.1 = action;
            return Ok(());
        }
        self.recovery_actions
            .push((code, action))
            .map_err(|_| FaultError::RegistryFull)
    }

    /// Runs the registered recovery action once. The attempt is counted
    /// before the action runs; success heals the fault.
    pub fn attempt_recovery(&mut self, code: FaultCode, now: u32) -> Result<(), FaultError> {
        let max_attempts = self.config.max_recovery_attempts;
        let record = self
            .records
            .iter_mut()
            .find(|r| r.code == code)
            .ok_or(FaultError::UnknownCode(code))?;
        let (_, action) = self
            .recovery_actions
            .iter_mut()
            .find(|(c, _)| *c == code)
            .ok_or(FaultError::RecoveryNotRegistered(code))?;

        if record.recovery_attempts >= max_attempts {
            return Err(FaultError::RecoveryBudgetExhausted(code));
        }
        record.recovery_attempts += 1;
        let attempt = record.recovery_attempts;

        match action.attempt_recovery(code) {
            Ok(()) => {
                info!(code, attempt, "recovery succeeded");
                self.heal(code, now)
            }
            Err(e) => {
                warn!(code, attempt, reason = e.reason, "recovery attempt failed");
                Err(e.into())
            }
        }
    }

    pub fn status(&self, code: FaultCode) -> FaultStatus {
        self.record(code).map_or(FaultStatus::Inactive, |r| r.status)
    }

    pub fn record(&self, code: FaultCode) -> Option<&FaultRecord> {
        self.records.iter().find(|r| r.code == code)
    }

    pub fn records(&self) -> impl Iterator<Item = &FaultRecord> {
        self.records.iter()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_active(&self, code: FaultCode) -> bool {
        self.status(code) == FaultStatus::Active
    }

    pub fn is_present(&self, code: FaultCode) -> bool {
        self.status(code).is_present()
    }

    /// Pending plus active faults.
    pub fn active_count(&self) -> usize {
        self.records.iter().filter(|r| r.status.is_present()).count()
    }

    pub fn active_codes(&self) -> impl Iterator<Item = FaultCode> + '_ {
        self.records
            .iter()
            .filter(|r| r.status.is_present())
            .map(|r| r.code)
    }

    /// Present faults within one subsystem namespace.
    pub fn present_in(&self, namespace: FaultCode) -> usize {
        self.records
            .iter()
            .filter(|r| r.status.is_present() && codes::namespace(r.code) == namespace)
            .count()
    }

    pub fn any_critical(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.severity == FaultSeverity::Critical && r.status.is_present())
    }

    pub fn most_recent(&self) -> Option<FaultCode> {
        self.most_recent
    }

    pub fn total_reports(&self) -> u32 {
        self.total_reports
    }

    pub fn overflow_count(&self) -> u32 {
        self.overflow_count
    }

    pub fn read_dtc_by_status(&self, mask: u8) -> Vec<DtcEntry, MAX_FAULT_RECORDS> {
        self.records
            .iter()
            .map(|r| DtcEntry {
                code: r.code,
                status: r.status.dtc_status(),
            })
            .filter(|e| e.status & mask != 0)
            .collect()
    }

    /// Writes a `ReadDTCInformation` body: the availability mask, then
    /// `code_hi, code_lo, status` per matching fault. Returns the bytes used.
    pub fn encode_dtc_response(&self, mask: u8, buf: &mut [u8]) -> usize {
        let Some(first) = buf.first_mut() else {
            return 0;
        };
        *first = mask;

        let mut offset = 1;
        for entry in self.read_dtc_by_status(mask) {
            let Some(slot) = buf.get_mut(offset..offset + 3) else {
                break;
            };
            slot[..2].copy_from_slice(&entry.code.to_be_bytes());
            slot[2] = entry.status;
            offset += 3;
        }
        offset
    }

    pub fn clear_dtc(&mut self, group: u32) -> Result<(), FaultError> {
        if group == CLEAR_ALL_DTC_GROUP {
            self.clear_all();
            return Ok(());
        }
        match FaultCode::try_from(group) {
            Ok(code) => self.clear(code),
            Err(_) => Err(FaultError::UnknownGroup(group)),
        }
    }

    /// Packs `record_count, active_count` (big-endian u16 each) followed by
    /// `code, status` per record, stopping when `buf` runs out.
    pub fn snapshot(&self, buf: &mut [u8]) -> usize {
        if buf.len() < 4 {
            return 0;
        }
        buf[..2].copy_from_slice(&(self.records.len() as u16).to_be_bytes());
        buf[2..4].copy_from_slice(&(self.active_count() as u16).to_be_bytes());

        let mut offset = 4;
        for record in &self.records {
            let Some(slot) = buf.get_mut(offset..offset + 3) else {
                break;
            };
            slot[..2].copy_from_slice(&record.code.to_be_bytes());
            slot[2] = record.status.as_byte();
            offset += 3;
        }
        offset
    }

    /// Bit-packed projection of the present faults.
    ///
    /// flags1: wrong length, checksum, counter, command range, timeout,
    /// bit 7 any critical. flags2: door, lighting, turn signal, left bulb,
    /// right bulb, system.
    pub fn status_flags(&self) -> (u8, u8) {
        let mut flags1 = 0u8;
        let mut flags2 = 0u8;

        for record in self.records.iter().filter(|r| r.status.is_present()) {
            flags1 |= match codes::kind(record.code) {
                codes::WRONG_LENGTH => 0x01,
                codes::CHECKSUM => 0x02,
                codes::COUNTER => 0x04,
                codes::COMMAND_RANGE => 0x08,
                codes::TIMEOUT => 0x10,
                _ => 0,
            };
            flags2 |= match codes::namespace(record.code) {
                codes::DOOR_BASE => 0x01,
                codes::LIGHTING_BASE => 0x02,
                codes::TURN_BASE => 0x04,
                codes::SYSTEM_BASE => 0x20,
                _ => 0,
            };
            flags2 |= match record.code {
                codes::TURN_LEFT_BULB => 0x08,
                codes::TURN_RIGHT_BULB => 0x10,
                _ => 0,
            };
        }
        if self.any_critical() {
            flags1 |= 0x80;
        }
        (flags1, flags2)
    }

    pub fn build_status_frame(&self, counter: &mut TxCounter) -> Result<CanFrame, FrameError> {
        let (flags1, flags2) = self.status_flags();
        let total = u8::try_from(self.total_reports).unwrap_or(u8::MAX);
        let recent = self.most_recent.map_or(0, codes::compact);
        let seconds = u16::try_from(self.last_report_ms / 1000).unwrap_or(u16::MAX);
        let [sec_lo, sec_hi] = seconds.to_le_bytes();

        encode_frame(
            id::FAULT_STATUS,
            &[flags1, flags2, total, recent, sec_lo, sec_hi],
            counter,
        )
    }
}

impl Default for FaultManager {
    fn default() -> Self {
        Self::new(FaultConfig::default())
    }
}
