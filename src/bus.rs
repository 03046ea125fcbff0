//! Transport seam between the module and the CAN controller.

use crate::codec::CanFrame;
use heapless::Deque;
use thiserror::Error;
use tracing::warn;

pub const RX_QUEUE_CAPACITY: usize = 32;
pub const TX_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("frame queue full")]
    QueueFull,
    #[error("transmit failed")]
    Transmit,
}

/// Non-blocking CAN access. `send` returns `WouldBlock` when the controller
/// cannot take a frame right now; the caller drops it and moves on.
pub trait CanBus {
    fn send(&mut self, frame: &CanFrame) -> nb::Result<(), BusError>;
    fn try_receive(&mut self) -> Option<CanFrame>;
}

/// Bounded FIFO that rejects new frames when full instead of evicting.
#[derive(Debug)]
pub struct FrameQueue<const N: usize> {
    frames: Deque<CanFrame, N>,
    overflows: u32,
}

impl<const N: usize> FrameQueue<N> {
    pub const fn new() -> Self {
        Self {
            frames: Deque::new(),
            overflows: 0,
        }
    }

    pub fn push(&mut self, frame: CanFrame) -> Result<(), BusError> {
        self.frames.push_back(frame).map_err(|frame| {
            self.overflows = self.overflows.saturating_add(1);
            warn!(frame_id = frame.id(), overflows = self.overflows, "frame queue overflow");
            BusError::QueueFull
        })
    }

    pub fn pop(&mut self) -> Option<CanFrame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.is_full()
    }

    pub fn overflows(&self) -> u32 {
        self.overflows
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

impl<const N: usize> Default for FrameQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory bus. Frames pushed with [`LoopbackBus::inject`] are received in
/// order; sent frames collect until taken.
#[derive(Debug, Default)]
pub struct LoopbackBus {
    rx: FrameQueue<RX_QUEUE_CAPACITY>,
    tx: FrameQueue<TX_QUEUE_CAPACITY>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an inbound frame, as an interrupt handler would.
    pub fn inject(&mut self, frame: CanFrame) -> Result<(), BusError> {
        self.rx.push(frame)
    }

    pub fn pending_rx(&self) -> usize {
        self.rx.len()
    }

    pub fn rx_overflows(&self) -> u32 {
        self.rx.overflows()
    }

    /// Drains every transmitted frame, oldest first.
    pub fn take_sent(&mut self) -> Vec<CanFrame> {
        core::iter::from_fn(|| self.tx.pop()).collect()
    }
}

impl CanBus for LoopbackBus {
    fn send(&mut self, frame: &CanFrame) -> nb::Result<(), BusError> {
        if self.tx.is_full() {
            return Err(nb::Error::WouldBlock);
        }
        self.tx.push(frame.clone()).map_err(nb::Error::Other)
    }

    fn try_receive(&mut self) -> Option<CanFrame> {
        self.rx.pop()
    }
}
