//! [`JointCommandBuffer`] – latest-value command cell for one joint in one
//! mode.
//!
//! Writers (command ingestion) and the single reader (the simulation loop)
//! may live on different threads.  A write always overwrites the stored
//! value and marks it pending; a drain atomically returns the value and clears
//! the pending flag.  There is no queue: between two drains only the last
//! write survives.
//!
//! # Example
//!
//! ```rust
//! use simbridge_runtime::command_buffer::JointCommandBuffer;
//!
//! let buffer = JointCommandBuffer::new();
//! buffer.write(0.5);
//! buffer.write(1.2);
//!
//! let first = buffer.drain();
//! assert!(first.was_pending);
//! assert_eq!(first.value, Some(1.2));
//!
//! // Nothing new since the last drain.
//! assert!(!buffer.drain().was_pending);
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

use simbridge_types::JointMode;

// ─────────────────────────────────────────────────────────────────────────────
// JointCommandBuffer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    value: Option<f64>,
    pending: bool,
}

/// Result of [`JointCommandBuffer::drain`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrainedCommand {
    /// Last value ever written, `None` if the buffer was never written.
    /// Meaningless to callers unless `was_pending` is set.
    pub value: Option<f64>,
    /// `true` when a write happened since the previous drain.
    pub was_pending: bool,
}

impl DrainedCommand {
    /// The value, but only if it was written since the previous drain.
    pub fn fresh(self) -> Option<f64> {
        if self.was_pending { self.value } else { None }
    }
}

/// Thread-safe single-value command cell.
#[derive(Debug, Default)]
pub struct JointCommandBuffer {
    slot: Mutex<Slot>,
}

impl JointCommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` and mark the buffer pending.  Never blocks for longer
    /// than a concurrent drain holds the lock.
    pub fn write(&self, value: f64) {
        let mut slot = self.lock();
        slot.value = Some(value);
        slot.pending = true;
    }

    /// Atomically read the stored value and clear the pending flag.
    pub fn drain(&self) -> DrainedCommand {
        let mut slot = self.lock();
        let drained = DrainedCommand {
            value: slot.value,
            was_pending: slot.pending,
        };
        slot.pending = false;
        drained
    }

    /// `true` if a write happened since the last drain.
    pub fn is_pending(&self) -> bool {
        self.lock().pending
    }

    // The slot holds plain data, so a panic in another holder cannot leave it
    // half-written.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CommandBuffers
// ─────────────────────────────────────────────────────────────────────────────

/// The full buffer set: one [`JointCommandBuffer`] per registered joint per
/// [`JointMode`], addressed by registry slot.
///
/// Created once at startup and shared between command ingestion and the
/// [`CommandRouter`][crate::command_router::CommandRouter].
#[derive(Debug)]
pub struct CommandBuffers {
    position: Vec<JointCommandBuffer>,
    velocity: Vec<JointCommandBuffer>,
    effort: Vec<JointCommandBuffer>,
}

impl CommandBuffers {
    /// Allocate buffers for `joint_count` joints.
    pub fn new(joint_count: usize) -> Self {
        let make = || (0..joint_count).map(|_| JointCommandBuffer::new()).collect();
        Self {
            position: make(),
            velocity: make(),
            effort: make(),
        }
    }

    /// Number of joints covered.
    pub fn joint_count(&self) -> usize {
        self.position.len()
    }

    /// Buffer for registry slot `slot` in `mode`.
    pub fn get(&self, slot: usize, mode: JointMode) -> Option<&JointCommandBuffer> {
        self.mode(mode).get(slot)
    }

    /// All buffers of one mode, in registry order.
    pub fn mode(&self, mode: JointMode) -> &[JointCommandBuffer] {
        match mode {
            JointMode::Position => &self.position,
            JointMode::Velocity => &self.velocity,
            JointMode::Effort => &self.effort,
        }
    }

    /// `true` if any buffer of any mode holds an undrained write.
    pub fn any_pending(&self) -> bool {
        JointMode::ALL
            .iter()
            .any(|&mode| self.mode(mode).iter().any(JointCommandBuffer::is_pending))
    }
}
