// Protocol phases and their byte buffers

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

pub const COMMAND_BUFFER_SIZE: usize = 16;
pub const RESULT_BUFFER_SIZE: usize = 16;
pub const EXECUTION_BUFFER_SIZE: usize = 8192;

/// Idle → Command → {Result | Execution → Result} → Idle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FdcPhase {
    #[default]
    Idle,
    Command,
    Execution,
    Result,
}

impl fmt::Display for FdcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FdcPhase::Idle => "idle",
            FdcPhase::Command => "command",
            FdcPhase::Execution => "execution",
            FdcPhase::Result => "result",
        };
        write!(f, "{}", name)
    }
}

/// Fixed-capacity transfer buffer for one phase.
///
/// `position` counts bytes already transferred and `length` the bytes still
/// to go; their sum is the byte count fixed by `begin`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseBuffer<const N: usize> {
    #[serde(with = "BigArray")]
    data: [u8; N],
    position: usize,
    length: usize,
}

impl<const N: usize> PhaseBuffer<N> {
    pub fn new() -> Self {
        Self {
            data: [0; N],
            position: 0,
            length: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Starts a transfer of `length` bytes (clamped to the capacity).
    pub fn begin(&mut self, length: usize) {
        self.position = 0;
        self.length = length.min(N);
    }

    /// Copies `bytes` in and starts a transfer of exactly those bytes.
    pub fn load(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(N);
        self.data[..len].copy_from_slice(&bytes[..len]);
        self.begin(len);
    }

    /// Stores the next incoming byte. Returns `false` once the transfer is
    /// complete and the byte was dropped.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.length == 0 {
            return false;
        }
        self.data[self.position] = byte;
        self.position += 1;
        self.length -= 1;
        true
    }

    /// Takes the next outgoing byte.
    pub fn pop(&mut self) -> Option<u8> {
        if self.length == 0 {
            return None;
        }
        let byte = self.data[self.position];
        self.position += 1;
        self.length -= 1;
        Some(byte)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.length
    }

    pub fn is_done(&self) -> bool {
        self.length == 0
    }

    /// `position + length` fits the capacity. Always true for buffers built
    /// through this API; deserialized ones have to be checked.
    pub fn is_consistent(&self) -> bool {
        self.position
            .checked_add(self.length)
            .is_some_and(|end| end <= N)
    }

    /// Bytes transferred so far.
    pub fn transferred(&self) -> &[u8] {
        &self.data[..self.position]
    }

    /// Bytes covered by the current transfer, transferred or not.
    pub fn contents(&self) -> &[u8] {
        &self.data[..self.position + self.length]
    }

    /// Scratch space for filling the buffer before `begin`.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn clear(&mut self) {
        self.position = 0;
        self.length = 0;
    }
}

impl<const N: usize> Default for PhaseBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for PhaseBuffer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseBuffer")
            .field("capacity", &N)
            .field("position", &self.position)
            .field("length", &self.length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_until_full() {
        let mut buf = PhaseBuffer::<16>::new();
        buf.begin(3);
        assert!(buf.push(1));
        assert!(buf.push(2));
        assert!(buf.push(3));
        assert!(!buf.push(4));
        assert_eq!(buf.transferred(), &[1, 2, 3]);
        assert!(buf.is_done());
    }

    #[test]
    fn test_position_plus_length_is_constant() {
        let mut buf = PhaseBuffer::<16>::new();
        buf.load(&[9, 8, 7, 6]);
        while let Some(_) = buf.pop() {
            assert_eq!(buf.position() + buf.remaining(), 4);
        }
        assert_eq!(buf.pop(), None);
    }

    #[test]
    fn test_begin_clamps_to_capacity() {
        let mut buf = PhaseBuffer::<EXECUTION_BUFFER_SIZE>::new();
        buf.begin(16384);
        assert_eq!(buf.remaining(), EXECUTION_BUFFER_SIZE);
    }

    #[test]
    fn test_deserialized_buffer_consistency() {
        let mut buf = PhaseBuffer::<16>::new();
        buf.load(&[1, 2, 3, 4]);
        buf.pop();
        assert!(buf.is_consistent());

        let mut value = serde_json::to_value(&buf).unwrap();
        value["position"] = 14.into();
        let broken: PhaseBuffer<16> = serde_json::from_value(value).unwrap();
        assert!(!broken.is_consistent());
    }
}
