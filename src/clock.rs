use serde::{Deserialize, Serialize};

/// Ticks needed to prepare one byte or one result set.
pub const SHORT_DELAY_TICKS: u32 = 2;
/// Ticks for the motor to settle after spin-up or spin-down.
pub const LONG_DELAY_TICKS: u32 = 512;

/// Reason the interrupt line is (or will be) raised.
///
/// Ordered by precedence: anything from `SeekEnd` on has to be collected
/// with SENSE INTERRUPT STATUS.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum InterruptState {
    #[default]
    None,
    ResultReady,
    ExecByteReady,
    SeekEnd,
    ReadyChange,
}

impl InterruptState {
    pub fn needs_sense(&self) -> bool {
        *self >= InterruptState::SeekEnd
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    Short,
    Long,
}

/// Countdown model of the controller's interrupt line.
///
/// A scheduled interrupt counts down on every `tick` and raises the line when
/// it reaches zero. While `ticks_remaining > 0` the state is never `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptClock {
    state: InterruptState,
    ticks_remaining: u32,
    asserted: bool,
    short_delay: u32,
    long_delay: u32,
}

impl InterruptClock {
    pub fn new(short_delay: u32, long_delay: u32) -> Self {
        Self {
            state: InterruptState::None,
            ticks_remaining: 0,
            asserted: false,
            short_delay: short_delay.max(1),
            long_delay: long_delay.max(1),
        }
    }

    /// Drops any pending interrupt. Returns whether the line was raised.
    pub fn reset(&mut self) -> bool {
        let was_asserted = self.asserted;
        self.state = InterruptState::None;
        self.ticks_remaining = 0;
        self.asserted = false;
        was_asserted
    }

    /// Arms `state`, replacing whatever was pending. Returns whether a
    /// raised line had to be dropped for it.
    pub fn schedule(&mut self, state: InterruptState, delay: Delay) -> bool {
        let was_asserted = self.reset();
        if state == InterruptState::None {
            return was_asserted;
        }

        self.state = state;
        self.ticks_remaining = match delay {
            Delay::Short => self.short_delay,
            Delay::Long => self.long_delay,
        };
        was_asserted
    }

    /// Advances one tick. Returns the interrupt raised on this tick, if any.
    pub fn tick(&mut self) -> Option<InterruptState> {
        if self.ticks_remaining == 0 {
            return None;
        }

        self.ticks_remaining -= 1;
        if self.ticks_remaining == 0 {
            self.asserted = true;
            return Some(self.state);
        }
        None
    }

    /// Clears the pending interrupt as serviced. Returns whether the line
    /// was raised.
    pub fn acknowledge(&mut self) -> bool {
        self.reset()
    }

    pub fn state(&self) -> InterruptState {
        self.state
    }

    pub fn ticks_remaining(&self) -> u32 {
        self.ticks_remaining
    }

    pub fn is_asserted(&self) -> bool {
        self.asserted
    }

    pub fn is_pending(&self) -> bool {
        self.state != InterruptState::None
    }

    pub fn short_delay(&self) -> u32 {
        self.short_delay
    }

    pub fn long_delay(&self) -> u32 {
        self.long_delay
    }
}

impl Default for InterruptClock {
    fn default() -> Self {
        Self::new(SHORT_DELAY_TICKS, LONG_DELAY_TICKS)
    }
}
