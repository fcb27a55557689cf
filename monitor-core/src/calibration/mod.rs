//! Offset calibration state machine.
//!
//! The converter must complete a one-shot offset calibration before any
//! sample is trusted. The controller here is deliberately sans-IO: the
//! embedding layer starts the peripheral's calibration, feeds the completion
//! signal back through [`OffsetCalibrator::note_done`], and polls with its
//! own monotonic instants. The wait is always bounded by a deadline; there is
//! no unbounded spin.

use core::fmt;
use core::ops::Add;
use core::time::Duration;

/// Lifecycle of the one-shot offset calibration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationState {
    Idle,
    InProgress,
    Done,
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationState::Idle => f.write_str("idle"),
            CalibrationState::InProgress => f.write_str("in-progress"),
            CalibrationState::Done => f.write_str("done"),
        }
    }
}

/// Result of one bounded-wait poll.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationPoll {
    /// Calibration has not completed yet and the deadline has not passed.
    Pending,
    /// The completion signal has been observed.
    Complete,
    /// The deadline elapsed before the completion signal arrived; the
    /// controller returns to idle so a later enable attempt may retry.
    TimedOut,
}

/// Start-up calibration failure, fatal to pipeline initialization.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationError<E> {
    /// The completion signal did not arrive within the caller's bound.
    Timeout,
    /// The peripheral rejected the calibration request.
    Peripheral(E),
}

/// Tracks the one-shot calibration and its deadline.
#[derive(Copy, Clone, Debug)]
pub struct OffsetCalibrator<TInstant> {
    state: CalibrationState,
    deadline: Option<TInstant>,
}

impl<TInstant> OffsetCalibrator<TInstant>
where
    TInstant: Copy + Ord,
{
    /// Creates a controller that has never calibrated.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: CalibrationState::Idle,
            deadline: None,
        }
    }

    /// Reports the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> CalibrationState {
        self.state
    }

    /// Returns `true` once the completion signal has been observed.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.state, CalibrationState::Done)
    }

    /// Arms the deadline and marks calibration as running.
    ///
    /// A controller that already reached [`CalibrationState::Done`] stays
    /// done; the transition happens exactly once.
    pub fn begin(&mut self, now: TInstant, timeout: Duration)
    where
        TInstant: Add<Duration, Output = TInstant>,
    {
        if self.is_done() {
            return;
        }
        self.state = CalibrationState::InProgress;
        self.deadline = Some(now + timeout);
    }

    /// Records the peripheral's completion signal.
    pub fn note_done(&mut self) {
        if matches!(self.state, CalibrationState::InProgress) {
            self.state = CalibrationState::Done;
            self.deadline = None;
        }
    }

    /// Checks for completion or deadline expiry.
    ///
    /// Expiry resets the controller to idle so the next enable attempt may
    /// retry calibration from scratch.
    pub fn poll(&mut self, now: TInstant) -> CalibrationPoll {
        match self.state {
            CalibrationState::Done => CalibrationPoll::Complete,
            CalibrationState::Idle => CalibrationPoll::Pending,
            CalibrationState::InProgress => {
                if let Some(deadline) = self.deadline
                    && now >= deadline
                {
                    self.state = CalibrationState::Idle;
                    self.deadline = None;
                    CalibrationPoll::TimedOut
                } else {
                    CalibrationPoll::Pending
                }
            }
        }
    }
}

impl<TInstant> Default for OffsetCalibrator<TInstant>
where
    TInstant: Copy + Ord,
{
    fn default() -> Self {
        Self::new()
    }
}
