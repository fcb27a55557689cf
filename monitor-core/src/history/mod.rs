//! Bounded measurement history shared by firmware and host targets.
//!
//! The pipeline appends one record per completed cycle into a fixed-size
//! ring, giving the embedding layer an allocation-free view of recent
//! measurements (the emulator's `history` command, firmware diagnostics)
//! without the core emitting any log lines itself.

use core::time::Duration;

use heapless::{HistoryBuf, OldestOrdered};

use crate::pipeline::MeasurementEvent;

/// Trait implemented by monotonic instant wrappers used for history tracking.
pub trait MonitorInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Total number of measurement records retained in memory.
pub const HISTORY_CAPACITY: usize = 32;

/// One completed measurement cycle as retained by the ring.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MeasurementRecord<TInstant>
where
    TInstant: Copy,
{
    pub seq: u32,
    pub timestamp: TInstant,
    pub elapsed_since_previous: Option<Duration>,
    pub event: MeasurementEvent,
}

/// Fixed-size ring of the most recent measurement records.
pub struct MeasurementLog<TInstant, const CAPACITY: usize = HISTORY_CAPACITY>
where
    TInstant: Copy,
{
    ring: HistoryBuf<MeasurementRecord<TInstant>, CAPACITY>,
    last_recorded_at: Option<TInstant>,
    next_seq: u32,
}

impl<TInstant, const CAPACITY: usize> MeasurementLog<TInstant, CAPACITY>
where
    TInstant: MonitorInstant,
{
    /// Creates an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_recorded_at: None,
            next_seq: 0,
        }
    }

    /// Appends a completed measurement, capturing the elapsed time since the
    /// previous record, and returns its sequence number.
    pub fn record(&mut self, event: MeasurementEvent, timestamp: TInstant) -> u32 {
        let elapsed = self
            .last_recorded_at
            .map(|previous| timestamp.saturating_duration_since(previous));
        self.last_recorded_at = Some(timestamp);

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        self.ring.write(MeasurementRecord {
            seq,
            timestamp,
            elapsed_since_previous: elapsed,
            event,
        });

        seq
    }

    /// Returns the most recent record, if any measurement has completed.
    #[must_use]
    pub fn latest(&self) -> Option<&MeasurementRecord<TInstant>> {
        self.ring.recent()
    }

    /// Returns an iterator over retained records in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, MeasurementRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Returns the number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no measurement has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl<TInstant, const CAPACITY: usize> Default for MeasurementLog<TInstant, CAPACITY>
where
    TInstant: MonitorInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::MeasurementKind;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MicrosInstant(u64);

    impl MonitorInstant for MicrosInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    fn data_event(voltage_mv: u16, level_percent: u8) -> MeasurementEvent {
        MeasurementEvent {
            kind: MeasurementKind::Data,
            voltage_mv,
            level_percent,
            valid: true,
        }
    }

    #[test]
    fn records_elapsed_between_measurements() {
        let mut log = MeasurementLog::<MicrosInstant>::new();

        let first = log.record(data_event(3700, 55), MicrosInstant(100));
        assert_eq!(first, 0);
        assert_eq!(
            log.latest().expect("record present").elapsed_since_previous,
            None
        );

        let second = log.record(data_event(3690, 55), MicrosInstant(60_100));
        assert_eq!(second, 1);
        let record = log.latest().expect("record present");
        assert_eq!(
            record.elapsed_since_previous,
            Some(Duration::from_micros(60_000))
        );
        assert_eq!(record.event.voltage_mv, 3690);
    }

    #[test]
    fn ring_retains_the_most_recent_records() {
        let mut log = MeasurementLog::<MicrosInstant, 4>::new();
        for index in 0..6_u32 {
            log.record(
                data_event(3700, 55),
                MicrosInstant(u64::from(index) * 1_000),
            );
        }

        assert_eq!(log.len(), 4);
        let oldest = log.oldest_first().next().expect("ring not empty");
        assert_eq!(oldest.seq, 2);
        assert_eq!(log.latest().expect("ring not empty").seq, 5);
    }
}
