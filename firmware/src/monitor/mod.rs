//! Adapters that bridge the firmware runtime with `monitor-core`.
//!
//! The shared pipeline is generic over its instant, queue, and peripheral
//! types; this module binds them to Embassy's monotonic clock and channel so
//! the runtime tasks can drive the core without restructuring. Everything
//! here compiles for the host as well, which is where the adapter tests run.

#![allow(dead_code)]

use core::convert::Infallible;
use core::ops::Add;
use core::time::Duration as CoreDuration;

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender, TryReceiveError, TrySendError};
use embassy_time::{Duration as EmbassyDuration, Instant};

use monitor_core::history::MonitorInstant;
use monitor_core::pipeline::{
    AdcAccess, AdcChannelConfig, AdcEvent, AdcEventConsumer, AdcEventProducer, FetchError,
    MeasurementTimer, PublishError,
};

/// Depth of the interrupt-to-deferred event queue: one sample completion plus
/// one calibration signal.
pub const ADC_EVENT_QUEUE_DEPTH: usize = 2;

#[cfg(target_os = "none")]
type MonitorMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type MonitorMutex = NoopRawMutex;

/// Queue carrying converter completions out of the interrupt context.
pub type AdcEventQueue = Channel<MonitorMutex, AdcEvent, ADC_EVENT_QUEUE_DEPTH>;

/// Convenience sender type alias for the event queue.
pub type AdcEventSender<'a> = Sender<'a, MonitorMutex, AdcEvent, ADC_EVENT_QUEUE_DEPTH>;

/// Convenience receiver type alias for the event queue.
pub type AdcEventReceiver<'a> = Receiver<'a, MonitorMutex, AdcEvent, ADC_EVENT_QUEUE_DEPTH>;

/// Type binding the shared pipeline's instant to Embassy's monotonic clock.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    /// Returns the wrapped Embassy instant.
    #[must_use]
    pub const fn into_inner(self) -> Instant {
        self.0
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl MonitorInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> CoreDuration {
        CoreDuration::from_micros(self.0.as_micros().saturating_sub(earlier.0.as_micros()))
    }
}

impl Add<CoreDuration> for FirmwareInstant {
    type Output = Self;

    fn add(self, rhs: CoreDuration) -> Self::Output {
        Self(self.0 + core_duration_to_embassy(rhs))
    }
}

fn core_duration_to_embassy(duration: CoreDuration) -> EmbassyDuration {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    EmbassyDuration::from_micros(micros)
}

/// Adapter exposing the Embassy channel sender as the core event producer.
pub struct EventPublisher<'a> {
    sender: AdcEventSender<'a>,
}

impl<'a> EventPublisher<'a> {
    /// Creates a new adapter that wraps the provided sender.
    #[must_use]
    pub fn new(sender: AdcEventSender<'a>) -> Self {
        Self { sender }
    }
}

impl AdcEventProducer for EventPublisher<'_> {
    type Error = TrySendError<AdcEvent>;

    fn try_publish(&mut self, event: AdcEvent) -> Result<(), PublishError<Self::Error>> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(PublishError::Full),
        }
    }
}

/// Adapter exposing the Embassy channel receiver as the core event consumer.
pub struct EventFetcher<'a> {
    receiver: AdcEventReceiver<'a>,
}

impl<'a> EventFetcher<'a> {
    /// Creates a new adapter that wraps the provided receiver.
    #[must_use]
    pub fn new(receiver: AdcEventReceiver<'a>) -> Self {
        Self { receiver }
    }
}

impl AdcEventConsumer for EventFetcher<'_> {
    type Error = Infallible;

    fn try_fetch(&mut self) -> Result<Option<AdcEvent>, FetchError<Self::Error>> {
        match self.receiver.try_receive() {
            Ok(event) => Ok(Some(event)),
            Err(TryReceiveError::Empty) => Ok(None),
        }
    }
}

/// Converter access handle for the firmware.
///
/// The pipeline tracks the claim; the runtime task performs the asynchronous
/// acquisition between `begin_sample` and `release`, constructing the SAADC
/// driver only while the claim is open so the peripheral powers down between
/// cycles.
pub struct SaadcHandle {
    claimed: bool,
}

impl SaadcHandle {
    /// Creates an unclaimed handle.
    #[must_use]
    pub const fn new() -> Self {
        Self { claimed: false }
    }

    /// Returns `true` while a calibration or sample claim is open.
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        self.claimed
    }
}

impl Default for SaadcHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AdcAccess for SaadcHandle {
    type Error = Infallible;

    fn begin_calibration(&mut self) -> Result<(), Self::Error> {
        self.claimed = true;
        Ok(())
    }

    fn begin_sample(&mut self, _: &AdcChannelConfig) -> Result<(), Self::Error> {
        self.claimed = true;
        Ok(())
    }

    fn release(&mut self) {
        self.claimed = false;
    }
}

/// Software arm/disarm record behind the periodic-trigger seam.
///
/// The runtime task awaits the armed interval itself; this type only holds
/// the state the pipeline's `enable`/`disable` operations act on.
pub struct SoftTimer {
    interval_ms: Option<u32>,
}

impl SoftTimer {
    /// Creates a disarmed timer.
    #[must_use]
    pub const fn new() -> Self {
        Self { interval_ms: None }
    }

    /// Returns the armed interval, if periodic measurement is running.
    #[must_use]
    pub const fn interval_ms(&self) -> Option<u32> {
        self.interval_ms
    }
}

impl Default for SoftTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasurementTimer for SoftTimer {
    type Error = Infallible;

    fn start(&mut self, interval_ms: u32) -> Result<(), Self::Error> {
        self.interval_ms = Some(interval_ms);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        self.interval_ms = None;
        Ok(())
    }
}
