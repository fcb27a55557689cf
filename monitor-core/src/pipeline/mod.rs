//! Measurement pipeline shared between firmware and host targets.
//!
//! This module defines the configuration surface, the trait seams for every
//! external collaborator (converter peripheral, event queue, periodic timer,
//! level sink, event observer), and the [`BatteryMonitor`] object that drives
//! one measurement cycle from trigger to dispatch. The monitor is sans-IO:
//! firmware and emulator implementations provide concrete peripheral/queue
//! types that satisfy these traits while reusing the shared pipeline logic.

use core::fmt;
use core::ops::Add;
use core::time::Duration;

use crate::calibration::{CalibrationError, CalibrationPoll, CalibrationState, OffsetCalibrator};
use crate::conversion::{AdcDescriptor, AdcGain, DividerConfig, DividerScale, raw_to_millivolts};
use crate::history::{MeasurementLog, MonitorInstant};
use crate::soc::SocTable;

/// Lower bound accepted for the measurement interval unless a board profile
/// overrides it.
pub const DEFAULT_MIN_MEAS_INTERVAL_MS: u32 = 100;

/// Operating thresholds for event classification.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ThresholdConfig {
    pub voltage_low_mv: u16,
    pub voltage_full_mv: u16,
}

impl ThresholdConfig {
    /// Creates a threshold pair; `low <= full` is enforced at pipeline
    /// initialization.
    #[must_use]
    pub const fn new(voltage_low_mv: u16, voltage_full_mv: u16) -> Self {
        Self {
            voltage_low_mv,
            voltage_full_mv,
        }
    }
}

/// Converter acquisition window per sample.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcquisitionTime {
    Us3,
    Us5,
    Us10,
    Us15,
    Us20,
    Us40,
}

impl AcquisitionTime {
    /// Acquisition window in microseconds.
    #[must_use]
    pub const fn micros(self) -> u8 {
        match self {
            AcquisitionTime::Us3 => 3,
            AcquisitionTime::Us5 => 5,
            AcquisitionTime::Us10 => 10,
            AcquisitionTime::Us15 => 15,
            AcquisitionTime::Us20 => 20,
            AcquisitionTime::Us40 => 40,
        }
    }
}

/// Channel setup applied when the scheduler claims the converter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AdcChannelConfig {
    /// Analog input index (AINx) wired to the divider tap.
    pub input: u8,
    pub acquisition: AcquisitionTime,
    pub burst: bool,
}

impl AdcChannelConfig {
    /// Single-ended channel with the long acquisition window and burst
    /// oversampling suited to a high-impedance divider.
    #[must_use]
    pub const fn single_ended(input: u8) -> Self {
        Self {
            input,
            acquisition: AcquisitionTime::Us40,
            burst: true,
        }
    }
}

/// Aggregate pipeline configuration, supplied once at initialization and
/// immutable for the process lifetime after validation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MonitorConfig {
    pub divider: DividerConfig,
    pub thresholds: ThresholdConfig,
    pub soc: SocTable,
    pub adc: AdcDescriptor,
    pub channel: AdcChannelConfig,
    pub min_interval_ms: u32,
}

impl MonitorConfig {
    /// Checks every configuration invariant, returning the derived divider
    /// scale on success.
    pub fn validate(&self) -> Result<DividerScale, ConfigError> {
        let scale = self.divider.scale().ok_or(ConfigError::InvalidDivider)?;
        if self.thresholds.voltage_low_mv > self.thresholds.voltage_full_mv {
            return Err(ConfigError::InvalidThresholds);
        }
        if !self.soc.is_valid() {
            return Err(ConfigError::InvalidSocTable);
        }
        Ok(scale)
    }
}

/// Decodes a raw gain selector, the form a board definition usually supplies.
pub fn gain_from_raw(code: u8) -> Result<AdcGain, ConfigError> {
    AdcGain::from_raw(code).ok_or(ConfigError::InvalidGain)
}

/// Configuration faults detected once at initialization, never during
/// steady-state operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// Exactly one divider resistor is zero.
    InvalidDivider,
    /// The low threshold sits above the full threshold.
    InvalidThresholds,
    /// The state-of-charge table violates its invariants.
    InvalidSocTable,
    /// The gain selector is not one of the recognized enumerated values.
    InvalidGain,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidDivider => f.write_str("invalid divider configuration"),
            ConfigError::InvalidThresholds => f.write_str("low threshold above full threshold"),
            ConfigError::InvalidSocTable => f.write_str("invalid state-of-charge table"),
            ConfigError::InvalidGain => f.write_str("unrecognized gain selector"),
        }
    }
}

/// Classification of a completed measurement against the thresholds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MeasurementKind {
    Low,
    Full,
    Data,
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementKind::Low => f.write_str("low"),
            MeasurementKind::Full => f.write_str("full"),
            MeasurementKind::Data => f.write_str("data"),
        }
    }
}

/// Externally observable result of one sampling cycle. Produced exactly once
/// per completed sample and immutable once emitted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MeasurementEvent {
    pub kind: MeasurementKind,
    pub voltage_mv: u16,
    pub level_percent: u8,
    /// `false` would mark a reading that must not be trusted; the steady
    /// state pipeline only emits trusted readings.
    pub valid: bool,
}

/// Classifies a converted voltage against the configured thresholds.
#[must_use]
pub fn classify_voltage(voltage_mv: u16, thresholds: &ThresholdConfig) -> MeasurementKind {
    if voltage_mv <= thresholds.voltage_low_mv {
        MeasurementKind::Low
    } else if voltage_mv >= thresholds.voltage_full_mv {
        MeasurementKind::Full
    } else {
        MeasurementKind::Data
    }
}

/// Signal handed from the interrupt context to the deferred context.
///
/// The interrupt producer does the minimum possible work: capture the raw
/// code (or the calibration-done signal) and publish it; conversion, lookup,
/// and dispatch all run in the deferred context.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AdcEvent {
    CalibrationDone,
    Sample(i16),
}

/// Error surfaced when the interrupt producer cannot publish an event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PublishError<E> {
    /// The bounded queue is full.
    Full,
    /// Transport-specific failure.
    Other(E),
}

/// Error surfaced when the deferred consumer cannot fetch an event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FetchError<E> {
    /// The queue has been disconnected from its producer.
    Disconnected,
    /// Transport-specific failure.
    Other(E),
}

/// Trait implemented by the interrupt-side event publisher.
pub trait AdcEventProducer {
    /// Transport-specific error type.
    type Error;

    /// Attempts to publish an event without blocking.
    fn try_publish(&mut self, event: AdcEvent) -> Result<(), PublishError<Self::Error>>;
}

/// Trait implemented by the deferred-side event consumer.
pub trait AdcEventConsumer {
    /// Transport-specific error type.
    type Error;

    /// Attempts to fetch one event without blocking.
    ///
    /// Returns `Ok(Some(event))` when an event was available and `Ok(None)`
    /// when the queue is currently empty.
    fn try_fetch(&mut self) -> Result<Option<AdcEvent>, FetchError<Self::Error>>;
}

/// Abstraction over the shared converter peripheral.
///
/// The pipeline enforces the at-most-one-owner discipline: a claim opened by
/// `begin_calibration` or `begin_sample` stays open until `release`.
pub trait AdcAccess {
    /// Peripheral-specific error type.
    type Error;

    /// Claims the converter and requests offset calibration. Completion is
    /// signalled through the event queue as [`AdcEvent::CalibrationDone`].
    fn begin_calibration(&mut self) -> Result<(), Self::Error>;

    /// Claims the converter, applies the channel setup, arms the
    /// single-sample buffer, and triggers one acquisition. Completion is
    /// signalled through the event queue as [`AdcEvent::Sample`].
    fn begin_sample(&mut self, channel: &AdcChannelConfig) -> Result<(), Self::Error>;

    /// De-initializes the converter, ending the current claim.
    fn release(&mut self);
}

/// Capability interface for the external event observer, invoked exactly
/// once per completed cycle.
pub trait EventHandler {
    fn handle_event(&mut self, event: &MeasurementEvent);
}

/// Error reported by the external percentage sink.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SinkError<E> {
    /// No subscriber is currently connected; benign and swallowed.
    NotConnected,
    /// The published attribute does not exist yet; benign and swallowed.
    AttributeMissing,
    /// Any other sink failure; escalated as fatal to the caller.
    Other(E),
}

/// External percentage sink, e.g. a published battery-level characteristic.
pub trait LevelSink {
    /// Sink-specific fatal error type.
    type Error;

    /// Returns `true` once the sink is ready to accept updates.
    fn is_active(&self) -> bool;

    /// Pushes the latest percentage to the sink.
    fn update(&mut self, level_percent: u8) -> Result<(), SinkError<Self::Error>>;
}

/// Periodic-trigger primitive that invokes the embedding layer's tick.
pub trait MeasurementTimer {
    /// Timer-specific error type.
    type Error;

    /// Arms the timer to fire every `interval_ms`.
    fn start(&mut self, interval_ms: u32) -> Result<(), Self::Error>;

    /// Stops the timer; safe to call when already stopped.
    fn stop(&mut self) -> Result<(), Self::Error>;
}

/// Optional monitor-enable output gating the divider.
pub trait MonitorGate {
    fn set_active(&mut self, active: bool);
}

/// Gate used when no monitor-enable pin is fitted.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopMonitorGate;

impl NoopMonitorGate {
    /// Creates a new no-op gate.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MonitorGate for NoopMonitorGate {
    fn set_active(&mut self, _: bool) {}
}

/// Outcome of one tick of the sample scheduler.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SampleError<E> {
    /// Offset calibration has not completed; sampling is not trusted yet.
    NotCalibrated,
    /// A prior cycle still owns the converter. Expected and benign: the tick
    /// takes no action and the in-flight cycle completes normally.
    AlreadyInProgress,
    /// The peripheral rejected the acquisition request.
    Adc(E),
}

/// Failure starting periodic measurement.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EnableError<AdcE, TimerE> {
    /// Offset calibration has not completed.
    NotCalibrated,
    /// The requested interval sits below the configured minimum.
    IntervalTooShort { minimum_ms: u32 },
    /// The immediate sample could not be triggered.
    Adc(AdcE),
    /// The periodic timer could not be armed.
    Timer(TimerE),
}

/// Failure while servicing the deferred context.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ServiceError<SinkE, QueueE> {
    /// The percentage sink failed with a non-benign error.
    Sink(SinkE),
    /// The event queue transport failed.
    Queue(FetchError<QueueE>),
}

/// Drives the measurement pipeline: calibration gating, tick scheduling,
/// deferred classification, and event dispatch.
///
/// All collaborator handles (queue consumer, handler, sink, timer, gate) are
/// passed into the operations that need them so test doubles slot in without
/// restructuring.
pub struct BatteryMonitor<A, TInstant>
where
    A: AdcAccess,
    TInstant: Copy,
{
    config: MonitorConfig,
    scale: DividerScale,
    adc: A,
    calibrator: OffsetCalibrator<TInstant>,
    in_flight: bool,
    enabled: bool,
    initial_level: Option<u8>,
    log: MeasurementLog<TInstant>,
}

impl<A, TInstant> BatteryMonitor<A, TInstant>
where
    A: AdcAccess,
    TInstant: MonitorInstant + Ord + Add<Duration, Output = TInstant>,
{
    /// Validates the configuration and takes ownership of the converter
    /// access handle.
    pub fn new(config: MonitorConfig, adc: A) -> Result<Self, ConfigError> {
        let scale = config.validate()?;
        Ok(Self {
            config,
            scale,
            adc,
            calibrator: OffsetCalibrator::new(),
            in_flight: false,
            enabled: false,
            initial_level: None,
            log: MeasurementLog::new(),
        })
    }

    /// Returns the validated configuration.
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Reports the calibration lifecycle state.
    #[must_use]
    pub fn calibration_state(&self) -> CalibrationState {
        self.calibrator.state()
    }

    /// Returns `true` while a sample cycle owns the converter.
    #[must_use]
    pub fn is_sampling(&self) -> bool {
        self.in_flight
    }

    /// Returns `true` while periodic measurement is armed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the percentage computed before the sink became active, kept
    /// as the externally queryable initial level.
    #[must_use]
    pub fn initial_level(&self) -> Option<u8> {
        self.initial_level
    }

    /// Returns the bounded history of completed measurements.
    #[must_use]
    pub fn history(&self) -> &MeasurementLog<TInstant> {
        &self.log
    }

    /// Accesses the converter handle.
    #[must_use]
    pub fn adc(&self) -> &A {
        &self.adc
    }

    /// Mutably accesses the converter handle.
    pub fn adc_mut(&mut self) -> &mut A {
        &mut self.adc
    }

    /// Claims the converter and requests offset calibration with a bounded
    /// wait. A controller that is already calibrating or done is left alone.
    pub fn start_calibration(
        &mut self,
        now: TInstant,
        timeout: Duration,
    ) -> Result<(), CalibrationError<A::Error>> {
        match self.calibrator.state() {
            CalibrationState::Done | CalibrationState::InProgress => Ok(()),
            CalibrationState::Idle => {
                self.adc
                    .begin_calibration()
                    .map_err(CalibrationError::Peripheral)?;
                self.calibrator.begin(now, timeout);
                Ok(())
            }
        }
    }

    /// Checks calibration for completion or deadline expiry. Expiry releases
    /// the converter so a later attempt can retry from scratch.
    pub fn poll_calibration(&mut self, now: TInstant) -> CalibrationPoll {
        let poll = self.calibrator.poll(now);
        if matches!(poll, CalibrationPoll::TimedOut) {
            self.adc.release();
        }
        poll
    }

    /// Triggers one acquisition; invoked once per measurement interval.
    ///
    /// `AlreadyInProgress` reports a prior cycle still owning the converter
    /// and is expected under timer jitter; callers ignore it.
    pub fn on_tick(&mut self) -> Result<(), SampleError<A::Error>> {
        if !self.calibrator.is_done() {
            return Err(SampleError::NotCalibrated);
        }
        if self.in_flight {
            return Err(SampleError::AlreadyInProgress);
        }

        self.adc
            .begin_sample(&self.config.channel)
            .map_err(SampleError::Adc)?;
        self.in_flight = true;
        Ok(())
    }

    /// Deferred-context drain: consumes at most one queued event.
    ///
    /// A completed sample is converted, classified, pushed to the sink,
    /// recorded, and dispatched to the handler exactly once; the converter
    /// is released afterwards so the next tick can re-acquire it. A fatal
    /// sink error aborts the dispatch and is escalated to the caller.
    pub fn service<C, H, S>(
        &mut self,
        consumer: &mut C,
        now: TInstant,
        handler: &mut H,
        sink: &mut S,
    ) -> Result<Option<MeasurementEvent>, ServiceError<S::Error, C::Error>>
    where
        C: AdcEventConsumer,
        H: EventHandler,
        S: LevelSink,
    {
        let Some(event) = consumer.try_fetch().map_err(ServiceError::Queue)? else {
            return Ok(None);
        };

        match event {
            AdcEvent::CalibrationDone => {
                self.calibrator.note_done();
                self.adc.release();
                Ok(None)
            }
            AdcEvent::Sample(code) => {
                let voltage_mv = raw_to_millivolts(code, &self.config.adc, self.scale);
                let event = MeasurementEvent {
                    kind: classify_voltage(voltage_mv, &self.config.thresholds),
                    voltage_mv,
                    level_percent: self.config.soc.voltage_to_percent(voltage_mv),
                    valid: true,
                };

                if sink.is_active() {
                    match sink.update(event.level_percent) {
                        Ok(()) | Err(SinkError::NotConnected | SinkError::AttributeMissing) => {}
                        Err(SinkError::Other(inner)) => {
                            self.release_cycle();
                            return Err(ServiceError::Sink(inner));
                        }
                    }
                } else {
                    self.initial_level = Some(event.level_percent);
                }

                self.log.record(event, now);
                handler.handle_event(&event);
                self.release_cycle();
                Ok(Some(event))
            }
        }
    }

    /// Starts periodic measurement: asserts the gate, takes one immediate
    /// sample, and arms the timer.
    pub fn enable<T, G>(
        &mut self,
        interval_ms: u32,
        timer: &mut T,
        gate: &mut G,
    ) -> Result<(), EnableError<A::Error, T::Error>>
    where
        T: MeasurementTimer,
        G: MonitorGate,
    {
        if !self.calibrator.is_done() {
            return Err(EnableError::NotCalibrated);
        }
        if interval_ms < self.config.min_interval_ms {
            return Err(EnableError::IntervalTooShort {
                minimum_ms: self.config.min_interval_ms,
            });
        }

        gate.set_active(true);

        match self.on_tick() {
            Ok(()) | Err(SampleError::AlreadyInProgress) => {}
            Err(SampleError::NotCalibrated) => return Err(EnableError::NotCalibrated),
            Err(SampleError::Adc(inner)) => {
                gate.set_active(false);
                return Err(EnableError::Adc(inner));
            }
        }

        timer.start(interval_ms).map_err(EnableError::Timer)?;
        self.enabled = true;
        Ok(())
    }

    /// Stops periodic measurement and deasserts the gate. Safe to call
    /// repeatedly; an in-flight cycle is left to complete and release
    /// normally.
    pub fn disable<T, G>(&mut self, timer: &mut T, gate: &mut G) -> Result<(), T::Error>
    where
        T: MeasurementTimer,
        G: MonitorGate,
    {
        timer.stop()?;
        gate.set_active(false);
        self.enabled = false;
        Ok(())
    }

    fn release_cycle(&mut self) {
        self.adc.release();
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::AdcResolution;
    use crate::soc;
    use heapless::{Deque, Vec as HeaplessVec};

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MockInstant(u64);

    impl MockInstant {
        fn millis(value: u64) -> Self {
            Self(value * 1_000)
        }
    }

    impl MonitorInstant for MockInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    impl Add<Duration> for MockInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self::Output {
            Self(self.0 + u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX))
        }
    }

    #[derive(Default)]
    struct MockAdc {
        calibrations: u32,
        samples: u32,
        releases: u32,
        reject_sample: bool,
    }

    impl AdcAccess for MockAdc {
        type Error = ();

        fn begin_calibration(&mut self) -> Result<(), Self::Error> {
            self.calibrations += 1;
            Ok(())
        }

        fn begin_sample(&mut self, _: &AdcChannelConfig) -> Result<(), Self::Error> {
            if self.reject_sample {
                return Err(());
            }
            self.samples += 1;
            Ok(())
        }

        fn release(&mut self) {
            self.releases += 1;
        }
    }

    #[derive(Default)]
    struct MockQueue {
        events: Deque<AdcEvent, 4>,
    }

    impl MockQueue {
        fn push(&mut self, event: AdcEvent) {
            self.events.push_back(event).expect("queue capacity");
        }
    }

    impl AdcEventConsumer for MockQueue {
        type Error = ();

        fn try_fetch(&mut self) -> Result<Option<AdcEvent>, FetchError<Self::Error>> {
            Ok(self.events.pop_front())
        }
    }

    #[derive(Default)]
    struct MockHandler {
        events: HeaplessVec<MeasurementEvent, 8>,
    }

    impl EventHandler for MockHandler {
        fn handle_event(&mut self, event: &MeasurementEvent) {
            self.events.push(*event).expect("handler capacity");
        }
    }

    #[derive(Default)]
    struct MockSink {
        active: bool,
        reject: Option<SinkError<u8>>,
        updates: HeaplessVec<u8, 8>,
    }

    impl LevelSink for MockSink {
        type Error = u8;

        fn is_active(&self) -> bool {
            self.active
        }

        fn update(&mut self, level_percent: u8) -> Result<(), SinkError<Self::Error>> {
            if let Some(error) = self.reject {
                return Err(error);
            }
            self.updates.push(level_percent).expect("sink capacity");
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockTimer {
        interval_ms: Option<u32>,
        stops: u32,
    }

    impl MeasurementTimer for MockTimer {
        type Error = ();

        fn start(&mut self, interval_ms: u32) -> Result<(), Self::Error> {
            self.interval_ms = Some(interval_ms);
            Ok(())
        }

        fn stop(&mut self) -> Result<(), Self::Error> {
            self.interval_ms = None;
            self.stops += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockGate {
        active: bool,
    }

    impl MonitorGate for MockGate {
        fn set_active(&mut self, active: bool) {
            self.active = active;
        }
    }

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            divider: DividerConfig::new(10_000, 10_000),
            thresholds: ThresholdConfig::new(3300, 4100),
            soc: soc::lipo_soc_table(),
            adc: AdcDescriptor::internal(AdcGain::Gain1_2, AdcResolution::Bits10),
            channel: AdcChannelConfig::single_ended(4),
            min_interval_ms: DEFAULT_MIN_MEAS_INTERVAL_MS,
        }
    }

    fn calibrated_monitor() -> BatteryMonitor<MockAdc, MockInstant> {
        let mut monitor =
            BatteryMonitor::new(test_config(), MockAdc::default()).expect("valid config");
        let mut queue = MockQueue::default();
        monitor
            .start_calibration(MockInstant::millis(0), Duration::from_millis(500))
            .expect("calibration start");
        queue.push(AdcEvent::CalibrationDone);
        let mut handler = MockHandler::default();
        let mut sink = MockSink::default();
        monitor
            .service(&mut queue, MockInstant::millis(1), &mut handler, &mut sink)
            .expect("calibration completion");
        assert!(monitor.calibrator.is_done());
        monitor
    }

    /// Raw code that converts to 1200 mV with the `test_config` front end:
    /// gain 1/2 against the 600 mV reference reads 600 mV at the pin for a
    /// half-scale code, and the 10k/10k divider doubles it.
    const CODE_1200_MV: i16 = 512;

    #[test]
    fn rejects_divider_with_single_zero_resistor() {
        let mut config = test_config();
        config.divider = DividerConfig::new(0, 10_000);
        let result = BatteryMonitor::<MockAdc, MockInstant>::new(config, MockAdc::default());
        assert_eq!(result.err(), Some(ConfigError::InvalidDivider));
    }

    #[test]
    fn accepts_divider_with_both_resistors_zero() {
        let mut config = test_config();
        config.divider = DividerConfig::none();
        let monitor = BatteryMonitor::<MockAdc, MockInstant>::new(config, MockAdc::default())
            .expect("unity divider accepted");
        assert_eq!(monitor.scale, DividerScale::UNITY);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = test_config();
        config.thresholds = ThresholdConfig::new(4200, 3300);
        let result = BatteryMonitor::<MockAdc, MockInstant>::new(config, MockAdc::default());
        assert_eq!(result.err(), Some(ConfigError::InvalidThresholds));
    }

    #[test]
    fn rejects_unknown_gain_selector() {
        assert_eq!(gain_from_raw(9).err(), Some(ConfigError::InvalidGain));
        assert_eq!(gain_from_raw(5), Ok(AdcGain::Gain1));
    }

    #[test]
    fn classification_boundaries_are_inclusive() {
        let thresholds = ThresholdConfig::new(3300, 4100);
        assert_eq!(classify_voltage(3300, &thresholds), MeasurementKind::Low);
        assert_eq!(classify_voltage(4100, &thresholds), MeasurementKind::Full);
        assert_eq!(classify_voltage(3700, &thresholds), MeasurementKind::Data);
    }

    #[test]
    fn tick_is_gated_on_calibration() {
        let mut monitor =
            BatteryMonitor::<MockAdc, MockInstant>::new(test_config(), MockAdc::default())
                .expect("valid config");
        assert_eq!(monitor.on_tick().err(), Some(SampleError::NotCalibrated));
        assert_eq!(monitor.adc.samples, 0);
    }

    #[test]
    fn enable_is_gated_on_calibration() {
        let mut monitor =
            BatteryMonitor::<MockAdc, MockInstant>::new(test_config(), MockAdc::default())
                .expect("valid config");
        let mut timer = MockTimer::default();
        let mut gate = MockGate::default();

        let result = monitor.enable(1_000, &mut timer, &mut gate);
        assert_eq!(result.err(), Some(EnableError::NotCalibrated));
        assert!(timer.interval_ms.is_none());
        assert!(!gate.active);
    }

    #[test]
    fn second_tick_reports_cycle_in_flight() {
        let mut monitor = calibrated_monitor();

        monitor.on_tick().expect("first trigger");
        assert!(monitor.is_sampling());
        assert_eq!(
            monitor.on_tick().err(),
            Some(SampleError::AlreadyInProgress)
        );
        // The converter was not re-triggered by the rejected tick.
        assert_eq!(monitor.adc.samples, 1);
    }

    #[test]
    fn completed_cycle_releases_the_converter_for_the_next_tick() {
        let mut monitor = calibrated_monitor();
        let mut queue = MockQueue::default();
        let mut handler = MockHandler::default();
        let mut sink = MockSink::default();

        monitor.on_tick().expect("trigger");
        queue.push(AdcEvent::Sample(CODE_1200_MV));
        monitor
            .service(&mut queue, MockInstant::millis(10), &mut handler, &mut sink)
            .expect("cycle completion");

        assert!(!monitor.is_sampling());
        monitor.on_tick().expect("converter re-acquired");
        assert_eq!(monitor.adc.samples, 2);
    }

    #[test]
    fn completed_sample_dispatches_exactly_one_event() {
        let mut monitor = calibrated_monitor();
        let mut queue = MockQueue::default();
        let mut handler = MockHandler::default();
        let mut sink = MockSink::default();

        monitor.on_tick().expect("trigger");
        queue.push(AdcEvent::Sample(CODE_1200_MV));
        let emitted = monitor
            .service(&mut queue, MockInstant::millis(10), &mut handler, &mut sink)
            .expect("cycle completion")
            .expect("event emitted");

        assert_eq!(emitted.voltage_mv, 1200);
        assert_eq!(emitted.kind, MeasurementKind::Low);
        assert!(emitted.valid);
        assert_eq!(handler.events.len(), 1);
        assert_eq!(handler.events[0], emitted);
        assert_eq!(monitor.history().len(), 1);

        // An empty queue leaves the handler untouched.
        monitor
            .service(&mut queue, MockInstant::millis(11), &mut handler, &mut sink)
            .expect("idle service");
        assert_eq!(handler.events.len(), 1);
    }

    #[test]
    fn inactive_sink_retains_the_initial_level() {
        let mut monitor = calibrated_monitor();
        let mut queue = MockQueue::default();
        let mut handler = MockHandler::default();
        let mut sink = MockSink::default();

        monitor.on_tick().expect("trigger");
        queue.push(AdcEvent::Sample(CODE_1200_MV));
        monitor
            .service(&mut queue, MockInstant::millis(10), &mut handler, &mut sink)
            .expect("cycle completion");

        assert_eq!(monitor.initial_level(), Some(0));
        assert!(sink.updates.is_empty());
    }

    #[test]
    fn benign_sink_errors_are_swallowed() {
        let mut monitor = calibrated_monitor();
        let mut queue = MockQueue::default();
        let mut handler = MockHandler::default();
        let mut sink = MockSink {
            active: true,
            reject: Some(SinkError::NotConnected),
            ..MockSink::default()
        };

        monitor.on_tick().expect("trigger");
        queue.push(AdcEvent::Sample(CODE_1200_MV));
        let emitted = monitor
            .service(&mut queue, MockInstant::millis(10), &mut handler, &mut sink)
            .expect("benign sink error swallowed");

        assert!(emitted.is_some());
        assert_eq!(handler.events.len(), 1);
    }

    #[test]
    fn fatal_sink_errors_abort_the_dispatch() {
        let mut monitor = calibrated_monitor();
        let mut queue = MockQueue::default();
        let mut handler = MockHandler::default();
        let mut sink = MockSink {
            active: true,
            reject: Some(SinkError::Other(7)),
            ..MockSink::default()
        };

        monitor.on_tick().expect("trigger");
        queue.push(AdcEvent::Sample(CODE_1200_MV));
        let result =
            monitor.service(&mut queue, MockInstant::millis(10), &mut handler, &mut sink);

        assert_eq!(result.err(), Some(ServiceError::Sink(7)));
        assert!(handler.events.is_empty());
        // The converter is still released so the pipeline can recover.
        assert!(!monitor.is_sampling());
    }

    #[test]
    fn enable_validates_the_interval_and_takes_an_immediate_sample() {
        let mut monitor = calibrated_monitor();
        let mut timer = MockTimer::default();
        let mut gate = MockGate::default();

        let result = monitor.enable(10, &mut timer, &mut gate);
        assert_eq!(
            result.err(),
            Some(EnableError::IntervalTooShort {
                minimum_ms: DEFAULT_MIN_MEAS_INTERVAL_MS
            })
        );

        monitor
            .enable(1_000, &mut timer, &mut gate)
            .expect("enable");
        assert!(monitor.is_enabled());
        assert!(gate.active);
        assert_eq!(timer.interval_ms, Some(1_000));
        assert_eq!(monitor.adc.samples, 1);
    }

    #[test]
    fn disable_is_idempotent() {
        let mut monitor = calibrated_monitor();
        let mut timer = MockTimer::default();
        let mut gate = MockGate::default();

        monitor
            .enable(1_000, &mut timer, &mut gate)
            .expect("enable");
        monitor.disable(&mut timer, &mut gate).expect("disable");
        monitor
            .disable(&mut timer, &mut gate)
            .expect("second disable");

        assert!(!monitor.is_enabled());
        assert!(!gate.active);
        assert!(timer.interval_ms.is_none());
        assert_eq!(timer.stops, 2);
    }

    #[test]
    fn disable_leaves_an_in_flight_cycle_to_complete() {
        let mut monitor = calibrated_monitor();
        let mut timer = MockTimer::default();
        let mut gate = MockGate::default();
        let mut queue = MockQueue::default();
        let mut handler = MockHandler::default();
        let mut sink = MockSink::default();

        monitor
            .enable(1_000, &mut timer, &mut gate)
            .expect("enable");
        assert!(monitor.is_sampling());

        monitor.disable(&mut timer, &mut gate).expect("disable");
        assert!(monitor.is_sampling());

        queue.push(AdcEvent::Sample(CODE_1200_MV));
        monitor
            .service(&mut queue, MockInstant::millis(20), &mut handler, &mut sink)
            .expect("in-flight cycle completion");
        assert!(!monitor.is_sampling());
        assert_eq!(handler.events.len(), 1);
    }

    #[test]
    fn calibration_timeout_releases_the_converter() {
        let mut monitor =
            BatteryMonitor::new(test_config(), MockAdc::default()).expect("valid config");
        monitor
            .start_calibration(MockInstant::millis(0), Duration::from_millis(100))
            .expect("calibration start");

        let poll = monitor.poll_calibration(MockInstant::millis(200));
        assert_eq!(poll, CalibrationPoll::TimedOut);
        assert_eq!(monitor.adc.releases, 1);
        assert_eq!(monitor.calibration_state(), CalibrationState::Idle);
    }
}
