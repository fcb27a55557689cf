//! Periodic battery measurement task.
//!
//! Runs the one-shot offset calibration before anything else, then drives
//! one strictly ordered trigger -> completion -> classify -> dispatch cycle
//! per measurement interval. The SAADC driver exists only while a cycle is
//! in flight, trading acquisition latency for low idle power.

use defmt::{info, warn};
use embassy_time::{Duration, Instant, Timer, with_timeout};

use monitor_core::calibration::CalibrationPoll;
use monitor_core::conversion::{AdcDescriptor, AdcResolution, DividerConfig};
use monitor_core::pipeline::{
    AdcChannelConfig, AdcEvent, AdcEventProducer, BatteryMonitor, DEFAULT_MIN_MEAS_INTERVAL_MS,
    EventHandler, MeasurementEvent, MeasurementKind, MonitorConfig, SampleError, ThresholdConfig,
    gain_from_raw,
};
use monitor_core::soc::lipo_soc_table;

use crate::hw::{BatteryFrontEnd, OutputGate};
use crate::monitor::{EventFetcher, EventPublisher, FirmwareInstant, SaadcHandle, SoftTimer};
use crate::sink::LevelPublisher;

/// Measurement cadence once enabled.
const MEAS_INTERVAL_MS: u32 = 60_000;

/// Bound on the start-up offset calibration wait.
const CALIBRATION_TIMEOUT: core::time::Duration = core::time::Duration::from_millis(500);

/// Board battery front end: 1.5 MOhm / 180 kOhm divider, gain 1 (raw
/// selector 5) against the internal reference.
const DIVIDER: DividerConfig = DividerConfig::new(1_500_000, 180_000);
const THRESHOLDS: ThresholdConfig = ThresholdConfig::new(3100, 4150);
const RAW_GAIN_SELECTOR: u8 = 5;
const BATTERY_INPUT_AIN: u8 = 4;

struct LogHandler;

impl EventHandler for LogHandler {
    fn handle_event(&mut self, event: &MeasurementEvent) {
        info!(
            "battery {=u16} mV, {=u8} % ({=str})",
            event.voltage_mv,
            event.level_percent,
            kind_label(event.kind)
        );
    }
}

fn kind_label(kind: MeasurementKind) -> &'static str {
    match kind {
        MeasurementKind::Low => "low",
        MeasurementKind::Full => "full",
        MeasurementKind::Data => "data",
    }
}

#[embassy_executor::task]
pub async fn run(mut front_end: BatteryFrontEnd, mut gate: OutputGate) {
    let Ok(gain) = gain_from_raw(RAW_GAIN_SELECTOR) else {
        warn!("unrecognized gain selector {=u8}", RAW_GAIN_SELECTOR);
        return;
    };
    let config = MonitorConfig {
        divider: DIVIDER,
        thresholds: THRESHOLDS,
        soc: lipo_soc_table(),
        adc: AdcDescriptor::internal(gain, AdcResolution::Bits10),
        channel: AdcChannelConfig::single_ended(BATTERY_INPUT_AIN),
        min_interval_ms: DEFAULT_MIN_MEAS_INTERVAL_MS,
    };
    let Ok(mut monitor) =
        BatteryMonitor::<SaadcHandle, FirmwareInstant>::new(config, SaadcHandle::new())
    else {
        warn!("battery monitor configuration rejected");
        return;
    };
    let descriptor = monitor.config().adc;
    let channel = monitor.config().channel;

    let mut publisher = EventPublisher::new(super::ADC_EVENTS.sender());
    let mut fetcher = EventFetcher::new(super::ADC_EVENTS.receiver());
    let mut handler = LogHandler;
    let mut sink = LevelPublisher::new(&super::BATTERY_LEVEL);

    // One-shot offset calibration before any sample is trusted. A miss
    // leaves the pipeline unarmed and ends the task.
    if monitor
        .start_calibration(Instant::now().into(), CALIBRATION_TIMEOUT)
        .is_err()
    {
        warn!("offset calibration could not be started");
        return;
    }
    {
        let mut saadc = front_end.acquire(&descriptor, &channel);
        match with_timeout(Duration::from_millis(500), saadc.calibrate()).await {
            Ok(()) => {
                if publisher.try_publish(AdcEvent::CalibrationDone).is_err() {
                    warn!("adc event queue full; calibration signal dropped");
                }
            }
            Err(_) => warn!("saadc offset calibration timed out"),
        }
    }
    let now = FirmwareInstant::from(Instant::now());
    if monitor
        .service(&mut fetcher, now, &mut handler, &mut sink)
        .is_err()
    {
        warn!("event queue fault during calibration");
        return;
    }
    match monitor.poll_calibration(FirmwareInstant::from(Instant::now())) {
        CalibrationPoll::Complete => info!("saadc offset calibration complete"),
        CalibrationPoll::Pending | CalibrationPoll::TimedOut => {
            warn!("battery monitoring disabled: calibration did not complete");
            return;
        }
    }

    // Arm periodic measurement; enable() also takes the immediate first
    // sample, completed by the first loop pass below.
    let mut timer = SoftTimer::new();
    if monitor.enable(MEAS_INTERVAL_MS, &mut timer, &mut gate).is_err() {
        warn!("failed to enable battery monitoring");
        return;
    }
    info!("battery monitoring enabled, interval {=u32} ms", MEAS_INTERVAL_MS);

    loop {
        if monitor.is_sampling() {
            let raw = {
                let mut saadc = front_end.acquire(&descriptor, &channel);
                let mut buf = [0_i16; 1];
                saadc.sample(&mut buf).await;
                buf[0]
            };
            if publisher.try_publish(AdcEvent::Sample(raw)).is_err() {
                warn!("adc event queue full; sample dropped");
            }
            let now = FirmwareInstant::from(Instant::now());
            match monitor.service(&mut fetcher, now, &mut handler, &mut sink) {
                Ok(_) => {}
                Err(_) => {
                    // Non-benign sink failures are fatal to the pipeline.
                    warn!("battery level sink failure");
                    return;
                }
            }
        }

        let Some(interval_ms) = timer.interval_ms() else {
            return;
        };
        Timer::after_millis(u64::from(interval_ms)).await;

        match monitor.on_tick() {
            Ok(()) | Err(SampleError::AlreadyInProgress) => {}
            Err(_) => warn!("sample trigger rejected"),
        }
    }
}
