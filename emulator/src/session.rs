use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::ops::Add;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use monitor_core::calibration::CalibrationPoll;
use monitor_core::conversion::{AdcDescriptor, AdcGain, AdcResolution, DividerConfig};
use monitor_core::history::MonitorInstant;
use monitor_core::pipeline::{
    AdcAccess, AdcChannelConfig, AdcEvent, AdcEventConsumer, BatteryMonitor, EnableError,
    EventHandler, FetchError, LevelSink, MeasurementEvent, MeasurementTimer, MonitorConfig,
    MonitorGate, SampleError, SinkError, ThresholdConfig,
};
use monitor_core::soc::lipo_soc_table;

const CALIBRATION_TIMEOUT: Duration = Duration::from_millis(500);

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "enable",
        "enable <interval-ms>      - start periodic measurement (takes one sample immediately)",
    ),
    (
        "disable",
        "disable                   - stop periodic measurement",
    ),
    (
        "tick",
        "tick [n]                  - advance the clock by n measurement intervals (default 1)",
    ),
    (
        "voltage",
        "voltage <mv>              - set the simulated battery terminal voltage",
    ),
    (
        "drain",
        "drain <mv>                - set the per-tick discharge in millivolts",
    ),
    (
        "attach",
        "attach                    - attach the level subscriber (battery service connects)",
    ),
    (
        "detach",
        "detach                    - detach the level subscriber",
    ),
    (
        "status",
        "status                    - display pipeline and battery state",
    ),
    (
        "history",
        "history                   - dump the measurement history ring",
    ),
    (
        "help",
        "help [topic]              - show help for a command",
    ),
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BatteryProfile {
    Healthy,
    Worn,
}

impl BatteryProfile {
    pub fn log_path(self) -> &'static str {
        match self {
            BatteryProfile::Healthy => "logs/emulator-healthy.log",
            BatteryProfile::Worn => "logs/emulator-worn.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            BatteryProfile::Healthy => "Battery monitor emulator transcript (healthy cell)",
            BatteryProfile::Worn => "Battery monitor emulator transcript (worn cell)",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("healthy") {
            Ok(Self::Healthy)
        } else if tag.eq_ignore_ascii_case("worn") {
            Ok(Self::Worn)
        } else {
            Err(format!("Unknown battery profile `{tag}`"))
        }
    }

    fn start_voltage_mv(self) -> u16 {
        match self {
            BatteryProfile::Healthy => 4180,
            BatteryProfile::Worn => 3420,
        }
    }

    fn drain_mv_per_tick(self) -> u16 {
        match self {
            BatteryProfile::Healthy => 10,
            BatteryProfile::Worn => 40,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
struct SimInstant(u64);

impl SimInstant {
    fn from_micros(value: u64) -> Self {
        Self(value)
    }
}

impl MonitorInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX))
    }
}

struct SimBattery {
    voltage_mv: u16,
    drain_mv: u16,
}

impl SimBattery {
    fn discharge(&mut self) {
        self.voltage_mv = self.voltage_mv.saturating_sub(self.drain_mv);
    }
}

type SharedBattery = Rc<RefCell<SimBattery>>;
type SharedCompletions = Rc<RefCell<VecDeque<AdcEvent>>>;

/// Simulated converter: a claim immediately completes by posting the event a
/// real peripheral would raise from its interrupt handler.
struct SimAdc {
    battery: SharedBattery,
    completions: SharedCompletions,
    descriptor: AdcDescriptor,
    divider: DividerConfig,
    owned: bool,
}

impl AdcAccess for SimAdc {
    type Error = String;

    fn begin_calibration(&mut self) -> Result<(), Self::Error> {
        self.owned = true;
        self.completions
            .borrow_mut()
            .push_back(AdcEvent::CalibrationDone);
        Ok(())
    }

    fn begin_sample(&mut self, _: &AdcChannelConfig) -> Result<(), Self::Error> {
        let code = raw_code_for(
            self.battery.borrow().voltage_mv,
            &self.descriptor,
            &self.divider,
        )?;
        self.owned = true;
        self.completions.borrow_mut().push_back(AdcEvent::Sample(code));
        Ok(())
    }

    fn release(&mut self) {
        self.owned = false;
    }
}

/// Inverts the divider model so the simulated terminal voltage lands on the
/// raw code a real front end would capture.
fn raw_code_for(
    battery_mv: u16,
    adc: &AdcDescriptor,
    divider: &DividerConfig,
) -> Result<i16, String> {
    let scale = divider
        .scale()
        .ok_or_else(|| "invalid divider configuration".to_string())?;
    let (gain_num, gain_den) = adc.gain.ratio();

    let numerator = u64::from(battery_mv)
        * u64::from(gain_num)
        * u64::from(adc.resolution.full_scale())
        * scale.denominator();
    let denominator = u64::from(adc.reference_mv) * u64::from(gain_den) * scale.numerator();

    i16::try_from(numerator / denominator)
        .map_err(|_| format!("{battery_mv} mV exceeds the converter range"))
}

struct SimQueue(SharedCompletions);

impl AdcEventConsumer for SimQueue {
    type Error = String;

    fn try_fetch(&mut self) -> Result<Option<AdcEvent>, FetchError<Self::Error>> {
        Ok(self.0.borrow_mut().pop_front())
    }
}

#[derive(Default)]
struct CollectingHandler {
    events: Vec<MeasurementEvent>,
}

impl EventHandler for CollectingHandler {
    fn handle_event(&mut self, event: &MeasurementEvent) {
        self.events.push(*event);
    }
}

#[derive(Default)]
struct SessionSink {
    active: bool,
    updates: Vec<u8>,
}

impl LevelSink for SessionSink {
    type Error = String;

    fn is_active(&self) -> bool {
        self.active
    }

    fn update(&mut self, level_percent: u8) -> Result<(), SinkError<Self::Error>> {
        if !self.active {
            return Err(SinkError::NotConnected);
        }
        self.updates.push(level_percent);
        Ok(())
    }
}

#[derive(Default)]
struct HostTimer {
    interval_ms: Option<u32>,
}

impl MeasurementTimer for HostTimer {
    type Error = String;

    fn start(&mut self, interval_ms: u32) -> Result<(), Self::Error> {
        self.interval_ms = Some(interval_ms);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        self.interval_ms = None;
        Ok(())
    }
}

#[derive(Default)]
struct SimGate {
    asserted: bool,
}

impl MonitorGate for SimGate {
    fn set_active(&mut self, active: bool) {
        self.asserted = active;
    }
}

/// Emulated front end matching the firmware wiring: 1.5 MOhm / 180 kOhm
/// divider into a gain-1, 10-bit converter on the internal reference.
fn emulated_config() -> MonitorConfig {
    MonitorConfig {
        divider: DividerConfig::new(1_500_000, 180_000),
        thresholds: ThresholdConfig::new(3100, 4150),
        soc: lipo_soc_table(),
        adc: AdcDescriptor::internal(AdcGain::Gain1, AdcResolution::Bits10),
        channel: AdcChannelConfig::single_ended(4),
        min_interval_ms: 100,
    }
}

pub struct Session {
    monitor: BatteryMonitor<SimAdc, SimInstant>,
    battery: SharedBattery,
    queue: SimQueue,
    handler: CollectingHandler,
    sink: SessionSink,
    timer: HostTimer,
    gate: SimGate,
    clock_us: u64,
    transcript: TranscriptLogger,
}

impl Session {
    pub fn new(profile: BatteryProfile) -> io::Result<Self> {
        let transcript = TranscriptLogger::new(profile)?;
        let battery: SharedBattery = Rc::new(RefCell::new(SimBattery {
            voltage_mv: profile.start_voltage_mv(),
            drain_mv: profile.drain_mv_per_tick(),
        }));
        let completions: SharedCompletions = Rc::new(RefCell::new(VecDeque::new()));

        let config = emulated_config();
        let adc = SimAdc {
            battery: Rc::clone(&battery),
            completions: Rc::clone(&completions),
            descriptor: config.adc,
            divider: config.divider,
            owned: false,
        };
        let monitor = BatteryMonitor::new(config, adc).expect("emulated configuration is valid");

        let mut session = Self {
            monitor,
            battery,
            queue: SimQueue(completions),
            handler: CollectingHandler::default(),
            sink: SessionSink::default(),
            timer: HostTimer::default(),
            gate: SimGate::default(),
            clock_us: 0,
            transcript,
        };
        session.run_calibration();
        Ok(session)
    }

    fn now(&self) -> SimInstant {
        SimInstant::from_micros(self.clock_us)
    }

    fn advance_millis(&mut self, millis: u64) {
        self.clock_us += millis * 1_000;
    }

    fn run_calibration(&mut self) {
        self.monitor
            .start_calibration(self.now(), CALIBRATION_TIMEOUT)
            .expect("simulated calibration start");
        self.advance_millis(1);
        self.service_once();
        assert_eq!(
            self.monitor.poll_calibration(self.now()),
            CalibrationPoll::Complete,
            "simulated calibration must complete"
        );
    }

    fn service_once(&mut self) -> Option<MeasurementEvent> {
        let now = self.now();
        self.monitor
            .service(&mut self.queue, now, &mut self.handler, &mut self.sink)
            .expect("simulated queue and sink never fail fatally")
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        self.transcript
            .append_line(self.clock_us, TranscriptRole::Host, trimmed)?;

        let mut parts = trimmed.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let argument = parts.next();

        let lines = match command.to_ascii_lowercase().as_str() {
            "help" => self.handle_help(argument),
            "status" => self.handle_status(),
            "enable" => self.handle_enable(argument),
            "disable" => self.handle_disable(),
            "attach" => self.handle_attach(),
            "detach" => self.handle_detach(),
            "voltage" => self.handle_voltage(argument),
            "drain" => self.handle_drain(argument),
            "tick" => self.handle_tick(argument),
            "history" => self.handle_history(),
            other => vec![format!("ERR unknown command `{other}` (try `help`)")],
        };

        self.record_output(&lines)?;
        Ok(lines)
    }

    fn handle_help(&self, topic: Option<&str>) -> Vec<String> {
        let mut lines = Vec::new();
        match topic {
            Some(target) if !target.is_empty() => {
                if let Some((_, detail)) = HELP_TOPICS
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(target))
                {
                    lines.push((*detail).to_string());
                } else {
                    lines.push(format!("No help available for `{target}`."));
                }
            }
            _ => {
                lines.push("Available commands:".to_string());
                for (_, detail) in HELP_TOPICS {
                    lines.push(format!("  {detail}"));
                }
            }
        }
        lines
    }

    fn handle_status(&self) -> Vec<String> {
        let battery = self.battery.borrow();
        let channel = self.monitor.config().channel;
        let interval = self
            .timer
            .interval_ms
            .map_or_else(|| "stopped".to_string(), |ms| format!("{ms}ms"));
        let last = self
            .monitor
            .history()
            .latest()
            .map_or_else(|| "none".to_string(), |record| describe_event(&record.event));

        vec![
            format!(
                "calibration={} enabled={} timer={} gate={} channel=AIN{} acq={}us",
                self.monitor.calibration_state(),
                self.monitor.is_enabled(),
                interval,
                if self.gate.asserted { "asserted" } else { "released" },
                channel.input,
                channel.acquisition.micros(),
            ),
            format!(
                "battery={}mV drain={}mV/tick sink={} initial-level={}",
                battery.voltage_mv,
                battery.drain_mv,
                if self.sink.active { "attached" } else { "detached" },
                self.monitor
                    .initial_level()
                    .map_or_else(|| "none".to_string(), |level| format!("{level}%")),
            ),
            format!("last-measurement: {last}"),
        ]
    }

    fn handle_enable(&mut self, argument: Option<&str>) -> Vec<String> {
        let Some(interval_ms) = argument.and_then(|value| value.parse::<u32>().ok()) else {
            return vec!["ERR usage: enable <interval-ms>".to_string()];
        };

        match self
            .monitor
            .enable(interval_ms, &mut self.timer, &mut self.gate)
        {
            Ok(()) => {
                let mut lines = vec![format!("OK enable interval={interval_ms}ms")];
                // The enable path takes one immediate sample; complete it.
                if let Some(event) = self.service_once() {
                    lines.push(format!("EVT {}", describe_event(&event)));
                }
                lines
            }
            Err(EnableError::IntervalTooShort { minimum_ms }) => {
                vec![format!(
                    "ERR interval-too-short minimum={minimum_ms}ms requested={interval_ms}ms"
                )]
            }
            Err(EnableError::NotCalibrated) => {
                vec!["ERR not-calibrated".to_string()]
            }
            Err(EnableError::Adc(error)) => vec![format!("ERR adc {error}")],
            Err(EnableError::Timer(error)) => vec![format!("ERR timer {error}")],
        }
    }

    fn handle_disable(&mut self) -> Vec<String> {
        match self.monitor.disable(&mut self.timer, &mut self.gate) {
            Ok(()) => vec!["OK disable".to_string()],
            Err(error) => vec![format!("ERR timer {error}")],
        }
    }

    fn handle_attach(&mut self) -> Vec<String> {
        self.sink.active = true;
        let seed = self
            .monitor
            .initial_level()
            .map_or_else(|| "none".to_string(), |level| format!("{level}%"));
        vec![format!("OK attach seed-level={seed}")]
    }

    fn handle_detach(&mut self) -> Vec<String> {
        self.sink.active = false;
        vec!["OK detach".to_string()]
    }

    fn handle_voltage(&mut self, argument: Option<&str>) -> Vec<String> {
        let Some(voltage_mv) = argument.and_then(|value| value.parse::<u16>().ok()) else {
            return vec!["ERR usage: voltage <mv>".to_string()];
        };
        self.battery.borrow_mut().voltage_mv = voltage_mv;
        vec![format!("OK voltage {voltage_mv}mV")]
    }

    fn handle_drain(&mut self, argument: Option<&str>) -> Vec<String> {
        let Some(drain_mv) = argument.and_then(|value| value.parse::<u16>().ok()) else {
            return vec!["ERR usage: drain <mv>".to_string()];
        };
        self.battery.borrow_mut().drain_mv = drain_mv;
        vec![format!("OK drain {drain_mv}mV/tick")]
    }

    fn handle_tick(&mut self, argument: Option<&str>) -> Vec<String> {
        let count = argument
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(1);
        let Some(interval_ms) = self.timer.interval_ms else {
            return vec!["ERR monitor disabled; run `enable <interval-ms>` first".to_string()];
        };

        let mut lines = Vec::new();
        for _ in 0..count {
            self.advance_millis(u64::from(interval_ms));
            self.battery.borrow_mut().discharge();

            match self.monitor.on_tick() {
                Ok(()) | Err(SampleError::AlreadyInProgress) => {}
                Err(SampleError::NotCalibrated) => {
                    lines.push("ERR not-calibrated".to_string());
                    continue;
                }
                Err(SampleError::Adc(error)) => {
                    lines.push(format!("ERR adc {error}"));
                    continue;
                }
            }

            if let Some(event) = self.service_once() {
                lines.push(format!("EVT {}", describe_event(&event)));
            }
        }
        lines
    }

    fn handle_history(&self) -> Vec<String> {
        if self.monitor.history().is_empty() {
            return vec!["history empty".to_string()];
        }

        self.monitor
            .history()
            .oldest_first()
            .map(|record| {
                let elapsed = record
                    .elapsed_since_previous
                    .map_or_else(|| "-".to_string(), |gap| format!("+{}ms", gap.as_millis()));
                format!(
                    "  #{} {} {}",
                    record.seq,
                    elapsed,
                    describe_event(&record.event)
                )
            })
            .collect()
    }

    fn record_output(&mut self, lines: &[String]) -> io::Result<()> {
        for line in lines {
            self.transcript
                .append_line(self.clock_us, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

fn describe_event(event: &MeasurementEvent) -> String {
    format!(
        "{} {}mV level={}% valid={}",
        event.kind, event.voltage_mv, event.level_percent, event.valid
    )
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(profile: BatteryProfile) -> io::Result<Self> {
        let path = Path::new(profile.log_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: BatteryProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are simulated milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, clock_us: u64, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>8} ms] {} {}",
            clock_us / 1_000,
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "SIM <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_core::calibration::CalibrationState;
    use monitor_core::pipeline::MeasurementKind;

    #[test]
    fn enable_takes_an_immediate_sample() {
        let mut session = Session::new(BatteryProfile::Healthy).expect("session");
        let lines = session.handle_command("enable 1000").expect("command");

        assert_eq!(lines[0], "OK enable interval=1000ms");
        assert!(lines[1].starts_with("EVT full 4180mV"), "{}", lines[1]);
        assert_eq!(session.handler.events.len(), 1);
    }

    #[test]
    fn short_interval_is_rejected() {
        let mut session = Session::new(BatteryProfile::Healthy).expect("session");
        let lines = session.handle_command("enable 10").expect("command");

        assert_eq!(
            lines,
            vec!["ERR interval-too-short minimum=100ms requested=10ms".to_string()]
        );
        assert!(!session.monitor.is_enabled());
    }

    #[test]
    fn worn_cell_discharges_into_the_low_band() {
        let mut session = Session::new(BatteryProfile::Worn).expect("session");
        session.handle_command("enable 1000").expect("enable");
        let lines = session.handle_command("tick 8").expect("ticks");

        assert_eq!(lines.len(), 8);
        assert!(lines.last().expect("tick output").contains("low"));
        let last = session
            .monitor
            .history()
            .latest()
            .expect("history populated");
        assert_eq!(last.event.kind, MeasurementKind::Low);
    }

    #[test]
    fn attach_starts_sink_updates_and_freezes_the_initial_level() {
        let mut session = Session::new(BatteryProfile::Healthy).expect("session");
        session.handle_command("enable 1000").expect("enable");
        let initial = session.monitor.initial_level().expect("initial level");
        assert!(session.sink.updates.is_empty());

        session.handle_command("attach").expect("attach");
        session.handle_command("tick").expect("tick");

        assert_eq!(session.sink.updates.len(), 1);
        assert_eq!(session.monitor.initial_level(), Some(initial));
    }

    #[test]
    fn tick_requires_an_enabled_monitor() {
        let mut session = Session::new(BatteryProfile::Healthy).expect("session");
        let lines = session.handle_command("tick").expect("command");
        assert_eq!(
            lines,
            vec!["ERR monitor disabled; run `enable <interval-ms>` first".to_string()]
        );
    }

    #[test]
    fn disable_is_idempotent_through_the_command_surface() {
        let mut session = Session::new(BatteryProfile::Healthy).expect("session");
        session.handle_command("enable 1000").expect("enable");

        assert_eq!(
            session.handle_command("disable").expect("disable"),
            vec!["OK disable".to_string()]
        );
        assert_eq!(
            session.handle_command("disable").expect("disable"),
            vec!["OK disable".to_string()]
        );
        assert!(!session.gate.asserted);
    }

    #[test]
    fn calibration_completes_during_session_setup() {
        let session = Session::new(BatteryProfile::Healthy).expect("session");
        assert_eq!(session.monitor.calibration_state(), CalibrationState::Done);
        assert!(!session.monitor.adc().owned);
    }
}
