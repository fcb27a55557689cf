use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf as hal;
use embassy_nrf::gpio::{Level, Output, OutputDrive};
use embassy_sync::channel::Channel;

use crate::hw::{BatteryFrontEnd, OutputGate};
use crate::monitor::AdcEventQueue;
use crate::sink::SharedLevel;

mod monitor_task;

pub(super) static ADC_EVENTS: AdcEventQueue = Channel::new();
pub(super) static BATTERY_LEVEL: SharedLevel = SharedLevel::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let p = hal::init(hal::config::Config::default());

    // Thingy-style battery wiring: divider tap on AIN4/P0.28, monitor-enable
    // output on P0.25, held low until measurement is enabled.
    let front_end = BatteryFrontEnd::new(p.SAADC, p.P0_28);
    let gate = OutputGate::new(Output::new(p.P0_25, Level::Low, OutputDrive::Standard));

    spawner
        .spawn(monitor_task::run(front_end, gate))
        .expect("failed to spawn battery monitor task");

    core::future::pending::<()>().await;
}
