//! SAADC front end and monitor-enable output for the nRF52 target.
//!
//! This module wires the Embassy SAADC driver into the converter seam owned
//! by `monitor-core`. The driver is rebuilt for every claim and dropped at
//! release, so the peripheral is powered down whenever no acquisition is in
//! flight.

#![cfg(target_os = "none")]

use embassy_nrf::gpio::Output;
use embassy_nrf::peripherals::{P0_28, SAADC};
use embassy_nrf::saadc::{
    self, ChannelConfig, Config, Gain, Oversample, Reference, Resolution, Saadc, Time,
};
use embassy_nrf::{Peri, bind_interrupts};

use monitor_core::conversion::{AdcDescriptor, AdcGain, AdcResolution};
use monitor_core::pipeline::{AcquisitionTime, AdcChannelConfig, MonitorGate};

bind_interrupts!(struct Irqs {
    SAADC => saadc::InterruptHandler;
});

/// Battery sense wiring: the divider tap sits on AIN4 (P0.28).
pub struct BatteryFrontEnd {
    adc: Peri<'static, SAADC>,
    pin: Peri<'static, P0_28>,
}

impl BatteryFrontEnd {
    /// Takes ownership of the converter peripheral and the sense pin.
    #[must_use]
    pub fn new(adc: Peri<'static, SAADC>, pin: Peri<'static, P0_28>) -> Self {
        Self { adc, pin }
    }

    /// Builds the one-shot driver for a single calibration or acquisition
    /// pass; dropping it releases the peripheral again.
    pub fn acquire(
        &mut self,
        descriptor: &AdcDescriptor,
        channel: &AdcChannelConfig,
    ) -> Saadc<'_, 1> {
        let mut config = Config::default();
        config.resolution = resolution_setting(descriptor.resolution);
        config.oversample = oversample_setting(channel.burst);

        let mut channel_config = ChannelConfig::single_ended(self.pin.reborrow());
        channel_config.gain = gain_setting(descriptor.gain);
        channel_config.reference = Reference::INTERNAL;
        channel_config.time = time_setting(channel.acquisition);

        Saadc::new(self.adc.reborrow(), Irqs, config, [channel_config])
    }
}

fn gain_setting(gain: AdcGain) -> Gain {
    match gain {
        AdcGain::Gain1_6 => Gain::GAIN1_6,
        AdcGain::Gain1_5 => Gain::GAIN1_5,
        AdcGain::Gain1_4 => Gain::GAIN1_4,
        AdcGain::Gain1_3 => Gain::GAIN1_3,
        AdcGain::Gain1_2 => Gain::GAIN1_2,
        AdcGain::Gain1 => Gain::GAIN1,
        AdcGain::Gain2 => Gain::GAIN2,
        AdcGain::Gain4 => Gain::GAIN4,
    }
}

fn resolution_setting(resolution: AdcResolution) -> Resolution {
    match resolution {
        AdcResolution::Bits8 => Resolution::_8BIT,
        AdcResolution::Bits10 => Resolution::_10BIT,
        AdcResolution::Bits12 => Resolution::_12BIT,
        AdcResolution::Bits14 => Resolution::_14BIT,
    }
}

fn time_setting(acquisition: AcquisitionTime) -> Time {
    match acquisition {
        AcquisitionTime::Us3 => Time::_3US,
        AcquisitionTime::Us5 => Time::_5US,
        AcquisitionTime::Us10 => Time::_10US,
        AcquisitionTime::Us15 => Time::_15US,
        AcquisitionTime::Us20 => Time::_20US,
        AcquisitionTime::Us40 => Time::_40US,
    }
}

fn oversample_setting(burst: bool) -> Oversample {
    if burst {
        Oversample::OVER4X
    } else {
        Oversample::BYPASS
    }
}

/// Monitor-enable output gating the divider; initialized deasserted to keep
/// idle power down.
pub struct OutputGate {
    pin: Output<'static>,
}

impl OutputGate {
    /// Wraps the configured enable output.
    #[must_use]
    pub fn new(pin: Output<'static>) -> Self {
        Self { pin }
    }
}

impl MonitorGate for OutputGate {
    fn set_active(&mut self, active: bool) {
        if active {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }
}
