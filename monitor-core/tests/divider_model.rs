use monitor_core::conversion::{
    AdcDescriptor, AdcGain, AdcResolution, DividerConfig, raw_to_millivolts,
};
use monitor_core::soc::SocTable;

#[test]
fn half_divider_round_trip_matches_the_analytic_value() {
    // 10k/10k divider (factor 0.5), gain 1, 600 mV internal reference,
    // 10-bit resolution. A code of 410 reads 240.23 mV at the pin, which is
    // 480.46 mV at the battery terminal; the pipeline reports it rounded to
    // the nearest 10 mV.
    let adc = AdcDescriptor::internal(AdcGain::Gain1, AdcResolution::Bits10);
    let scale = DividerConfig::new(10_000, 10_000)
        .scale()
        .expect("valid divider");

    let reported = raw_to_millivolts(410, &adc, scale);
    let analytic_mv = f64::from(410) / 1024.0 * 600.0 / 0.5;

    assert_eq!(reported, 480);
    assert!((f64::from(reported) - analytic_mv).abs() < 10.0);
}

#[test]
fn divider_validation_distinguishes_absent_from_broken() {
    assert!(DividerConfig::none().scale().is_some());
    assert!(DividerConfig::new(0, 10_000).scale().is_none());
    assert!(DividerConfig::new(10_000, 0).scale().is_none());
}

#[test]
fn soc_lookup_saturates_at_the_table_edges() {
    static LEVELS: [u8; 11] = [0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100];
    let table = SocTable::new(3000, 100, &LEVELS);

    assert_eq!(table.voltage_to_percent(2500), LEVELS[0]);
    assert_eq!(table.voltage_to_percent(5000), LEVELS[10]);
    assert_eq!(table.voltage_to_percent(3050), LEVELS[0]);
}
