//! Raw-code-to-voltage conversion shared by firmware and host targets.
//!
//! Everything here is pure integer math: the ADC descriptor fixes the
//! code-to-voltage scale factor, the divider scale undoes the external
//! resistive divider, and [`raw_to_millivolts`] combines the two into a
//! battery-terminal reading rounded to the nearest 10 mV.

use core::fmt;

/// Internal band-gap reference voltage of the converter, in millivolts.
pub const INTERNAL_REFERENCE_MV: u16 = 600;

/// Gain selector applied ahead of the converter input.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AdcGain {
    Gain1_6,
    Gain1_5,
    Gain1_4,
    Gain1_3,
    Gain1_2,
    Gain1,
    Gain2,
    Gain4,
}

impl AdcGain {
    /// Returns the gain as a `(numerator, denominator)` rational.
    #[must_use]
    pub const fn ratio(self) -> (u32, u32) {
        match self {
            AdcGain::Gain1_6 => (1, 6),
            AdcGain::Gain1_5 => (1, 5),
            AdcGain::Gain1_4 => (1, 4),
            AdcGain::Gain1_3 => (1, 3),
            AdcGain::Gain1_2 => (1, 2),
            AdcGain::Gain1 => (1, 1),
            AdcGain::Gain2 => (2, 1),
            AdcGain::Gain4 => (4, 1),
        }
    }

    /// Encodes the selector into the 3-bit register value.
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            AdcGain::Gain1_6 => 0,
            AdcGain::Gain1_5 => 1,
            AdcGain::Gain1_4 => 2,
            AdcGain::Gain1_3 => 3,
            AdcGain::Gain1_2 => 4,
            AdcGain::Gain1 => 5,
            AdcGain::Gain2 => 6,
            AdcGain::Gain4 => 7,
        }
    }

    /// Decodes a raw register value; unknown selectors are a configuration
    /// error surfaced by [`crate::pipeline::ConfigError::InvalidGain`].
    #[must_use]
    pub const fn from_raw(code: u8) -> Option<Self> {
        match code {
            0 => Some(AdcGain::Gain1_6),
            1 => Some(AdcGain::Gain1_5),
            2 => Some(AdcGain::Gain1_4),
            3 => Some(AdcGain::Gain1_3),
            4 => Some(AdcGain::Gain1_2),
            5 => Some(AdcGain::Gain1),
            6 => Some(AdcGain::Gain2),
            7 => Some(AdcGain::Gain4),
            _ => None,
        }
    }
}

impl fmt::Display for AdcGain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (numerator, denominator) = self.ratio();
        write!(f, "{numerator}/{denominator}")
    }
}

/// Conversion resolution of the converter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AdcResolution {
    Bits8,
    Bits10,
    Bits12,
    Bits14,
}

impl AdcResolution {
    /// Number of result bits for this resolution.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            AdcResolution::Bits8 => 8,
            AdcResolution::Bits10 => 10,
            AdcResolution::Bits12 => 12,
            AdcResolution::Bits14 => 14,
        }
    }

    /// Full-scale code count, `2^bits`.
    #[must_use]
    pub const fn full_scale(self) -> u32 {
        1 << self.bits()
    }
}

/// Static description of the converter used only for conversion, never
/// mutated after initialization.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AdcDescriptor {
    pub gain: AdcGain,
    pub reference_mv: u16,
    pub resolution: AdcResolution,
}

impl AdcDescriptor {
    /// Creates a descriptor with an explicit reference voltage.
    #[must_use]
    pub const fn new(gain: AdcGain, reference_mv: u16, resolution: AdcResolution) -> Self {
        Self {
            gain,
            reference_mv,
            resolution,
        }
    }

    /// Creates a descriptor using the internal band-gap reference.
    #[must_use]
    pub const fn internal(gain: AdcGain, resolution: AdcResolution) -> Self {
        Self::new(gain, INTERNAL_REFERENCE_MV, resolution)
    }
}

/// External resistive divider between the battery terminal and the ADC pin.
///
/// Both resistors zero means no divider is fitted; exactly one zero is an
/// invalid configuration rejected at initialization.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DividerConfig {
    pub r1_ohm: u32,
    pub r2_ohm: u32,
}

impl DividerConfig {
    /// Describes a board with a fitted divider.
    #[must_use]
    pub const fn new(r1_ohm: u32, r2_ohm: u32) -> Self {
        Self { r1_ohm, r2_ohm }
    }

    /// Describes a board where the battery drives the pin directly.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            r1_ohm: 0,
            r2_ohm: 0,
        }
    }

    /// Derives the rational multiplier that maps a pin voltage back to the
    /// battery terminal, or `None` when exactly one resistor is zero.
    #[must_use]
    pub const fn scale(&self) -> Option<DividerScale> {
        match (self.r1_ohm, self.r2_ohm) {
            (0, 0) => Some(DividerScale::UNITY),
            (0, _) | (_, 0) => None,
            (r1, r2) => Some(DividerScale {
                numerator: r1 as u64 + r2 as u64,
                denominator: r2 as u64,
            }),
        }
    }
}

/// Inverse of the divider factor `r2 / (r1 + r2)`, kept as a rational so the
/// conversion stays in integer arithmetic.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DividerScale {
    numerator: u64,
    denominator: u64,
}

impl DividerScale {
    /// Scale for a board without an external divider.
    pub const UNITY: Self = Self {
        numerator: 1,
        denominator: 1,
    };

    /// Returns the multiplier numerator (`r1 + r2`, or 1).
    #[must_use]
    pub const fn numerator(self) -> u64 {
        self.numerator
    }

    /// Returns the multiplier denominator (`r2`, or 1).
    #[must_use]
    pub const fn denominator(self) -> u64 {
        self.denominator
    }
}

/// Converts a raw converter code into a battery-terminal voltage in
/// millivolts, rounded to the nearest 10 mV.
///
/// Negative codes (possible after offset calibration on a grounded input)
/// clamp to zero; results beyond `u16::MAX` saturate.
#[must_use]
pub fn raw_to_millivolts(code: i16, adc: &AdcDescriptor, divider: DividerScale) -> u16 {
    let code = u64::from(u16::try_from(code).unwrap_or(0));
    let (gain_num, gain_den) = adc.gain.ratio();

    let numerator =
        code * u64::from(adc.reference_mv) * u64::from(gain_den) * divider.numerator();
    let denominator =
        u64::from(gain_num) * u64::from(adc.resolution.full_scale()) * divider.denominator();

    let millivolts = numerator / denominator;
    let rounded = (millivolts + 5) / 10 * 10;
    u16::try_from(rounded).unwrap_or(u16::MAX)
}
