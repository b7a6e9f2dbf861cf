//! Camera delay and exposure configuration container.
//!
//! The camera expresses exposure and inter-frame delay as an integer count
//! plus a timebase unit for each. This module relates those four device
//! registers to the exposure time in seconds and frame rate in Hertz used
//! by the configuration interface.

/// Timebase units for the delay and exposure registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timebase {
    #[default]
    Ns = 0,
    Us = 1,
    Ms = 2,
}

impl Timebase {
    /// The timebase tick in seconds.
    pub const fn value(self) -> f64 {
        match self {
            Timebase::Ns => 1.0e-9,
            Timebase::Us => 1.0e-6,
            Timebase::Ms => 1.0e-3,
        }
    }

    /// The timebase unit name.
    pub const fn unit(self) -> &'static str {
        match self {
            Timebase::Ns => "ns",
            Timebase::Us => "us",
            Timebase::Ms => "ms",
        }
    }

    /// The register encoding of this timebase.
    pub fn as_raw(self) -> u16 {
        self as u16
    }

    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Timebase::Ns),
            1 => Some(Timebase::Us),
            2 => Some(Timebase::Ms),
            _ => None,
        }
    }

    /// Select the appropriate timebase for a time value in seconds.
    fn select(time_s: f64) -> Self {
        if time_s < Timebase::Us.value() {
            Timebase::Ns
        } else if time_s < Timebase::Ms.value() {
            Timebase::Us
        } else {
            Timebase::Ms
        }
    }
}

/// Delay and exposure register settings.
///
/// Equality compares all four fields, so pushing settings to the camera can
/// be skipped when nothing changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DelayExposure {
    pub exposure_time: u32,
    pub delay_time: u32,
    pub exposure_timebase: Timebase,
    pub delay_timebase: Timebase,
}

impl DelayExposure {
    /// Calculate register settings for an exposure time in seconds and a
    /// frame rate in Hertz.
    ///
    /// The delay is the remainder of the frame period after the exposure.
    /// A frame rate incompatible with the exposure time (negative delay) is
    /// not validated here; callers must choose a consistent pair.
    pub fn new(exposure_s: f64, frame_rate_hz: f64) -> Self {
        let exposure_timebase = Timebase::select(exposure_s);
        let exposure_time = (exposure_s / exposure_timebase.value()) as u32;

        let frame_period = 1.0 / frame_rate_hz;
        let delay_s = frame_period - exposure_s;
        let delay_timebase = Timebase::select(delay_s);
        let delay_time = (delay_s / delay_timebase.value()) as u32;

        Self {
            exposure_time,
            delay_time,
            exposure_timebase,
            delay_timebase,
        }
    }

    pub fn from_parts(
        delay_time: u32,
        exposure_time: u32,
        delay_timebase: Timebase,
        exposure_timebase: Timebase,
    ) -> Self {
        Self {
            exposure_time,
            delay_time,
            exposure_timebase,
            delay_timebase,
        }
    }

    /// The exposure time in seconds implied by the register settings.
    pub fn exposure_time_seconds(&self) -> f64 {
        self.exposure_time as f64 * self.exposure_timebase.value()
    }

    /// The frame rate in Hertz implied by the register settings.
    pub fn frame_rate_hz(&self) -> f64 {
        1.0 / (self.exposure_time_seconds() + self.delay_time as f64 * self.delay_timebase.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timebase_selection_boundaries() {
        assert_eq!(Timebase::select(5.0e-7), Timebase::Ns);
        assert_eq!(Timebase::select(1.0e-6), Timebase::Us);
        assert_eq!(Timebase::select(5.0e-4), Timebase::Us);
        assert_eq!(Timebase::select(1.0e-3), Timebase::Ms);
        assert_eq!(Timebase::select(2.5), Timebase::Ms);
    }

    #[test]
    fn timebase_raw_round_trip() {
        for timebase in [Timebase::Ns, Timebase::Us, Timebase::Ms] {
            assert_eq!(Timebase::from_raw(timebase.as_raw()), Some(timebase));
        }
        assert_eq!(Timebase::from_raw(3), None);
    }

    #[test]
    fn exposure_and_rate_round_trip_within_timebase_resolution() {
        for exposure_s in [1.0e-7, 1.0e-4, 2.5e-3] {
            for frame_rate in [10.0, 100.0, 1000.0] {
                if exposure_s >= 1.0 / frame_rate {
                    continue;
                }
                let settings = DelayExposure::new(exposure_s, frame_rate);

                let expected_exposure = (exposure_s / settings.exposure_timebase.value()) as u32
                    as f64
                    * settings.exposure_timebase.value();
                assert!(
                    (settings.exposure_time_seconds() - expected_exposure).abs() < 1.0e-12,
                    "exposure {exposure_s} rate {frame_rate}"
                );

                let delay_s = settings.delay_time as f64 * settings.delay_timebase.value();
                let expected_rate = 1.0 / (settings.exposure_time_seconds() + delay_s);
                assert!(
                    (settings.frame_rate_hz() - expected_rate).abs() < 1.0e-9,
                    "exposure {exposure_s} rate {frame_rate}"
                );
            }
        }
    }

    #[test]
    fn one_millisecond_at_one_hundred_hertz() {
        let settings = DelayExposure::new(0.001, 100.0);
        assert_eq!(settings.exposure_time, 1);
        assert_eq!(settings.exposure_timebase, Timebase::Ms);
        assert_eq!(settings.delay_time, 9);
        assert_eq!(settings.delay_timebase, Timebase::Ms);
        assert!((settings.frame_rate_hz() - 100.0).abs() < 1.0e-6);
    }

    #[test]
    fn sub_microsecond_exposure_uses_nanoseconds() {
        let settings = DelayExposure::new(1.0e-7, 1000.0);
        assert_eq!(settings.exposure_timebase, Timebase::Ns);
        assert_eq!(settings.exposure_time, 100);
    }

    #[test]
    fn equality_compares_all_fields() {
        let a = DelayExposure::new(0.001, 100.0);
        let b = DelayExposure::new(0.001, 100.0);
        let c = DelayExposure::new(0.002, 100.0);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn default_is_zeroed_nanoseconds() {
        let settings = DelayExposure::default();
        assert_eq!(settings.exposure_time, 0);
        assert_eq!(settings.delay_time, 0);
        assert_eq!(settings.exposure_timebase, Timebase::Ns);
        assert_eq!(settings.delay_timebase, Timebase::Ns);
    }
}
