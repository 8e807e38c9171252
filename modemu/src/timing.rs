//! Artificial communication delays applied to emulated devices
//!
//! Four independent components are summed for every transaction:
//!
//! 1. detection delay: `command_detection_delay`, or a uniform draw from
//!    `[0, polling_interval]` when only a polling interval is configured
//! 2. processing delay
//! 3. per-register delay multiplied by the number of registers addressed
//! 4. transmission delay derived from the request length and the baud rate
//!
//! All values are expressed in milliseconds.

use std::time::Duration;

use rand::Rng;

use crate::error::ConfigError;

/// Bits on the wire per transmitted byte: start, 8 data, parity, stop
const BITS_PER_CHARACTER: f64 = 11.0;

/// A delay in milliseconds, either fixed or drawn uniformly from a closed range
#[derive(Copy, Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(try_from = "RawDelaySpec", into = "RawDelaySpec")]
pub enum DelaySpec {
    /// Always the same value
    Fixed(f64),
    /// Uniform draw from `[min, max]`
    Range {
        /// lower bound, inclusive
        min: f64,
        /// upper bound, inclusive
        max: f64,
    },
}

/// Configuration form of [`DelaySpec`]: a bare number or a `[min, max]` pair
#[derive(Copy, Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
enum RawDelaySpec {
    Fixed(f64),
    Range([f64; 2]),
}

impl TryFrom<RawDelaySpec> for DelaySpec {
    type Error = ConfigError;

    fn try_from(raw: RawDelaySpec) -> Result<Self, Self::Error> {
        match raw {
            RawDelaySpec::Fixed(value) => DelaySpec::fixed(value),
            RawDelaySpec::Range([min, max]) => DelaySpec::range(min, max),
        }
    }
}

impl From<DelaySpec> for RawDelaySpec {
    fn from(spec: DelaySpec) -> Self {
        match spec {
            DelaySpec::Fixed(value) => RawDelaySpec::Fixed(value),
            DelaySpec::Range { min, max } => RawDelaySpec::Range([min, max]),
        }
    }
}

impl DelaySpec {
    /// Create a fixed delay, rejecting negative or non-finite values
    pub fn fixed(value: f64) -> Result<Self, ConfigError> {
        check_value("delay", value)?;
        Ok(DelaySpec::Fixed(value))
    }

    /// Create a range delay, rejecting `min > max` and negative bounds
    pub fn range(min: f64, max: f64) -> Result<Self, ConfigError> {
        if !(min.is_finite() && max.is_finite()) || min < 0.0 || min > max {
            return Err(ConfigError::InvalidDelayRange(min, max));
        }
        Ok(DelaySpec::Range { min, max })
    }

    /// Produce one delay value in milliseconds
    pub fn sample(&self) -> f64 {
        match *self {
            DelaySpec::Fixed(value) => value,
            DelaySpec::Range { min, max } => uniform(min, max),
        }
    }
}

pub(crate) fn check_value(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidTimingValue(name, value))
    }
}

fn uniform(min: f64, max: f64) -> f64 {
    if min >= max {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}

/// Returns 0 when no delay is configured, otherwise a sample of the delay
pub fn calculate_delay(spec: Option<&DelaySpec>) -> f64 {
    spec.map(DelaySpec::sample).unwrap_or(0.0)
}

/// Per-device timing parameters, every field is optional
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TimingConfig {
    /// Delay before the device notices a request, takes precedence over `polling_interval`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_detection_delay: Option<DelaySpec>,
    /// Device poll period, the detection delay is drawn from `[0, polling_interval]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_interval: Option<f64>,
    /// Delay spent executing the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_delay: Option<DelaySpec>,
    /// Additional delay per register addressed by the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_register_delay: Option<f64>,
    /// Serial line speed used for the transmission delay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    /// Add the time needed to transmit the request at `baud_rate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_calculate_transmission_delay: Option<bool>,
}

impl TimingConfig {
    /// Reject negative or non-finite scalar values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(value) = self.polling_interval {
            check_value("pollingInterval", value)?;
        }
        if let Some(value) = self.per_register_delay {
            check_value("perRegisterDelay", value)?;
        }
        if let Some(0) = self.baud_rate {
            return Err(ConfigError::InvalidTimingValue("baudRate", 0.0));
        }
        Ok(())
    }
}

/// Computes and applies the artificial delay of one device
#[derive(Clone, Debug, Default)]
pub struct TimingSimulator {
    config: TimingConfig,
}

impl TimingSimulator {
    /// Create a simulator from its configuration
    pub fn new(config: TimingConfig) -> Self {
        Self { config }
    }

    /// Configuration in use
    pub fn config(&self) -> &TimingConfig {
        &self.config
    }

    /// Returns 0 when no delay is configured, otherwise a sample of the delay
    pub fn calculate_delay(&self, spec: Option<&DelaySpec>) -> f64 {
        calculate_delay(spec)
    }

    /// Total artificial delay in milliseconds for one request
    pub fn calculate_total_delay(&self, request: &[u8], register_count: u16) -> f64 {
        self.detection_delay()
            + self.calculate_delay(self.config.processing_delay.as_ref())
            + self.per_register_delay(register_count)
            + self.transmission_delay(request.len())
    }

    /// Suspend the caller for the total delay of `request`, returning the time slept
    ///
    /// A zero delay still yields to the scheduler once.
    pub async fn delay(&self, request: &[u8], register_count: u16) -> Duration {
        let millis = self.calculate_total_delay(request, register_count);
        match to_duration(millis) {
            Some(duration) => {
                tracing::trace!("delaying response by {:.3} ms", millis);
                tokio::time::sleep(duration).await;
                duration
            }
            None => {
                tokio::task::yield_now().await;
                Duration::ZERO
            }
        }
    }

    fn detection_delay(&self) -> f64 {
        match (&self.config.command_detection_delay, self.config.polling_interval) {
            (Some(spec), _) => spec.sample(),
            (None, Some(interval)) => uniform(0.0, interval),
            (None, None) => 0.0,
        }
    }

    fn per_register_delay(&self, register_count: u16) -> f64 {
        self.config
            .per_register_delay
            .map(|delay| delay * register_count as f64)
            .unwrap_or(0.0)
    }

    fn transmission_delay(&self, frame_length: usize) -> f64 {
        match (
            self.config.baud_rate,
            self.config.auto_calculate_transmission_delay,
        ) {
            (Some(baud), Some(true)) if baud > 0 => {
                (frame_length as f64 * BITS_PER_CHARACTER) / (baud as f64 / 1000.0)
            }
            _ => 0.0,
        }
    }
}

fn to_duration(millis: f64) -> Option<Duration> {
    if millis.is_finite() && millis > 0.0 {
        Some(Duration::from_micros((millis * 1000.0).round() as u64))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READ_TWO: [u8; 6] = [0x01, 0x03, 0x00, 0x00, 0x00, 0x02];

    fn simulator(config: TimingConfig) -> TimingSimulator {
        TimingSimulator::new(config)
    }

    #[test]
    fn absent_spec_is_zero_and_fixed_is_unchanged() {
        assert_eq!(calculate_delay(None), 0.0);
        assert_eq!(calculate_delay(Some(&DelaySpec::Fixed(12.5))), 12.5);
    }

    #[test]
    fn range_samples_stay_within_bounds_and_vary() {
        let spec = DelaySpec::range(10.0, 20.0).unwrap();
        let samples: Vec<f64> = (0..100).map(|_| calculate_delay(Some(&spec))).collect();
        assert!(samples.iter().all(|x| (10.0..=20.0).contains(x)));
        let first = samples[0];
        assert!(samples.iter().any(|x| *x != first));
    }

    #[test]
    fn degenerate_range_is_constant() {
        let spec = DelaySpec::range(7.0, 7.0).unwrap();
        for _ in 0..50 {
            assert_eq!(spec.sample(), 7.0);
        }
    }

    #[test]
    fn inverted_or_negative_ranges_are_rejected() {
        assert!(DelaySpec::range(5.0, 1.0).is_err());
        assert!(DelaySpec::range(-1.0, 1.0).is_err());
        assert!(DelaySpec::fixed(f64::NAN).is_err());
    }

    #[test]
    fn components_are_additive() {
        let sim = simulator(TimingConfig {
            command_detection_delay: Some(DelaySpec::Fixed(5.0)),
            processing_delay: Some(DelaySpec::Fixed(3.0)),
            per_register_delay: Some(0.0),
            ..Default::default()
        });
        assert_eq!(sim.calculate_total_delay(&READ_TWO, 0), 8.0);
        assert_eq!(sim.calculate_total_delay(&READ_TWO, 100), 8.0);

        let sim = simulator(TimingConfig {
            command_detection_delay: Some(DelaySpec::Fixed(5.0)),
            processing_delay: Some(DelaySpec::Fixed(3.0)),
            per_register_delay: Some(1.0),
            ..Default::default()
        });
        assert_eq!(sim.calculate_total_delay(&READ_TWO, 10), 18.0);
    }

    #[test]
    fn detection_delay_takes_precedence_over_polling() {
        let sim = simulator(TimingConfig {
            command_detection_delay: Some(DelaySpec::Fixed(2.0)),
            polling_interval: Some(1000.0),
            ..Default::default()
        });
        for _ in 0..50 {
            assert_eq!(sim.calculate_total_delay(&READ_TWO, 0), 2.0);
        }
    }

    #[test]
    fn polling_interval_draws_from_zero_to_interval() {
        let sim = simulator(TimingConfig {
            polling_interval: Some(50.0),
            ..Default::default()
        });
        for _ in 0..100 {
            let delay = sim.calculate_total_delay(&READ_TWO, 0);
            assert!((0.0..=50.0).contains(&delay));
        }
    }

    #[test]
    fn transmission_delay_requires_baud_and_flag() {
        let baud_only = simulator(TimingConfig {
            baud_rate: Some(9600),
            ..Default::default()
        });
        assert_eq!(baud_only.calculate_total_delay(&READ_TWO, 2), 0.0);

        let sim = simulator(TimingConfig {
            baud_rate: Some(9600),
            auto_calculate_transmission_delay: Some(true),
            ..Default::default()
        });
        let expected = 6.0 * 11.0 / 9.6;
        assert!((sim.calculate_total_delay(&READ_TWO, 2) - expected).abs() < 1e-9);
    }

    #[test]
    fn config_accepts_numbers_and_pairs() {
        let config: TimingConfig = serde_json::from_str(
            r#"{"commandDetectionDelay": [2, 4], "processingDelay": 3, "baudRate": 19200}"#,
        )
        .unwrap();
        assert_eq!(
            config.command_detection_delay,
            Some(DelaySpec::Range { min: 2.0, max: 4.0 })
        );
        assert_eq!(config.processing_delay, Some(DelaySpec::Fixed(3.0)));
        assert_eq!(config.baud_rate, Some(19200));
    }

    #[test]
    fn config_rejects_inverted_pairs() {
        let result: Result<TimingConfig, _> =
            serde_json::from_str(r#"{"processingDelay": [9, 1]}"#);
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_suspends_for_the_total() {
        let sim = simulator(TimingConfig {
            command_detection_delay: Some(DelaySpec::Fixed(5.0)),
            processing_delay: Some(DelaySpec::Fixed(3.0)),
            ..Default::default()
        });
        let start = tokio::time::Instant::now();
        let slept = sim.delay(&READ_TWO, 1).await;
        assert_eq!(slept, Duration::from_millis(8));
        assert!(start.elapsed() >= Duration::from_millis(8));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_does_not_advance_time() {
        let sim = TimingSimulator::default();
        let start = tokio::time::Instant::now();
        assert_eq!(sim.delay(&READ_TWO, 1).await, Duration::ZERO);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
