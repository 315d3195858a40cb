use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};

use campaign_core::models::EffectiveDeliverySettings;

/// 两次投递之间的延迟
///
/// 延迟在 `[min, max]` 秒内均匀抽取；给定随机种子时序列完全可复现。
pub struct DeliveryDelay {
    enabled: bool,
    min: f64,
    max: f64,
    rng: StdRng,
}

impl DeliveryDelay {
    pub fn new(enabled: bool, min: f64, max: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            enabled,
            min: min.max(0.0),
            max: max.max(min).max(0.0),
            rng,
        }
    }

    pub fn from_settings(settings: &EffectiveDeliverySettings) -> Self {
        Self::new(
            settings.delay_enabled,
            settings.delay_min,
            settings.delay_max,
            settings.random_seed,
        )
    }

    pub fn disabled() -> Self {
        Self::new(false, 0.0, 0.0, Some(0))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.max > 0.0
    }

    pub fn next_delay(&mut self) -> Duration {
        if !self.is_enabled() {
            return Duration::ZERO;
        }
        let seconds = if self.max > self.min {
            self.rng.random_range(self.min..=self.max)
        } else {
            self.min
        };
        Duration::from_secs_f64(seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = DeliveryDelay::new(true, 0.5, 3.0, Some(42));
        let mut b = DeliveryDelay::new(true, 0.5, 3.0, Some(42));
        let first: Vec<Duration> = (0..50).map(|_| a.next_delay()).collect();
        let second: Vec<Duration> = (0..50).map(|_| b.next_delay()).collect();
        assert_eq!(first, second);

        let mut c = DeliveryDelay::new(true, 0.5, 3.0, Some(7));
        let third: Vec<Duration> = (0..50).map(|_| c.next_delay()).collect();
        assert_ne!(first, third);
    }

    #[test]
    fn test_delays_stay_within_bounds() {
        let mut delay = DeliveryDelay::new(true, 1.0, 2.0, None);
        for _ in 0..200 {
            let d = delay.next_delay().as_secs_f64();
            assert!((1.0..=2.0).contains(&d), "延迟越界: {d}");
        }
    }

    #[test]
    fn test_fixed_and_disabled_delays() {
        let mut fixed = DeliveryDelay::new(true, 2.0, 2.0, None);
        assert_eq!(fixed.next_delay(), Duration::from_secs(2));

        let mut off = DeliveryDelay::new(false, 2.0, 5.0, Some(1));
        assert_eq!(off.next_delay(), Duration::ZERO);
        assert!(!DeliveryDelay::disabled().is_enabled());
    }
}
