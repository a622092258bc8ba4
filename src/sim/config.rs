use std::time::Duration;

use bon::Builder;

use super::model::PowerState;
use super::restoration::RestorationStore;

/// Default period of one scan tick.
pub const DEFAULT_SCAN_TICK_INTERVAL: Duration = Duration::from_millis(800);
/// Default probability that a tick sighting is reported when duplicates are not allowed.
pub const DEFAULT_DUPLICATE_ADMISSION_PROBABILITY: f64 = 0.3;
/// Default probability that a scan tick reports a simulated error.
pub const DEFAULT_SCAN_ERROR_PROBABILITY: f64 = 0.1;
/// Default upper bound for MTU negotiation.
pub const DEFAULT_MAX_MTU: u16 = 512;
/// Default period of simulated notifications.
pub const DEFAULT_NOTIFICATION_INTERVAL: Duration = Duration::from_millis(1_000);

/// Restoration settings for a manager instance.
#[derive(Debug, Clone)]
pub struct Restoration {
    store: RestorationStore,
    identifier: String,
}

impl Restoration {
    /// Binds a manager to a snapshot identifier inside a shared store.
    #[must_use]
    pub fn new(store: RestorationStore, identifier: impl Into<String>) -> Self {
        Self {
            store,
            identifier: identifier.into(),
        }
    }

    pub(crate) fn store(&self) -> &RestorationStore {
        &self.store
    }

    pub(crate) fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Emulator settings.
///
/// ```
/// use std::time::Duration;
///
/// let config = spa_sim::SimulatorConfig::builder()
///     .scan_tick_interval(Duration::from_millis(100))
///     .scan_error_probability(0.0)
///     .rng_seed(7)
///     .build();
/// let _ = spa_sim::BleManager::new(config);
/// ```
#[derive(Debug, Clone, Builder)]
pub struct SimulatorConfig {
    #[builder(default)]
    initial_power_state: PowerState,
    #[builder(default = DEFAULT_SCAN_TICK_INTERVAL)]
    scan_tick_interval: Duration,
    #[builder(default = DEFAULT_DUPLICATE_ADMISSION_PROBABILITY)]
    duplicate_admission_probability: f64,
    #[builder(default = DEFAULT_SCAN_ERROR_PROBABILITY)]
    scan_error_probability: f64,
    #[builder(default = DEFAULT_MAX_MTU)]
    default_max_mtu: u16,
    #[builder(default = DEFAULT_NOTIFICATION_INTERVAL)]
    default_notification_interval: Duration,
    rng_seed: Option<u64>,
    restoration: Option<Restoration>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SimulatorConfig {
    pub(crate) fn initial_power_state(&self) -> PowerState {
        self.initial_power_state
    }

    pub(crate) fn scan_tick_interval(&self) -> Duration {
        self.scan_tick_interval
    }

    pub(crate) fn duplicate_admission_probability(&self) -> f64 {
        probability(
            self.duplicate_admission_probability,
            DEFAULT_DUPLICATE_ADMISSION_PROBABILITY,
        )
    }

    pub(crate) fn scan_error_probability(&self) -> f64 {
        probability(self.scan_error_probability, DEFAULT_SCAN_ERROR_PROBABILITY)
    }

    pub(crate) fn default_max_mtu(&self) -> u16 {
        self.default_max_mtu
    }

    pub(crate) fn default_notification_interval(&self) -> Duration {
        self.default_notification_interval
    }

    pub(crate) fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }

    pub(crate) fn restoration(&self) -> Option<&Restoration> {
        self.restoration.as_ref()
    }
}

// NaN falls back to the default since `clamp` keeps it.
fn probability(value: f64, default: f64) -> f64 {
    if value.is_nan() {
        default
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_reference_behaviour() {
        let config = SimulatorConfig::default();

        assert_eq!(PowerState::PoweredOn, config.initial_power_state());
        assert_eq!(Duration::from_millis(800), config.scan_tick_interval());
        assert_eq!(512, config.default_max_mtu());
        assert_eq!(None, config.rng_seed());
    }

    #[test]
    fn probabilities_are_clamped() {
        let config = SimulatorConfig::builder()
            .duplicate_admission_probability(1.5)
            .scan_error_probability(-0.2)
            .build();

        assert_eq!(1.0, config.duplicate_admission_probability());
        assert_eq!(0.0, config.scan_error_probability());
    }

    #[test]
    fn nan_probabilities_use_the_defaults() {
        let config = SimulatorConfig::builder()
            .duplicate_admission_probability(f64::NAN)
            .scan_error_probability(f64::NAN)
            .build();

        assert_eq!(
            DEFAULT_DUPLICATE_ADMISSION_PROBABILITY,
            config.duplicate_admission_probability()
        );
        assert_eq!(
            DEFAULT_SCAN_ERROR_PROBABILITY,
            config.scan_error_probability()
        );
    }
}
