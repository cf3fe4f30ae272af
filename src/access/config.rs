use crate::error::ConfigError;
use crate::time::Duration;

/// Protocol timing and sensing constants shared by all LBT categories.
///
/// Defaults follow the Cat-3/Cat-4 priority class profile; use
/// [`LbtConfig::cat2_profile`] for the deterministic-defer profile.
#[derive(Clone, PartialEq, Debug)]
pub struct LbtConfig {
    /// CCA-ED threshold for channel sensing, in dBm. Domain [-100, 0].
    pub ed_threshold_dbm: f64,

    /// Duration of one backoff slot
    pub slot: Duration,

    /// Interval the channel must be sensed idle before access (CCA defer)
    pub defer: Duration,

    /// Maximum channel occupancy time granted per access. Domain [2 ms, 20 ms].
    pub mcot: Duration,
}

impl Default for LbtConfig {
    fn default() -> Self {
        Self {
            ed_threshold_dbm: -79.0,
            slot: Duration::from_micros(5),
            defer: Duration::from_micros(8),
            mcot: Duration::from_millis(9),
        }
    }
}

impl LbtConfig {
    /// Cat-2 profile: 25 us deterministic defer, -69 dBm ED threshold.
    pub fn cat2_profile() -> Self {
        Self {
            ed_threshold_dbm: -69.0,
            defer: Duration::from_micros(25),
            ..Default::default()
        }
    }

    /// Reject invalid configurations before the run starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-100.0..=0.0).contains(&self.ed_threshold_dbm) {
            return Err(ConfigError::EdThreshold(self.ed_threshold_dbm));
        }
        if self.slot.is_zero() {
            return Err(ConfigError::ZeroSlotTime);
        }
        if self.mcot < Duration::from_millis(2) || self.mcot > Duration::from_millis(20) {
            return Err(ConfigError::Mcot(self.mcot));
        }
        Ok(())
    }
}

/// Configuration for the on/off duty-cycle manager. The on and off
/// intervals share a single period length.
#[derive(Clone, PartialEq, Debug)]
pub struct OnOffConfig {
    /// Length of each on and each off interval
    pub change_time: Duration,
}

impl Default for OnOffConfig {
    fn default() -> Self {
        Self {
            change_time: Duration::from_millis(9),
        }
    }
}

impl OnOffConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.change_time.is_zero() {
            return Err(ConfigError::ZeroChangeTime);
        }
        Ok(())
    }
}
