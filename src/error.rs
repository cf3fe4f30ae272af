use crate::time::Duration;

/// Configuration errors, rejected before a run starts.
///
/// Protocol-invariant violations at run time are not represented here: they
/// indicate a scheduling or integration bug and abort the run instead.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Energy detection threshold outside [-100, 0] dBm
    EdThreshold(f64),

    /// Maximum channel occupancy time outside [2 ms, 20 ms]
    Mcot(Duration),

    /// Slot time must be non-zero
    ZeroSlotTime,

    /// Contention window bounds with min > max
    ContentionWindowBounds { min: u32, max: u32 },

    /// On/off period must be non-zero
    ZeroChangeTime,
}
