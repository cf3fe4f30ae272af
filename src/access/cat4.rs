//! Category 4 LBT: random backoff over an adaptive contention window.
//!
//! The contention window is resized between backoff draws based on
//! accumulated downlink HARQ feedback: on qualifying negative feedback it
//! doubles (saturating at `cw_max`), otherwise it resets to `cw_min` once a
//! configured number of attempts has passed without degradation.

use std::rc::Rc;

use log::debug;
use rand::rngs::SmallRng;
use strum::Display;

use crate::access::lbt::{draw_uniform, LbtAccessManager, LbtCategory};
use crate::access::FeedbackSource;
use crate::error::ConfigError;

/// Rule deciding when accumulated feedback counts as a failed transmit
/// opportunity, growing the contention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CwUpdateRule {
    /// Grow only if every transport block since the last draw was negative
    AllNacks,
    /// Grow if any transport block was negative
    AnyNack,
    /// Grow if at least 10% of the feedback was negative
    Nacks10Percent,
    /// Grow if at least 80% of the feedback was negative
    Nacks80Percent,
}

/// Configuration for the Cat-4 contention window adaptation.
#[derive(Clone, PartialEq, Debug)]
pub struct Cat4Config {
    /// Minimum (and initial) contention window
    pub cw_min: u32,

    /// Maximum contention window. 63 for priority class 3, 1023 for
    /// priority class 4.
    pub cw_max: u32,

    /// Window update rule
    pub cw_update_rule: CwUpdateRule,

    /// Number of attempts to keep the current window before resetting it
    /// to `cw_min`
    pub retry_limit: u8,
}

impl Default for Cat4Config {
    fn default() -> Self {
        Self {
            cw_min: 15,
            cw_max: 1023,
            cw_update_rule: CwUpdateRule::AnyNack,
            retry_limit: 0,
        }
    }
}

impl Cat4Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cw_min > self.cw_max {
            return Err(ConfigError::ContentionWindowBounds {
                min: self.cw_min,
                max: self.cw_max,
            });
        }
        Ok(())
    }
}

/// Category 4 policy: adaptive contention window driven by HARQ feedback.
#[derive(Debug, Clone)]
pub struct Cat4 {
    config: Cat4Config,
    contention_window: u32,
    acks: u32,
    nacks: u32,
    attempts: u8,
}

impl Cat4 {
    pub fn new(config: Cat4Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            contention_window: config.cw_min,
            config,
            acks: 0,
            nacks: 0,
            attempts: 0,
        })
    }

    pub fn contention_window(&self) -> u32 {
        self.contention_window
    }

    /// Evaluate the outcome of the last transmit opportunity against the
    /// update rule.
    fn failed(&self) -> bool {
        match self.config.cw_update_rule {
            CwUpdateRule::AllNacks => self.acks == 0,
            CwUpdateRule::AnyNack => self.nacks > 0,
            CwUpdateRule::Nacks10Percent => {
                self.nacks as f64 / (self.acks + self.nacks) as f64 >= 0.1
            }
            CwUpdateRule::Nacks80Percent => {
                self.nacks as f64 / (self.acks + self.nacks) as f64 >= 0.8
            }
        }
    }

    /// Exponential growth, saturating at `cw_max`.
    fn grow_window(&mut self) {
        let old = self.contention_window;
        self.contention_window = (2 * (old + 1) - 1).min(self.config.cw_max);
        debug!("cat4-lbt: CW updated from {} to {}", old, self.contention_window);
    }

    /// Reset with hysteresis: keep the window for `retry_limit` attempts,
    /// then fall back to `cw_min`.
    fn reset_window(&mut self) {
        if self.attempts < self.config.retry_limit {
            self.attempts += 1;
        } else {
            debug!(
                "cat4-lbt: CW reset from {} to {}",
                self.contention_window, self.config.cw_min
            );
            self.contention_window = self.config.cw_min;
            self.attempts = 0;
        }
    }
}

impl LbtCategory for Cat4 {
    const NAME: &'static str = "cat4-lbt";

    fn draw_backoff_slots(&mut self, rng: &mut SmallRng) -> u32 {
        // First draw, no feedback yet: nothing to evaluate.
        if self.acks == 0 && self.nacks == 0 {
            return draw_uniform(rng, self.contention_window);
        }

        let failed = self.failed();
        self.acks = 0;
        self.nacks = 0;

        if failed {
            self.grow_window();
        } else {
            self.reset_window();
        }

        draw_uniform(rng, self.contention_window)
    }

    fn record_feedback(&mut self, received_ok: bool) {
        if received_ok {
            self.acks += 1;
        } else {
            self.nacks += 1;
        }
    }
}

pub type Cat4LbtAccessManager = LbtAccessManager<Cat4>;

impl Cat4LbtAccessManager {
    /// Current contention window.
    pub fn contention_window(&self) -> u32 {
        self.core.borrow().category.contention_window()
    }

    /// Subscribe to the MAC's downlink HARQ feedback stream.
    pub fn attach_feedback_source(&mut self, mac: &mut dyn FeedbackSource) {
        let weak = Rc::downgrade(&self.core);
        mac.set_feedback_callback(Rc::new(move |received_ok| {
            if let Some(core) = weak.upgrade() {
                core.borrow_mut().category.record_feedback(received_ok);
            }
        }));
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use rand_core::SeedableRng;

    use super::*;
    use crate::access::config::LbtConfig;
    use crate::access::mock::{MockEnergySource, MockFeedbackSource};
    use crate::access::ChannelAccessManager;
    use crate::sim::Scheduler;
    use crate::time::Duration;

    fn cat4(config: Cat4Config) -> (Cat4, SmallRng) {
        (Cat4::new(config).unwrap(), SmallRng::seed_from_u64(1))
    }

    #[test]
    fn window_starts_at_cw_min() {
        let (cat, _) = cat4(Cat4Config::default());
        assert_eq!(cat.contention_window(), 15);
    }

    #[test]
    fn any_nack_grows_the_window() {
        let (mut cat, mut rng) = cat4(Cat4Config::default());

        let first = cat.draw_backoff_slots(&mut rng);
        assert!(first <= 15);
        assert_eq!(cat.contention_window(), 15);

        cat.record_feedback(false);
        let second = cat.draw_backoff_slots(&mut rng);
        assert_eq!(cat.contention_window(), 31);
        assert!(second <= 31);
    }

    #[test]
    fn window_resets_immediately_with_zero_retry_limit() {
        let (mut cat, mut rng) = cat4(Cat4Config::default());

        cat.record_feedback(false);
        cat.draw_backoff_slots(&mut rng);
        assert_eq!(cat.contention_window(), 31);

        // Positive-only feedback qualifies as success under AnyNack.
        cat.record_feedback(true);
        cat.draw_backoff_slots(&mut rng);
        assert_eq!(cat.contention_window(), 15);
    }

    #[test]
    fn all_nacks_requires_zero_acks() {
        let (mut cat, mut rng) = cat4(Cat4Config {
            cw_update_rule: CwUpdateRule::AllNacks,
            ..Default::default()
        });

        cat.record_feedback(true);
        for _ in 0..5 {
            cat.record_feedback(false);
        }
        cat.draw_backoff_slots(&mut rng);
        // One ack present, so the opportunity did not fail.
        assert_eq!(cat.contention_window(), 15);

        cat.record_feedback(false);
        cat.draw_backoff_slots(&mut rng);
        assert_eq!(cat.contention_window(), 31);
    }

    #[test]
    fn percentage_rules_apply_their_thresholds() {
        let (mut cat, mut rng) = cat4(Cat4Config {
            cw_update_rule: CwUpdateRule::Nacks80Percent,
            ..Default::default()
        });
        for _ in 0..4 {
            cat.record_feedback(false);
        }
        cat.record_feedback(true);
        cat.draw_backoff_slots(&mut rng);
        assert_eq!(cat.contention_window(), 31, "80% negative meets the threshold");

        let (mut cat, mut rng) = cat4(Cat4Config {
            cw_update_rule: CwUpdateRule::Nacks10Percent,
            ..Default::default()
        });
        cat.record_feedback(false);
        for _ in 0..9 {
            cat.record_feedback(true);
        }
        cat.draw_backoff_slots(&mut rng);
        assert_eq!(cat.contention_window(), 31, "10% negative meets the threshold");

        let (mut cat, mut rng) = cat4(Cat4Config {
            cw_update_rule: CwUpdateRule::Nacks10Percent,
            ..Default::default()
        });
        cat.record_feedback(false);
        for _ in 0..19 {
            cat.record_feedback(true);
        }
        cat.draw_backoff_slots(&mut rng);
        assert_eq!(cat.contention_window(), 15, "5% negative stays below it");
    }

    #[test]
    fn retry_limit_delays_the_reset() {
        let (mut cat, mut rng) = cat4(Cat4Config {
            retry_limit: 2,
            ..Default::default()
        });

        cat.record_feedback(false);
        cat.draw_backoff_slots(&mut rng);
        assert_eq!(cat.contention_window(), 31);

        // Two successful evaluations ride out the hysteresis.
        for _ in 0..2 {
            cat.record_feedback(true);
            cat.draw_backoff_slots(&mut rng);
            assert_eq!(cat.contention_window(), 31);
        }

        // The third resets.
        cat.record_feedback(true);
        cat.draw_backoff_slots(&mut rng);
        assert_eq!(cat.contention_window(), 15);
    }

    #[test]
    fn growth_saturates_at_cw_max() {
        let (mut cat, mut rng) = cat4(Cat4Config {
            cw_min: 15,
            cw_max: 31,
            ..Default::default()
        });

        cat.record_feedback(false);
        cat.draw_backoff_slots(&mut rng);
        assert_eq!(cat.contention_window(), 31);

        cat.record_feedback(false);
        cat.draw_backoff_slots(&mut rng);
        assert_eq!(cat.contention_window(), 31);
    }

    #[test]
    fn invalid_window_bounds_are_rejected() {
        let err = Cat4::new(Cat4Config {
            cw_min: 64,
            cw_max: 63,
            ..Default::default()
        });
        assert_eq!(
            err.err(),
            Some(ConfigError::ContentionWindowBounds { min: 64, max: 63 })
        );
    }

    #[test]
    fn feedback_flows_from_the_mac_into_the_window() {
        let sched = Scheduler::new();
        let mut mgr = Cat4LbtAccessManager::new(
            sched.clone(),
            LbtConfig::default(),
            Cat4::new(Cat4Config::default()).unwrap(),
        )
        .unwrap();

        let mut phy = MockEnergySource::new();
        mgr.attach_energy_source(&mut phy);
        let mut mac = MockFeedbackSource::new();
        mgr.attach_feedback_source(&mut mac);

        let grants = Rc::new(RefCell::new(0u32));
        let g = grants.clone();
        mgr.set_access_granted_callback(Rc::new(move |d| {
            assert_eq!(d, Duration::from_millis(9));
            *g.borrow_mut() += 1;
        }));

        // A NACK arrives before the first draw; the evaluation at the next
        // draw grows the window.
        mac.feedback(false);
        mgr.request_access();

        assert_eq!(mgr.contention_window(), 31);

        sched.run();
        assert_eq!(*grants.borrow(), 1);
    }
}
