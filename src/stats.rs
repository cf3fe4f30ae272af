//! Access outcome counters.
//!
//! [`AccessStats`] hooks the grant and denial callbacks of any
//! [`ChannelAccessManager`] and accumulates totals over a run, for comparing
//! policies (or parameterizations of one policy) under the same offered load.

use std::cell::RefCell;
use std::rc::Rc;

use crate::access::ChannelAccessManager;
use crate::sim::Scheduler;
use crate::time::{Duration, Timestamp};

#[derive(Debug, Default)]
struct Counters {
    grants: u64,
    denials: u64,
    granted_time: Duration,
    last_grant_at: Option<Timestamp>,
}

/// Shared counter set. Cloning observes the same counters, so one instance
/// can aggregate across several managers.
#[derive(Clone)]
pub struct AccessStats {
    sched: Scheduler,
    inner: Rc<RefCell<Counters>>,
}

impl AccessStats {
    pub fn new(sched: Scheduler) -> Self {
        Self {
            sched,
            inner: Rc::new(RefCell::new(Counters::default())),
        }
    }

    /// Register on both outcome callbacks of `manager`. Existing callbacks
    /// are kept; managers invoke every registered callback per outcome.
    pub fn observe(&self, manager: &mut dyn ChannelAccessManager) {
        let inner = self.inner.clone();
        let sched = self.sched.clone();
        manager.set_access_granted_callback(Rc::new(move |mcot| {
            let mut c = inner.borrow_mut();
            c.grants += 1;
            c.granted_time = c.granted_time + mcot;
            c.last_grant_at = Some(sched.now());
        }));

        let inner = self.inner.clone();
        manager.set_access_denied_callback(Rc::new(move || {
            inner.borrow_mut().denials += 1;
        }));
    }

    pub fn grants(&self) -> u64 {
        self.inner.borrow().grants
    }

    pub fn denials(&self) -> u64 {
        self.inner.borrow().denials
    }

    /// Sum of granted transmit opportunity durations.
    pub fn granted_time(&self) -> Duration {
        self.inner.borrow().granted_time
    }

    pub fn last_grant_at(&self) -> Option<Timestamp> {
        self.inner.borrow().last_grant_at
    }

    /// Fraction of elapsed virtual time covered by granted opportunities.
    /// Zero before the simulation clock has advanced.
    pub fn occupancy(&self) -> f64 {
        let now = self.sched.now().as_nanos();
        if now == 0 {
            return 0.0;
        }
        self.inner.borrow().granted_time.as_nanos() as f64 / now as f64
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::access::cat2::{Cat2, Cat2LbtAccessManager};
    use crate::access::config::LbtConfig;
    use crate::access::mock::MockEnergySource;

    #[test]
    fn counts_grants_and_denials() {
        let sched = Scheduler::new();
        let stats = AccessStats::new(sched.clone());

        let mut phy = MockEnergySource::new();
        let mut mgr =
            Cat2LbtAccessManager::new(sched.clone(), LbtConfig::cat2_profile(), Cat2).unwrap();
        mgr.attach_energy_source(&mut phy);
        stats.observe(&mut mgr);

        // Long-idle channel, synchronous grant.
        sched.run_until(Timestamp::from_micros(100));
        mgr.request_access();

        // Busy channel, synchronous denial.
        phy.report_busy(Duration::from_micros(50));
        mgr.request_access();

        assert_eq!(stats.grants(), 1);
        assert_eq!(stats.denials(), 1);
        assert_eq!(stats.granted_time(), Duration::from_millis(9));
        assert_eq!(stats.last_grant_at(), Some(Timestamp::from_micros(100)));
    }

    #[test]
    fn occupancy_is_granted_time_over_elapsed_time() {
        let sched = Scheduler::new();
        let stats = AccessStats::new(sched.clone());
        assert_eq!(stats.occupancy(), 0.0);

        let mut phy = MockEnergySource::new();
        let mut mgr =
            Cat2LbtAccessManager::new(sched.clone(), LbtConfig::cat2_profile(), Cat2).unwrap();
        mgr.attach_energy_source(&mut phy);
        stats.observe(&mut mgr);

        // Request at t=0 defers 25us, then is granted 9ms.
        mgr.request_access();
        sched.run_until(Timestamp::from_millis(18));

        // One 9ms grant over 18ms of virtual time.
        assert!((stats.occupancy() - 0.5).abs() < 1e-9);
    }
}
