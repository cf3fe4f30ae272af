//! On/Off periodic access manager.
//!
//! Sensing-free alternative policy: the channel alternates between an "on"
//! interval, during which any pending request is granted the remainder of
//! the window, and an "off" interval, during which requests queue silently
//! until the next on-transition. Both intervals share one period length.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, trace};

use crate::access::config::OnOffConfig;
use crate::access::{AccessDeniedCallback, AccessGrantedCallback, ChannelAccessManager};
use crate::error::ConfigError;
use crate::sim::{Scheduler, TimerHandle};
use crate::time::Timestamp;

struct OnOffCore {
    sched: Scheduler,
    config: OnOffConfig,

    /// Channel currently in its on interval
    grant: bool,
    /// A request is waiting for the next on-transition
    call: bool,

    change_event: Option<TimerHandle>,
    /// Time of the next on/off transition
    change_state_time: Timestamp,

    granted_cbs: Vec<AccessGrantedCallback>,
}

impl OnOffCore {
    /// On-transition. Also invoked directly by a request arriving while
    /// already on, in which case the running off-transition timer is left
    /// alone and the grant covers the remaining on-time.
    fn start(this: &Rc<RefCell<Self>>) {
        let (cbs, remaining) = {
            let mut c = this.borrow_mut();
            let now = c.sched.now();
            c.grant = true;

            let change_pending = c.change_event.as_ref().map_or(false, |h| h.is_pending());
            if !change_pending {
                let change_time = c.config.change_time;
                let weak = Rc::downgrade(this);
                let handle = c.sched.schedule(change_time, move || {
                    if let Some(core) = weak.upgrade() {
                        Self::shut_down(&core);
                    }
                });
                c.change_event = Some(handle);
                c.change_state_time = now + change_time;
                debug!("on-off: ON, next off transition at {}", c.change_state_time);
            }

            let cbs = if c.call {
                c.granted_cbs.clone()
            } else {
                Vec::new()
            };
            c.call = false;
            (cbs, c.change_state_time - now)
        };
        for cb in cbs {
            cb(remaining);
        }
    }

    /// Off-transition.
    fn shut_down(this: &Rc<RefCell<Self>>) {
        let mut c = this.borrow_mut();
        c.grant = false;
        if let Some(handle) = c.change_event.take() {
            handle.cancel();
        }
        let change_time = c.config.change_time;
        let weak = Rc::downgrade(this);
        let handle = c.sched.schedule(change_time, move || {
            if let Some(core) = weak.upgrade() {
                Self::start(&core);
            }
        });
        c.change_event = Some(handle);
        c.change_state_time = c.sched.now() + change_time;
        debug!("on-off: OFF, next on transition at {}", c.change_state_time);
    }
}

/// Fixed duty-cycle channel access manager. Starts its first on interval at
/// simulation time zero.
pub struct OnOffAccessManager {
    core: Rc<RefCell<OnOffCore>>,
}

impl OnOffAccessManager {
    pub fn new(sched: Scheduler, config: OnOffConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let core = Rc::new(RefCell::new(OnOffCore {
            sched: sched.clone(),
            config,
            grant: false,
            call: false,
            change_event: None,
            change_state_time: Timestamp::ZERO,
            granted_cbs: Vec::new(),
        }));

        let weak = Rc::downgrade(&core);
        let handle = sched.schedule(crate::time::Duration::ZERO, move || {
            if let Some(c) = weak.upgrade() {
                OnOffCore::start(&c);
            }
        });
        core.borrow_mut().change_event = Some(handle);

        Ok(Self { core })
    }

    /// Channel currently in its on interval.
    pub fn is_on(&self) -> bool {
        self.core.borrow().grant
    }
}

impl ChannelAccessManager for OnOffAccessManager {
    fn request_access(&mut self) {
        let grant = {
            let mut c = self.core.borrow_mut();
            assert!(
                !c.call,
                "on-off: RequestAccess re-entered while a prior request is outstanding"
            );
            c.call = true;
            c.grant
        };
        if grant {
            OnOffCore::start(&self.core);
        } else {
            trace!("on-off: channel off, request queued until the next on transition");
        }
    }

    fn cancel(&mut self) {
        self.core.borrow_mut().call = false;
    }

    fn set_access_granted_callback(&mut self, cb: AccessGrantedCallback) {
        self.core.borrow_mut().granted_cbs.push(cb);
    }

    /// The on/off policy never denies: a queued request is granted at the
    /// next on-transition.
    fn set_access_denied_callback(&mut self, _cb: AccessDeniedCallback) {}
}

impl Drop for OnOffAccessManager {
    fn drop(&mut self) {
        if let Some(handle) = self.core.borrow_mut().change_event.take() {
            if handle.is_pending() {
                handle.cancel();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::time::Duration;

    struct Fixture {
        sched: Scheduler,
        mgr: OnOffAccessManager,
        grants: Rc<RefCell<Vec<(Timestamp, Duration)>>>,
    }

    fn fixture() -> Fixture {
        let sched = Scheduler::new();
        let mut mgr = OnOffAccessManager::new(sched.clone(), OnOffConfig::default()).unwrap();

        let grants = Rc::new(RefCell::new(Vec::new()));
        let g = grants.clone();
        let s = sched.clone();
        mgr.set_access_granted_callback(Rc::new(move |d| g.borrow_mut().push((s.now(), d))));

        Fixture { sched, mgr, grants }
    }

    #[test]
    fn request_during_on_grants_remaining_window() {
        let mut f = fixture();

        // First on interval runs from 0 to 9ms.
        f.sched.run_until(Timestamp::from_millis(3));
        assert!(f.mgr.is_on());
        f.mgr.request_access();

        assert_eq!(
            *f.grants.borrow(),
            vec![(Timestamp::from_millis(3), Duration::from_millis(6))]
        );
    }

    #[test]
    fn request_during_off_waits_for_the_on_edge() {
        let mut f = fixture();

        // 9ms..18ms is the first off interval.
        f.sched.run_until(Timestamp::from_millis(10));
        assert!(!f.mgr.is_on());
        f.mgr.request_access();
        assert!(f.grants.borrow().is_empty());

        f.sched.run_until(Timestamp::from_millis(20));

        // Granted at the 18ms on edge with the full window.
        assert_eq!(
            *f.grants.borrow(),
            vec![(Timestamp::from_millis(18), Duration::from_millis(9))]
        );
    }

    #[test]
    fn canceled_request_is_not_granted_at_the_on_edge() {
        let mut f = fixture();

        f.sched.run_until(Timestamp::from_millis(10));
        f.mgr.request_access();
        f.mgr.cancel();

        f.sched.run_until(Timestamp::from_millis(30));
        assert!(f.grants.borrow().is_empty());
    }

    #[test]
    fn duty_cycle_alternates_at_the_change_period() {
        let mut f = fixture();

        f.sched.run_until(Timestamp::from_millis(5));
        assert!(f.mgr.is_on());
        f.sched.run_until(Timestamp::from_millis(12));
        assert!(!f.mgr.is_on());
        f.sched.run_until(Timestamp::from_millis(21));
        assert!(f.mgr.is_on());

        // A request in the second on window sees its remainder.
        f.mgr.request_access();
        assert_eq!(
            *f.grants.borrow(),
            vec![(Timestamp::from_millis(21), Duration::from_millis(6))]
        );
    }

    #[test]
    #[should_panic(expected = "re-entered")]
    fn reentrant_request_is_fatal() {
        let mut f = fixture();

        f.sched.run_until(Timestamp::from_millis(10));
        f.mgr.request_access();
        f.mgr.request_access();
    }

    #[test]
    fn zero_change_time_is_rejected() {
        let sched = Scheduler::new();
        let cfg = OnOffConfig {
            change_time: Duration::ZERO,
        };
        assert!(OnOffAccessManager::new(sched, cfg).is_err());
    }
}
