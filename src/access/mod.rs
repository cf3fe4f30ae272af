//! Channel access managers for unlicensed spectrum coexistence.
//!
//! Contains the channel access manager contract, the collaborator seams the
//! managers are wired to (energy sensing PHY, HARQ feedback from the MAC),
//! and the manager implementations: the generic LBT state machine with its
//! category 2/3/4 policies, and the sensing-free on/off duty-cycle manager.

pub mod config;

pub mod lbt;

pub mod cat2;
pub mod cat3;
pub mod cat4;

pub mod onoff;

use std::rc::Rc;

use crate::time::Duration;

/// Listener invoked when channel access is granted, carrying the transmit
/// opportunity duration.
pub type AccessGrantedCallback = Rc<dyn Fn(Duration)>;

/// Listener invoked when a request is denied (Cat-2 only). Denial carries
/// no duration.
pub type AccessDeniedCallback = Rc<dyn Fn()>;

/// Channel-busy report from an energy source: busy for `duration` starting
/// now.
pub type BusyCallback = Rc<dyn Fn(Duration)>;

/// Downlink HARQ feedback: `true` for a transport block received ok.
pub type FeedbackCallback = Rc<dyn Fn(bool)>;

/// Contract shared by all channel access managers.
///
/// A MAC layer calls [`request_access`](ChannelAccessManager::request_access)
/// when it has data to send; the manager eventually invokes the granted
/// callbacks with a transmit opportunity duration, or (Cat-2 only) the
/// denied callbacks.
pub trait ChannelAccessManager {
    /// Request channel access. Idempotent while a request is pending.
    fn request_access(&mut self);

    /// Withdraw a pending request.
    fn cancel(&mut self);

    /// Register a listener for granted access. Multiple listeners are
    /// notified in registration order.
    fn set_access_granted_callback(&mut self, cb: AccessGrantedCallback);

    /// Register a listener for denied access.
    fn set_access_denied_callback(&mut self, cb: AccessDeniedCallback);
}

/// Energy-sensing collaborator (spectrum PHY) seam.
///
/// A manager attaching itself pushes its energy detection threshold down to
/// the PHY and subscribes to channel-busy reports, which the PHY must emit
/// whenever aggregate received energy exceeds the threshold, in any manager
/// state.
pub trait EnergySource {
    fn set_ed_threshold(&mut self, threshold_dbm: f64);

    fn set_busy_callback(&mut self, cb: BusyCallback);
}

/// Downlink HARQ feedback collaborator (MAC) seam, used by Cat-4 to adapt
/// its contention window.
pub trait FeedbackSource {
    fn set_feedback_callback(&mut self, cb: FeedbackCallback);
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    //! Mock collaborators to assist with testing.

    use super::*;

    /// Mock spectrum PHY. Tests drive the manager by injecting busy
    /// reports at chosen virtual times.
    pub struct MockEnergySource {
        threshold_dbm: Option<f64>,
        busy_cb: Option<BusyCallback>,
    }

    impl MockEnergySource {
        pub fn new() -> Self {
            Self {
                threshold_dbm: None,
                busy_cb: None,
            }
        }

        /// Threshold pushed down by the attached manager, if any.
        pub fn threshold_dbm(&self) -> Option<f64> {
            self.threshold_dbm
        }

        /// Report the channel busy for `duration` starting now.
        pub fn report_busy(&self, duration: Duration) {
            match &self.busy_cb {
                Some(cb) => cb(duration),
                None => panic!("MockEnergySource: no manager attached"),
            }
        }
    }

    impl EnergySource for MockEnergySource {
        fn set_ed_threshold(&mut self, threshold_dbm: f64) {
            self.threshold_dbm = Some(threshold_dbm);
        }

        fn set_busy_callback(&mut self, cb: BusyCallback) {
            self.busy_cb = Some(cb);
        }
    }

    /// Mock MAC/HARQ feedback stream.
    pub struct MockFeedbackSource {
        feedback_cb: Option<FeedbackCallback>,
    }

    impl MockFeedbackSource {
        pub fn new() -> Self {
            Self { feedback_cb: None }
        }

        /// Emit one downlink transport block outcome.
        pub fn feedback(&self, received_ok: bool) {
            match &self.feedback_cb {
                Some(cb) => cb(received_ok),
                None => panic!("MockFeedbackSource: no manager attached"),
            }
        }
    }

    impl FeedbackSource for MockFeedbackSource {
        fn set_feedback_callback(&mut self, cb: FeedbackCallback) {
            self.feedback_cb = Some(cb);
        }
    }
}
