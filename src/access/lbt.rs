//! Generic Listen-Before-Talk channel access state machine.
//!
//! Implements the shared LBT contention algorithm of 3GPP TR 38.889 V1.0.0
//! (2018-11), Section 8.2 / ETSI BRAN: sense the channel through energy
//! detection, defer while it is busy, optionally count down a random
//! backoff, then grant a transmit opportunity of at most `mcot`.
//!
//! The category-specific parts (whether a backoff is drawn and from which
//! contention window, and how a busy channel during defer is treated) are
//! factored into the [`LbtCategory`] policy; the transition table lives
//! here once. Only Cat-2 (`DEFER_ONLY`) differs structurally from the
//! shared table.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::{debug, trace};

use rand::rngs::SmallRng;
use rand_core::{RngCore, SeedableRng};
use strum::Display;

use crate::access::config::LbtConfig;
use crate::access::{
    AccessDeniedCallback, AccessGrantedCallback, ChannelAccessManager, EnergySource,
};
use crate::error::ConfigError;
use crate::sim::{Scheduler, TimerHandle};
use crate::time::{Duration, Timestamp};

/// LBT channel access states. Exactly one holds at any virtual-time
/// instant per manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LbtState {
    Idle,
    Busy,
    WaitForDefer,
    WaitForBackoff,
    TxopGranted,
}

/// Category policy plugged into the shared LBT engine.
pub trait LbtCategory: 'static {
    /// Category name used in logs and fatal diagnostics.
    const NAME: &'static str;

    /// Deterministic-defer-only categories (Cat-2) never enter backoff and
    /// deny requests that collide with a busy channel.
    const DEFER_ONLY: bool = false;

    /// Draw a fresh backoff counter upon entry to the access granting
    /// process. Never called when `DEFER_ONLY`.
    fn draw_backoff_slots(&mut self, rng: &mut SmallRng) -> u32;

    /// Downlink HARQ feedback, used by adaptive categories (Cat-4).
    fn record_feedback(&mut self, _received_ok: bool) {}
}

/// Uniform draw over the closed range `[0, cw]`.
pub(crate) fn draw_uniform(rng: &mut SmallRng, cw: u32) -> u32 {
    (rng.next_u64() % (cw as u64 + 1)) as u32
}

pub(crate) struct LbtCore<C: LbtCategory> {
    sched: Scheduler,
    config: LbtConfig,
    pub(crate) category: C,
    rng: SmallRng,

    state: LbtState,
    grant_requested: bool,
    backoff_count: u32,
    backoff_start_time: Timestamp,
    /// Latest virtual time until which the channel is known busy; may lie
    /// in the future.
    last_busy_time: Timestamp,
    last_txop_start_time: Option<Timestamp>,
    grant_duration: Duration,

    defer_timer: Option<TimerHandle>,
    backoff_timer: Option<TimerHandle>,
    busy_timer: Option<TimerHandle>,

    granted_cbs: Vec<AccessGrantedCallback>,
    denied_cbs: Vec<AccessDeniedCallback>,
    energy_attached: bool,
}

fn cancel_if_pending(slot: &mut Option<TimerHandle>) {
    if let Some(handle) = slot.take() {
        if handle.is_pending() {
            handle.cancel();
        }
    }
}

/// Outcome of a state-machine step that must be delivered after internal
/// borrows are released, so listeners are free to call back in.
enum Notify {
    None,
    Granted,
    Denied,
    GoBusy(Duration),
}

impl<C: LbtCategory> LbtCore<C> {
    /// Entry point for access requests, following the ETSI BRAN flowchart:
    /// idempotent while pending, synchronous grant when the channel has
    /// been idle for at least the defer time, otherwise enter the
    /// defer/backoff protocol.
    fn request_access(this: &Rc<RefCell<Self>>) {
        let notify = {
            let mut c = this.borrow_mut();
            assert!(
                c.energy_attached,
                "{}: RequestAccess without an attached energy source",
                C::NAME
            );

            if c.grant_requested {
                trace!("{}: already waiting to grant access; ignoring request", C::NAME);
                return;
            }

            let now = c.sched.now();
            if now.saturating_since(c.last_busy_time) >= c.config.defer {
                debug!(
                    "{}: channel free for more than the defer time, granting immediately",
                    C::NAME
                );
                Notify::Granted
            } else {
                c.grant_requested = true;

                if !C::DEFER_ONLY {
                    let slots = {
                        let Self { category, rng, .. } = &mut *c;
                        category.draw_backoff_slots(rng)
                    };
                    c.backoff_count = slots;
                    debug!("{}: new backoff counter: {}", C::NAME, slots);
                }

                if c.state == LbtState::Idle {
                    let remaining = c.config.defer - now.saturating_since(c.last_busy_time);
                    trace!("{}: must wait {} of defer period", C::NAME, remaining);
                    Self::schedule_defer(this, &mut c, remaining);
                    Notify::None
                } else if C::DEFER_ONLY {
                    // Cat-2 tolerates zero interruption: a request against a
                    // non-idle channel fails outright.
                    debug!("{}: channel busy, denying request", C::NAME);
                    Notify::Denied
                } else if c.last_busy_time > now {
                    // Request has come in while the channel is already busy;
                    // re-derive the busy transition for the remaining time.
                    Notify::GoBusy(c.last_busy_time - now)
                } else {
                    // Busy period ends at this very instant; the pending
                    // busy-completion event will pick the request up.
                    trace!("{}: busy period expiring now, request queued", C::NAME);
                    Notify::None
                }
            }
        };
        Self::dispatch(this, notify);
    }

    /// Channel-busy edge, keyed on the current state. This is the
    /// "interrupted backoff is decremented, not reset" rule that the
    /// fair-access guarantee rests on.
    fn transition_to_busy(this: &Rc<RefCell<Self>>, duration: Duration) {
        let notify = {
            let mut c = this.borrow_mut();
            let now = c.sched.now();
            let mut notify = Notify::None;

            match c.state {
                LbtState::Idle => {
                    assert!(
                        c.backoff_count == 0,
                        "{}: idle but backoff count is {}",
                        C::NAME,
                        c.backoff_count
                    );
                    c.last_busy_time = now + duration;
                    Self::schedule_busy(this, &mut c, duration);
                }
                LbtState::TxopGranted => {
                    // Sensed energy silently supersedes the grant.
                    c.last_busy_time = now + duration;
                    Self::schedule_busy(this, &mut c, duration);
                }
                LbtState::Busy => {
                    if c.last_busy_time < now + duration {
                        c.last_busy_time = now + duration;
                        debug!("{}: busy time extended until {}", C::NAME, c.last_busy_time);
                    }
                    // A request may have come in after the busy timer lapsed.
                    let busy_running =
                        c.busy_timer.as_ref().map_or(false, |h| h.is_pending());
                    if !busy_running && c.grant_requested {
                        let remaining = c.last_busy_time - now;
                        Self::schedule_busy(this, &mut c, remaining);
                    }
                }
                LbtState::WaitForDefer => {
                    cancel_if_pending(&mut c.defer_timer);
                    if C::DEFER_ONLY {
                        // The deterministic defer was interrupted; the
                        // pending request fails, but the busy bookkeeping
                        // below still returns the machine to idle later.
                        debug!("{}: defer interrupted, denying request", C::NAME);
                        notify = Notify::Denied;
                    } else {
                        debug!("{}: defer interrupted", C::NAME);
                    }
                    c.last_busy_time = now + duration;
                    Self::schedule_busy(this, &mut c, duration);
                }
                LbtState::WaitForBackoff => {
                    if C::DEFER_ONLY {
                        panic!("{}: must never enter the backoff state", C::NAME);
                    }
                    cancel_if_pending(&mut c.backoff_timer);
                    let elapsed = now - c.backoff_start_time;
                    assert!(
                        elapsed < c.config.slot * c.backoff_count,
                        "{}: busy report after the backoff window elapsed",
                        C::NAME
                    );
                    // One decrement per full or partial slot spent waiting.
                    let consumed = elapsed.slots_covered(c.config.slot) as u32;
                    c.backoff_count -= consumed;
                    c.last_busy_time = now + duration;
                    Self::schedule_busy(this, &mut c, duration);
                    debug!(
                        "{}: backoff suspended with {} slots left, busy until {}",
                        C::NAME,
                        c.backoff_count,
                        c.last_busy_time
                    );
                }
            }
            c.state = LbtState::Busy;
            notify
        };
        Self::dispatch(this, notify);
    }

    /// Busy-completion timer elapsed. A newer busy report may have extended
    /// the busy period without rescheduling this timer; in that case wait
    /// out the remainder.
    fn transition_from_busy(this: &Rc<RefCell<Self>>) {
        let mut c = this.borrow_mut();
        let now = c.sched.now();
        if c.last_busy_time > now {
            let remaining = c.last_busy_time - now;
            trace!("{}: must wait additional {} of busy period", C::NAME, remaining);
            Self::schedule_busy(this, &mut c, remaining);
            c.state = LbtState::Busy;
        } else if c.grant_requested {
            let defer = c.config.defer;
            Self::schedule_defer(this, &mut c, defer);
        } else {
            c.state = LbtState::Idle;
        }
    }

    /// Defer timer elapsed uninterrupted.
    fn request_access_after_defer(this: &Rc<RefCell<Self>>) {
        let notify = {
            let mut c = this.borrow_mut();
            if c.state == LbtState::WaitForDefer {
                if c.backoff_count == 0 {
                    debug!("{}: defer succeeded, backoff count already zero", C::NAME);
                    Notify::Granted
                } else {
                    debug!(
                        "{}: defer succeeded, counting down {} backoff slots",
                        C::NAME,
                        c.backoff_count
                    );
                    c.backoff_start_time = c.sched.now();
                    let window = c.config.slot * c.backoff_count;
                    Self::schedule_backoff(this, &mut c, window);
                    c.state = LbtState::WaitForBackoff;
                    Notify::None
                }
            } else if C::DEFER_ONLY {
                panic!(
                    "{}: defer completion fired in state {}; an interrupted deterministic \
                     defer is never resumed",
                    C::NAME,
                    c.state
                );
            } else {
                // Lenient base behaviour: re-enter a full defer wait.
                debug!("{}: was not deferring, rescheduling defer", C::NAME);
                let defer = c.config.defer;
                Self::schedule_defer(this, &mut c, defer);
                Notify::None
            }
        };
        Self::dispatch(this, notify);
    }

    /// Backoff timer elapsed uninterrupted while still counting down.
    fn request_access_after_backoff(this: &Rc<RefCell<Self>>) {
        {
            let mut c = this.borrow_mut();
            if c.state != LbtState::WaitForBackoff {
                panic!(
                    "{}: backoff completion fired in state {}",
                    C::NAME,
                    c.state
                );
            }
            c.backoff_count = 0;
        }
        Self::set_grant(this);
    }

    /// Grant a transmit opportunity of `mcot` and notify every listener.
    fn set_grant(this: &Rc<RefCell<Self>>) {
        let (cbs, mcot) = {
            let mut c = this.borrow_mut();
            let now = c.sched.now();
            c.grant_duration = c.config.mcot;
            c.state = LbtState::TxopGranted;
            c.grant_requested = false;
            c.last_txop_start_time = Some(now);
            debug!("{}: granting access at {} for {}", C::NAME, now, c.config.mcot);
            (c.granted_cbs.clone(), c.config.mcot)
        };
        for cb in cbs {
            cb(mcot);
        }
    }

    /// Deny the pending request (Cat-2 outcome, not an error).
    fn notify_access_denied(this: &Rc<RefCell<Self>>) {
        let cbs = {
            let mut c = this.borrow_mut();
            c.grant_requested = false;
            c.denied_cbs.clone()
        };
        for cb in cbs {
            cb();
        }
    }

    fn dispatch(this: &Rc<RefCell<Self>>, notify: Notify) {
        match notify {
            Notify::None => {}
            Notify::Granted => Self::set_grant(this),
            Notify::Denied => Self::notify_access_denied(this),
            Notify::GoBusy(remaining) => Self::transition_to_busy(this, remaining),
        }
    }

    fn schedule_defer(this: &Rc<RefCell<Self>>, c: &mut Self, delay: Duration) {
        let weak = Rc::downgrade(this);
        let handle = c.sched.schedule(delay, move || {
            if let Some(core) = weak.upgrade() {
                Self::request_access_after_defer(&core);
            }
        });
        c.defer_timer = Some(handle);
        c.state = LbtState::WaitForDefer;
    }

    fn schedule_backoff(this: &Rc<RefCell<Self>>, c: &mut Self, delay: Duration) {
        let weak = Rc::downgrade(this);
        let handle = c.sched.schedule(delay, move || {
            if let Some(core) = weak.upgrade() {
                Self::request_access_after_backoff(&core);
            }
        });
        c.backoff_timer = Some(handle);
    }

    fn schedule_busy(this: &Rc<RefCell<Self>>, c: &mut Self, delay: Duration) {
        let weak = Rc::downgrade(this);
        let handle = c.sched.schedule(delay, move || {
            if let Some(core) = weak.upgrade() {
                Self::transition_from_busy(&core);
            }
        });
        c.busy_timer = Some(handle);
    }
}

/// Listen-Before-Talk channel access manager, generic over the category
/// policy `C`.
///
/// One instance is attached 1:1 to a PHY/MAC pair: attach the energy
/// sensing PHY with [`attach_energy_source`](Self::attach_energy_source),
/// register granted/denied listeners, then drive it with
/// [`request_access`](ChannelAccessManager::request_access). All timers the
/// manager schedules are canceled when it is dropped.
pub struct LbtAccessManager<C: LbtCategory> {
    pub(crate) core: Rc<RefCell<LbtCore<C>>>,
}

impl<C: LbtCategory> LbtAccessManager<C> {
    pub fn new(sched: Scheduler, config: LbtConfig, category: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            core: Rc::new(RefCell::new(LbtCore {
                sched,
                config,
                category,
                rng: SmallRng::seed_from_u64(0),
                state: LbtState::Idle,
                grant_requested: false,
                backoff_count: 0,
                backoff_start_time: Timestamp::ZERO,
                last_busy_time: Timestamp::ZERO,
                last_txop_start_time: None,
                grant_duration: Duration::ZERO,
                defer_timer: None,
                backoff_timer: None,
                busy_timer: None,
                granted_cbs: Vec::new(),
                denied_cbs: Vec::new(),
                energy_attached: false,
            })),
        })
    }

    /// Seed the backoff random stream for reproducible runs. Returns the
    /// number of streams consumed.
    pub fn assign_streams(&mut self, stream: u64) -> i64 {
        self.core.borrow_mut().rng = SmallRng::seed_from_u64(stream);
        1
    }

    /// Wire this manager to an energy sensing PHY: pushes the ED threshold
    /// down and subscribes to channel-busy reports.
    pub fn attach_energy_source(&mut self, phy: &mut dyn EnergySource) {
        {
            let mut c = self.core.borrow_mut();
            phy.set_ed_threshold(c.config.ed_threshold_dbm);
            c.energy_attached = true;
        }
        let weak = Rc::downgrade(&self.core);
        phy.set_busy_callback(Rc::new(move |duration| {
            if let Some(core) = weak.upgrade() {
                LbtCore::transition_to_busy(&core, duration);
            }
        }));
    }

    pub fn state(&self) -> LbtState {
        self.core.borrow().state
    }

    /// Remaining backoff slots.
    pub fn current_backoff_count(&self) -> u32 {
        self.core.borrow().backoff_count
    }

    pub fn last_txop_start_time(&self) -> Option<Timestamp> {
        self.core.borrow().last_txop_start_time
    }

    /// Transmit opportunity duration of the most recent grant.
    pub fn grant_duration(&self) -> Duration {
        self.core.borrow().grant_duration
    }
}

impl<C: LbtCategory> ChannelAccessManager for LbtAccessManager<C> {
    fn request_access(&mut self) {
        LbtCore::request_access(&self.core);
    }

    /// Withdraw the pending request. In-flight defer/backoff timers are
    /// deliberately left running: a request may still mature into a grant
    /// that the consumer must then ignore. This preserves the lazy
    /// cancellation of the reference flowchart.
    fn cancel(&mut self) {
        trace!("{}: request canceled", C::NAME);
        self.core.borrow_mut().grant_requested = false;
    }

    fn set_access_granted_callback(&mut self, cb: AccessGrantedCallback) {
        self.core.borrow_mut().granted_cbs.push(cb);
    }

    fn set_access_denied_callback(&mut self, cb: AccessDeniedCallback) {
        self.core.borrow_mut().denied_cbs.push(cb);
    }
}

impl<C: LbtCategory> Drop for LbtAccessManager<C> {
    fn drop(&mut self) {
        // Outstanding timers must not outlive the manager.
        let mut c = self.core.borrow_mut();
        cancel_if_pending(&mut c.defer_timer);
        cancel_if_pending(&mut c.backoff_timer);
        cancel_if_pending(&mut c.busy_timer);
    }
}
