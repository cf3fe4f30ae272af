//! Listen-Before-Talk channel access simulation.
//!
//! Models the channel access procedures an unlicensed-spectrum node runs
//! before transmitting, per 3GPP TR 38.889 / ETSI BRAN:
//!
//! - Category 2: fixed 25us sensing interval, no backoff, busy denies.
//! - Category 3: defer plus random backoff from a fixed contention window.
//! - Category 4: defer plus random backoff from a contention window adapted
//!   by HARQ feedback.
//! - On/Off: a sensing-free duty cycle, for coexistence baselines.
//!
//! Everything runs on a single-threaded discrete-event scheduler
//! ([`sim::Scheduler`]) with virtual time ([`time::Timestamp`]), so runs
//! are deterministic and seedable.

pub mod time;

pub mod sim;

pub mod error;

pub mod access;

pub mod stats;

pub mod prelude;
