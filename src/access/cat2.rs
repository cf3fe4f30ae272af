//! Category 2 LBT: deterministic defer, no random backoff.
//!
//! The LBT procedure runs for a fixed sensing interval (e.g. 25 us). The
//! defer window must pass uninterrupted: a busy channel at request time or
//! during the defer denies the request outright instead of queuing it.

use rand::rngs::SmallRng;

use crate::access::lbt::{LbtAccessManager, LbtCategory};

/// Category 2 policy: no backoff state is ever entered.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cat2;

impl LbtCategory for Cat2 {
    const NAME: &'static str = "cat2-lbt";
    const DEFER_ONLY: bool = true;

    fn draw_backoff_slots(&mut self, _rng: &mut SmallRng) -> u32 {
        unreachable!("cat2-lbt never draws backoff slots");
    }
}

pub type Cat2LbtAccessManager = LbtAccessManager<Cat2>;
