//! Category 3 LBT: random backoff over a fixed contention window.

use rand::rngs::SmallRng;

use crate::access::lbt::{draw_uniform, LbtAccessManager, LbtCategory};

/// Category 3 policy: backoff drawn uniformly from `[0, contention_window]`,
/// no adaptation.
#[derive(Debug, Clone, Copy)]
pub struct Cat3 {
    contention_window: u32,
}

impl Cat3 {
    pub fn new(contention_window: u32) -> Self {
        Self { contention_window }
    }

    pub fn contention_window(&self) -> u32 {
        self.contention_window
    }
}

impl Default for Cat3 {
    fn default() -> Self {
        Self::new(15)
    }
}

impl LbtCategory for Cat3 {
    const NAME: &'static str = "cat3-lbt";

    fn draw_backoff_slots(&mut self, rng: &mut SmallRng) -> u32 {
        draw_uniform(rng, self.contention_window)
    }
}

pub type Cat3LbtAccessManager = LbtAccessManager<Cat3>;

impl Cat3LbtAccessManager {
    /// Configured (fixed) contention window.
    pub fn contention_window(&self) -> u32 {
        self.core.borrow().category.contention_window()
    }
}
