//! Crate prelude

pub use crate::time::{Duration, Timestamp};

pub use crate::sim::{Scheduler, TimerHandle};

pub use crate::error::ConfigError;

pub use crate::access::{
    AccessDeniedCallback, AccessGrantedCallback, BusyCallback, ChannelAccessManager,
    EnergySource, FeedbackCallback, FeedbackSource,
};

pub use crate::access::config::{LbtConfig, OnOffConfig};

pub use crate::access::lbt::{LbtAccessManager, LbtCategory, LbtState};

pub use crate::access::cat2::{Cat2, Cat2LbtAccessManager};
pub use crate::access::cat3::{Cat3, Cat3LbtAccessManager};
pub use crate::access::cat4::{Cat4, Cat4Config, Cat4LbtAccessManager, CwUpdateRule};

pub use crate::access::onoff::OnOffAccessManager;

pub use crate::stats::AccessStats;
