use serde::{Deserialize, Serialize};
use std::fmt;

/// The four eventually-consistent aggregates kept next to the queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Queued jobs per team.
    TeamQueue,
    /// Queued jobs per crawl.
    CrawlQueue,
    /// Active job markers per team.
    TeamActive,
    /// Active job markers per crawl.
    CrawlActive,
}

impl CounterKind {
    pub const ALL: [CounterKind; 4] = [
        CounterKind::TeamQueue,
        CounterKind::CrawlQueue,
        CounterKind::TeamActive,
        CounterKind::CrawlActive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKind::TeamQueue => "team_queue",
            CounterKind::CrawlQueue => "crawl_queue",
            CounterKind::TeamActive => "team_active",
            CounterKind::CrawlActive => "crawl_active",
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
