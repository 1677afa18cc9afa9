//! Ordered write strategies with fallthrough.

use crate::error::{Result, SyncError};
use std::fmt;
use tracing::{debug, warn};

/// Storage tier a chat write landed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Shared document visible to every participant.
    Shared,
    /// The acting user's private mailbox entry.
    Private,
    /// This client's local cache.
    Local,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Shared => "shared",
            Tier::Private => "private",
            Tier::Local => "local",
        })
    }
}

type Step<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

/// A list of write strategies tried in order until one succeeds.
///
/// Later steps only run if every earlier one failed. Each failure is
/// logged; only exhaustion of the whole chain is reported.
pub struct TierChain<'a> {
    label: &'a str,
    steps: Vec<(Tier, Step<'a>)>,
}

impl<'a> TierChain<'a> {
    pub fn new(label: &'a str) -> Self {
        Self {
            label,
            steps: Vec::new(),
        }
    }

    /// Append a strategy.
    pub fn then(mut self, tier: Tier, step: impl FnOnce() -> Result<()> + 'a) -> Self {
        self.steps.push((tier, Box::new(step)));
        self
    }

    /// Run the strategies in order, returning the tier that succeeded.
    pub fn run(self) -> Result<Tier> {
        let mut last_error = None;

        for (tier, step) in self.steps {
            match step() {
                Ok(()) => {
                    debug!(write = self.label, tier = %tier, "tier write succeeded");
                    return Ok(tier);
                }
                Err(e) => {
                    warn!(write = self.label, tier = %tier, error = %e, "tier write failed, falling through");
                    last_error = Some(e);
                }
            }
        }

        Err(SyncError::TiersExhausted(
            last_error.map_or_else(|| "no tiers configured".to_string(), |e| e.to_string()),
        ))
    }
}
