use std::num::NonZero;

use serde::{Deserialize, Serialize};

/// Defines how many tasks of one run may be in flight at the same time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Limit {
    /// There is no limit; every task of the run is started at once.
    #[default]
    None,

    /// There is an upper limit.
    Max(NonZero<usize>),

    /// Use a heuristic to determine the limit.
    Default,
}

impl From<usize> for Limit {
    fn from(value: usize) -> Self {
        NonZero::new(value).map(Limit::Max).unwrap_or(Limit::None)
    }
}

impl Limit {
    /// Resolves the limit for a run of `total` tasks.
    ///
    /// The result never exceeds `total` and is at least 1 for a non-empty run.
    pub fn resolve(self, total: usize) -> usize {
        let max = match self {
            Limit::None => total,
            Limit::Max(max) => max.get(),
            Limit::Default => std::thread::available_parallelism()
                .map(NonZero::get)
                .unwrap_or(1),
        };
        max.min(total)
    }
}
