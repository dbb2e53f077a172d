//! Public-records harvesters.

pub mod cia;
pub mod fbi_vault;
pub mod fred;
pub mod state_dept;

use serde::Serialize;

/// Counts reported by a fetch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeSummary {
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ScrapeSummary {
    pub fn total(&self) -> usize {
        self.saved + self.skipped + self.failed
    }
}
