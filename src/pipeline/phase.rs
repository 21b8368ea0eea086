//! Pipeline phase identifiers and ordering.
//!
//! Phases form a closed, strictly ordered set. The runner advances
//! through `ORDER` one phase at a time; `Failed` is a terminal branch
//! reachable from any phase on fatal error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One phase of the verification pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Init,
    Decompose,
    ContractsRegister,
    BuildersRun,
    Integrate,
    QualityGate,
    FixPass,
    Complete,
    Failed,
}

impl Phase {
    /// The canonical phase order. `Failed` is not part of the sequence.
    pub const ORDER: [Phase; 8] = [
        Phase::Init,
        Phase::Decompose,
        Phase::ContractsRegister,
        Phase::BuildersRun,
        Phase::Integrate,
        Phase::QualityGate,
        Phase::FixPass,
        Phase::Complete,
    ];

    /// The phase following this one in the canonical order.
    ///
    /// Terminal phases return themselves.
    pub fn next(&self) -> Phase {
        match self {
            Phase::Init => Phase::Decompose,
            Phase::Decompose => Phase::ContractsRegister,
            Phase::ContractsRegister => Phase::BuildersRun,
            Phase::BuildersRun => Phase::Integrate,
            Phase::Integrate => Phase::QualityGate,
            Phase::QualityGate => Phase::FixPass,
            Phase::FixPass => Phase::Complete,
            Phase::Complete => Phase::Complete,
            Phase::Failed => Phase::Failed,
        }
    }

    /// Check whether this phase ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }

    /// Stable snake_case name, used for cost buckets and timeouts.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Decompose => "decompose",
            Phase::ContractsRegister => "contracts_register",
            Phase::BuildersRun => "builders_run",
            Phase::Integrate => "integrate",
            Phase::QualityGate => "quality_gate",
            Phase::FixPass => "fix_pass",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        }
    }

    /// Position in the canonical order, if the phase participates in it.
    pub fn position(&self) -> Option<usize> {
        Self::ORDER.iter().position(|p| p == self)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
