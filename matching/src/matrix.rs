//! Exception handling matrix.
//!
//! Residual records are classified by the `(CBS, Switch, NPCI)` health
//! triple. CBS counts as successful when a record is present at all; Switch
//! requires RC `00`; NPCI accepts `00` and the exact deemed-accepted code
//! `RB` (an `RB`-prefixed code with a suffix is a decline).

use recon_core::types::{MatchException, TtumType};

/// Per-source health for the matrix lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceHealth {
    Success,
    Failed,
}

/// Action the matrix prescribes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixAction {
    Matched,
    RemitterRefund,
    BeneficiaryRecovery,
    SwitchUpdate,
    Unmatched,
}

/// Matrix row: action plus whether a TTUM instruction is required
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixEntry {
    pub action: MatrixAction,
    pub ttum_required: bool,
}

impl MatrixEntry {
    /// Exception kind and TTUM type the action carries onto the record
    pub fn exception(&self) -> Option<(MatchException, Option<TtumType>)> {
        match self.action {
            MatrixAction::Matched | MatrixAction::Unmatched => None,
            MatrixAction::RemitterRefund => {
                Some((MatchException::RemitterRefund, Some(TtumType::Reversal)))
            }
            MatrixAction::BeneficiaryRecovery => Some((
                MatchException::BeneficiaryRecovery,
                Some(TtumType::BeneficiaryCredit),
            )),
            MatrixAction::SwitchUpdate => Some((MatchException::SwitchUpdate, None)),
        }
    }
}

/// CBS is successful when it reported the transaction at all
pub fn cbs_health(present: bool) -> SourceHealth {
    if present {
        SourceHealth::Success
    } else {
        SourceHealth::Failed
    }
}

/// Switch success requires RC 00
pub fn switch_health(rc: Option<&str>) -> SourceHealth {
    match rc {
        Some("00") => SourceHealth::Success,
        _ => SourceHealth::Failed,
    }
}

/// NPCI success accepts 00 and the exact deemed-accepted code RB
pub fn npci_health(rc: Option<&str>) -> SourceHealth {
    match rc {
        Some("00") | Some("RB") => SourceHealth::Success,
        _ => SourceHealth::Failed,
    }
}

/// Resolve the matrix for a health triple
pub fn resolve(cbs: SourceHealth, switch: SourceHealth, npci: SourceHealth) -> MatrixEntry {
    use SourceHealth::{Failed as F, Success as S};
    let (action, ttum_required) = match (cbs, switch, npci) {
        (S, S, S) => (MatrixAction::Matched, false),
        (S, S, F) => (MatrixAction::RemitterRefund, true),
        (S, F, S) => (MatrixAction::SwitchUpdate, false),
        (S, F, F) => (MatrixAction::RemitterRefund, true),
        (F, S, S) => (MatrixAction::BeneficiaryRecovery, true),
        (F, S, F) => (MatrixAction::Unmatched, false),
        (F, F, S) => (MatrixAction::BeneficiaryRecovery, true),
        (F, F, F) => (MatrixAction::Unmatched, false),
    };
    MatrixEntry {
        action,
        ttum_required,
    }
}
