//! The three UPI matching configurations, tried strictly in order.
//!
//! A round is skipped when the NPCI dataset carries none of its required
//! fields; once a round matches any transaction the remaining rounds are
//! not attempted.

use recon_core::types::MatchException;

/// Key a matching round compares on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKey {
    UpiTranId,
    Rrn,
    TranDate,
    Amount,
}

/// One matching configuration
#[derive(Debug, Clone, Copy)]
pub struct MatchRound {
    pub name: &'static str,
    pub exception: MatchException,
    pub keys: &'static [MatchKey],
    pub required: &'static [MatchKey],
}

/// Ordered configurations: best match, then the two relaxations
pub const MATCH_ROUNDS: [MatchRound; 3] = [
    MatchRound {
        name: "best_match",
        exception: MatchException::BestMatch,
        keys: &[
            MatchKey::UpiTranId,
            MatchKey::Rrn,
            MatchKey::TranDate,
            MatchKey::Amount,
        ],
        required: &[MatchKey::UpiTranId, MatchKey::Rrn],
    },
    MatchRound {
        name: "relaxed_match_i",
        exception: MatchException::RelaxedMatchI,
        keys: &[MatchKey::UpiTranId, MatchKey::TranDate, MatchKey::Amount],
        required: &[MatchKey::UpiTranId],
    },
    MatchRound {
        name: "relaxed_match_ii",
        exception: MatchException::RelaxedMatchIi,
        keys: &[MatchKey::Rrn, MatchKey::TranDate, MatchKey::Amount],
        required: &[MatchKey::Rrn],
    },
];
