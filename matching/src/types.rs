//! Internal working state of the matching passes

use recon_core::types::{MatchException, TxnRecord, TtumType};

/// Hanging reasons surfaced on reconciliation records
pub mod hanging_reason {
    pub const CUT_OFF_TRANSACTION: &str = "cut_off_transaction";
    pub const CUT_OFF_TIME: &str = "cut_off_time";
    pub const DECLINED_THEN_REVERSED: &str = "declined_then_reversed_next_cycle";
}

/// Terminal outcome a pass assigns to one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Matched,
    Unmatched,
    Hanging,
    Duplicate,
}

/// Mutable per-row classification state
#[derive(Debug, Clone, Default)]
pub struct RowState {
    pub processed: bool,
    pub outcome: Option<RowOutcome>,
    pub exception: Option<MatchException>,
    pub ttum_required: bool,
    pub ttum_type: Option<TtumType>,
    pub match_config: Option<&'static str>,
    pub hanging_reason: Option<&'static str>,
}

/// One transaction row plus its classification state
#[derive(Debug, Clone)]
pub struct Flagged {
    pub txn: TxnRecord,
    pub state: RowState,
}

impl Flagged {
    pub fn new(txn: TxnRecord) -> Self {
        Self {
            txn,
            state: RowState::default(),
        }
    }

    pub fn is_unprocessed(&self) -> bool {
        !self.state.processed
    }

    pub fn mark_matched(&mut self, exception: Option<MatchException>, config: Option<&'static str>) {
        self.state.processed = true;
        self.state.outcome = Some(RowOutcome::Matched);
        self.state.exception = exception;
        self.state.match_config = config;
    }

    pub fn mark_unmatched(
        &mut self,
        exception: MatchException,
        ttum_type: Option<TtumType>,
    ) {
        self.state.processed = true;
        self.state.outcome = Some(RowOutcome::Unmatched);
        self.state.exception = Some(exception);
        self.state.ttum_required = ttum_type.is_some();
        self.state.ttum_type = ttum_type;
    }

    pub fn mark_duplicate(&mut self) {
        self.state.processed = true;
        self.state.outcome = Some(RowOutcome::Duplicate);
        self.state.exception = Some(MatchException::DoubleDebitCredit);
        self.state.ttum_required = true;
        self.state.ttum_type = Some(TtumType::Reversal);
    }

    pub fn mark_hanging(&mut self, reason: &'static str) {
        self.state.processed = true;
        self.state.outcome = Some(RowOutcome::Hanging);
        self.state.hanging_reason = Some(reason);
    }

    /// Leave the row for the residual classifier without an exception tag
    pub fn mark_residual_unmatched(&mut self) {
        self.state.processed = true;
        self.state.outcome = Some(RowOutcome::Unmatched);
    }
}

/// Result of one matching pass
#[derive(Debug, Clone, Copy, Default)]
pub struct PassOutcome {
    pub newly_classified: usize,
}
