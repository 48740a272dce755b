//! Operational controls over persisted runs: the maker–checker force-match
//! workflow and the multi-level rollback manager.
//!
//! Both follow the same discipline for every mutation of run state:
//! validate preconditions, back up the target artifact, mutate, persist via
//! write-temp-rename, and record the operation in an append-only history.

pub mod error;
pub mod proposals;
pub mod rollback;

pub use error::{Error, Result};
pub use proposals::{Proposal, ProposalStatus, ProposalStore};
pub use rollback::{RollbackLevel, RollbackManager, RollbackOutcome, RollbackStatus};
