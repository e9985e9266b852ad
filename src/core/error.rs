use crate::core::member::{MemberId, Side};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failures reported by a collaborator (member store, ledgers, oracle).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("duplicate {entity}: {id}")]
    Duplicate { entity: &'static str, id: String },

    /// A compare-and-set write lost against a concurrent writer.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network, timeout or backend failure. May succeed on retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn duplicate(entity: &'static str, id: impl ToString) -> Self {
        Self::Duplicate {
            entity,
            id: id.to_string(),
        }
    }

    /// Cancellation or deadline: the caller gave up, so nothing may continue.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors surfaced by the placement and commission engines.
///
/// Qualification, volume and cap shortfalls are not errors: they come back as
/// successful results carrying a `reason`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("member not found: {0}")]
    MemberNotFound(MemberId),

    #[error("sponsor not found: {0}")]
    SponsorNotFound(MemberId),

    #[error("sponsor {0} already has a left and a right child; choose another sponsor")]
    SponsorFull(MemberId),

    #[error("the {side} position under sponsor {sponsor} is already taken; choose '{}' or another sponsor", .side.opposite())]
    PositionTaken { sponsor: MemberId, side: Side },

    #[error("position must be 'left' or 'right', got '{0}'")]
    InvalidPosition(String),

    #[error("amount must be positive, got {0}")]
    InvalidAmount(rust_decimal::Decimal),

    #[error("could not allocate a unique member code after {0} attempts")]
    CodeSpaceExhausted(usize),

    /// The atomic payout section failed and was rolled back.
    #[error("payout for {member} aborted: {source}")]
    PayoutAborted {
        member: MemberId,
        #[source]
        source: StoreError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Map a store lookup miss to the member-level error.
    pub fn from_lookup(err: StoreError, id: &MemberId) -> Self {
        if err.is_not_found() {
            Self::MemberNotFound(id.clone())
        } else {
            Self::Store(err)
        }
    }
}
