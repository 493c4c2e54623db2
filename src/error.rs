use crate::schema::Issue;

/// A reason reported by the store when an atomic action group is rejected
#[derive(Clone, Debug, Default)]
pub struct CancellationReason {
    /// The store's reason code, such as `ConditionalCheckFailed`
    pub code: Option<String>,

    /// The human-readable message accompanying the code, if any
    pub message: Option<String>,
}

/// An error raised by the entity layer or passed through from the store
///
/// Validation and key-generation errors are always raised before any
/// request reaches the store. Store-origin faults that this layer does not
/// interpret are passed through as [`Error::Store`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An input failed its schema
    #[error("validation failed: {message}")]
    ValidationFailed {
        /// Every issue message reported by the validator, concatenated
        message: String,
    },

    /// A deferred validator reached a batch or transaction submission path
    #[error("deferred schema validation is only supported on direct execution")]
    UnsupportedAsyncValidation,

    /// A key for the named index could not be generated from the available
    /// attributes
    #[error("unable to generate a key for index `{index}`: missing attributes [{}]", attributes.join(", "))]
    MissingAttributes {
        /// The index whose key could not be generated
        index: String,
        /// The attribute names that were required but absent
        attributes: Vec<String>,
    },

    /// An update touched the named index but the merged image cannot produce
    /// a well-formed key for it
    #[error("insufficient data to rebuild index `{index}`: missing attributes [{}]", attributes.join(", "))]
    InsufficientDataForIndex {
        /// The index that the update affects
        index: String,
        /// The attribute names that were required but absent
        attributes: Vec<String>,
    },

    /// A forced index rebuild referenced a name that is not a declared
    /// secondary index
    #[error("unknown index(es) [{}]; known secondary indexes are [{}]", names.join(", "), known.join(", "))]
    UnknownIndex {
        /// The unrecognized names
        names: Vec<String>,
        /// The declared secondary index names
        known: Vec<String>,
    },

    /// No query with the given name is defined for the entity
    #[error("no query named `{name}` is defined for entity `{entity}`")]
    UnknownQuery {
        /// The requested query name
        name: String,
        /// The entity the query was requested from
        entity: String,
    },

    /// A query was submitted without a key condition
    #[error("a query requires a key condition")]
    MissingKeyCondition,

    /// Consistent reads were requested against a secondary index
    #[error("consistent reads are not supported on secondary index `{index}`")]
    ConsistentReadOnIndex {
        /// The offending index
        index: String,
    },

    /// An update was submitted without any mutation
    #[error("an update requires at least one set, remove, add, or delete action")]
    EmptyUpdate,

    /// A batch was submitted without any operations
    #[error("the batch contains no operations")]
    EmptyBatch,

    /// A transaction was submitted without any actions
    #[error("the transaction contains no actions")]
    EmptyTransaction,

    /// A transaction exceeded the store's per-request action cap
    #[error("the transaction contains {count} actions, more than the maximum of {max}")]
    TransactionTooLarge {
        /// The number of collected actions
        count: usize,
        /// The store's cap on actions per transaction
        max: usize,
    },

    /// A write sub-batch failed outright or made no progress
    #[error("a batch write of {attempted} operations failed")]
    BatchWriteFailed {
        /// The number of write operations in the failed sub-batch
        attempted: usize,
        /// The underlying fault, absent when the store simply returned the
        /// whole sub-batch as unprocessed
        #[source]
        source: Option<Box<Error>>,
    },

    /// A read sub-batch failed outright or made no progress
    #[error("a batch get of {attempted} keys failed")]
    BatchGetFailed {
        /// The number of keys in the failed sub-batch
        attempted: usize,
        /// The underlying fault, absent when the store simply returned
        /// every key as unprocessed
        #[source]
        source: Option<Box<Error>>,
    },

    /// The atomic action group was rejected by the store
    #[error("the transaction was rejected by the store")]
    TransactionFailed {
        /// The store's cancellation reasons, one per submitted action
        reasons: Vec<CancellationReason>,
    },

    /// A single-item conditional write was rejected
    #[error("the conditional write was rejected")]
    ConditionFailed,

    /// The caller's cancellation signal fired before the work completed
    #[error("the operation was canceled")]
    Canceled,

    /// An item could not be converted to or from the store's wire shape
    #[error("failed to convert an item to or from the store representation")]
    ItemCodec(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Any other store-origin fault, passed through unchanged
    #[error("store error")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub(crate) fn validation_failed(issues: Vec<Issue>) -> Self {
        let message = issues
            .iter()
            .map(Issue::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Self::ValidationFailed { message }
    }

    /// Returns true if the error is the rejection of a conditional write
    ///
    /// For transactions, this also returns true when any cancellation
    /// reason reports a failed condition check.
    pub fn is_condition_failed(&self) -> bool {
        match self {
            Self::ConditionFailed => true,
            Self::TransactionFailed { reasons } => reasons
                .iter()
                .any(|r| r.code.as_deref() == Some("ConditionalCheckFailed")),
            _ => false,
        }
    }

    /// Returns true if the error is a caller-driven cancellation
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Returns true if the error originated in input validation or key
    /// generation and never reached the store
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed { .. }
                | Self::UnsupportedAsyncValidation
                | Self::MissingAttributes { .. }
                | Self::InsufficientDataForIndex { .. }
                | Self::UnknownIndex { .. }
                | Self::UnknownQuery { .. }
                | Self::MissingKeyCondition
                | Self::ConsistentReadOnIndex { .. }
                | Self::EmptyUpdate
                | Self::EmptyBatch
                | Self::EmptyTransaction
                | Self::TransactionTooLarge { .. }
        )
    }
}
