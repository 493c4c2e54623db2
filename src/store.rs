//! The thin store client contract and the canonical commands it accepts
//!
//! Operation builders materialize into the command types in this module,
//! and every command is dispatched through the injected [`StoreClient`].
//! The production implementation backed by the AWS SDK lives in
//! [`dynamo`]; tests inject their own.

pub mod dynamo;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    expr::{Condition, Filter, KeyCondition, Projection, Update},
    Attributes, Error, IndexName,
};

/// The store's cap on write actions per batched write request
pub const MAX_BATCH_WRITE_ACTIONS: usize = 25;

/// The store's cap on keys per batched read request
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// The store's cap on actions per transactional write request
pub const MAX_TRANSACTION_ACTIONS: usize = 100;

/// A canonical put command
#[derive(Clone, Debug)]
pub struct PutCommand {
    /// The full item to persist
    pub item: Attributes,

    /// A condition that must hold for the write to be applied
    pub condition: Option<Condition>,

    /// Whether the store should return the replaced item's attributes
    pub return_old: bool,
}

/// A canonical get command
#[derive(Clone, Debug)]
pub struct GetCommand {
    /// The primary key of the item to read
    pub key: Attributes,

    /// The attributes to project into the result
    pub projection: Option<Projection>,

    /// Whether the read must be strongly consistent
    pub consistent_read: bool,
}

/// A canonical update command
#[derive(Clone, Debug)]
pub struct UpdateCommand {
    /// The primary key of the item to mutate
    pub key: Attributes,

    /// The mutations to apply
    pub update: Update,

    /// A condition that must hold for the update to be applied
    pub condition: Option<Condition>,

    /// The attributes the store should return
    pub return_values: UpdateReturnValues,
}

/// A canonical delete command
#[derive(Clone, Debug)]
pub struct DeleteCommand {
    /// The primary key of the item to remove
    pub key: Attributes,

    /// A condition that must hold for the delete to be applied
    pub condition: Option<Condition>,

    /// Whether the store should return the removed item's attributes
    pub return_old: bool,
}

/// A canonical query command
#[derive(Clone, Debug)]
pub struct QueryCommand {
    /// The secondary index to query, or the primary index when absent
    pub index: Option<IndexName>,

    /// The key condition selecting the partition and sort range
    pub key_condition: KeyCondition,

    /// A filter applied to items after they are read
    pub filter: Option<Filter>,

    /// The attributes to project into the results
    pub projection: Option<Projection>,

    /// The maximum number of items to evaluate for this page
    pub limit: Option<u32>,

    /// Whether the read must be strongly consistent
    pub consistent_read: bool,

    /// Whether to traverse the sort range in ascending order
    pub scan_forward: bool,

    /// The exclusive cursor to resume from
    pub start_key: Option<Attributes>,
}

/// A canonical scan command
#[derive(Clone, Debug)]
pub struct ScanCommand {
    /// The secondary index to scan, or the primary index when absent
    pub index: Option<IndexName>,

    /// A filter applied to items after they are read
    pub filter: Option<Filter>,

    /// The attributes to project into the results
    pub projection: Option<Projection>,

    /// The maximum number of items to evaluate for this page
    pub limit: Option<u32>,

    /// Whether the read must be strongly consistent
    pub consistent_read: bool,

    /// The exclusive cursor to resume from
    pub start_key: Option<Attributes>,
}

/// The attributes an update should return
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdateReturnValues {
    /// Return nothing
    #[default]
    None,
    /// Return the full item as it is after the update
    AllNew,
    /// Return only the updated attributes, post-update
    UpdatedNew,
    /// Return the full item as it was before the update
    AllOld,
    /// Return only the updated attributes, pre-update
    UpdatedOld,
}

/// One write within a batched write request
#[derive(Clone, Debug)]
pub enum BatchWriteRequest {
    /// Persist the item, replacing any existing item with the same key
    Put {
        /// The full item to persist
        item: Attributes,
    },
    /// Remove the item with the given key
    Delete {
        /// The primary key of the item to remove
        key: Attributes,
    },
}

/// One action within a transactional write request
#[derive(Clone, Debug)]
pub enum TransactAction {
    /// A transactional put
    Put(PutCommand),
    /// A transactional update
    Update(UpdateCommand),
    /// A transactional delete
    Delete(DeleteCommand),
    /// A condition check without modification
    ConditionCheck {
        /// The primary key of the item the condition applies to
        key: Attributes,
        /// The condition that must hold for the transaction to commit
        condition: Condition,
    },
}

/// The result of a single-item write
#[derive(Clone, Debug, Default)]
pub struct WriteOutput {
    /// The attributes requested via the command's return-values setting
    pub attributes: Option<Attributes>,
}

/// The result of a single-item read
#[derive(Clone, Debug, Default)]
pub struct ReadOutput {
    /// The item, when one exists under the requested key
    pub item: Option<Attributes>,
}

/// One page of query or scan results
#[derive(Clone, Debug, Default)]
pub struct PageOutput {
    /// The items on this page
    pub items: Vec<Attributes>,

    /// The cursor for the next page, absent on the last page
    pub last_evaluated_key: Option<Attributes>,
}

/// The result of a batched write request
#[derive(Clone, Debug, Default)]
pub struct BatchWriteOutput {
    /// Writes the store could not complete in this request
    pub unprocessed: Vec<BatchWriteRequest>,
}

/// The result of a batched read request
#[derive(Clone, Debug, Default)]
pub struct BatchGetOutput {
    /// The items that were found
    pub items: Vec<Attributes>,

    /// Keys the store could not read in this request
    pub unprocessed_keys: Vec<Attributes>,
}

/// A thin, task-safe client for the underlying wide-column store
///
/// The entity layer issues every request through this contract. The
/// client owns the wire protocol, its retry policy, and its timeouts; the
/// entity layer imposes none of its own. Implementations must map a
/// rejected conditional write to [`Error::ConditionFailed`] and a rejected
/// atomic action group to [`Error::TransactionFailed`].
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Persist a single item
    async fn put(&self, table: &str, command: PutCommand) -> Result<WriteOutput, Error>;

    /// Read a single item by primary key
    async fn get(&self, table: &str, command: GetCommand) -> Result<ReadOutput, Error>;

    /// Mutate a single item in place
    async fn update(&self, table: &str, command: UpdateCommand) -> Result<WriteOutput, Error>;

    /// Remove a single item by primary key
    async fn delete(&self, table: &str, command: DeleteCommand) -> Result<WriteOutput, Error>;

    /// Read one page of a key-condition query
    async fn query(&self, table: &str, command: QueryCommand) -> Result<PageOutput, Error>;

    /// Read one page of a full scan
    async fn scan(&self, table: &str, command: ScanCommand) -> Result<PageOutput, Error>;

    /// Issue one batched write of at most [`MAX_BATCH_WRITE_ACTIONS`] actions
    async fn batch_write(
        &self,
        table: &str,
        requests: Vec<BatchWriteRequest>,
    ) -> Result<BatchWriteOutput, Error>;

    /// Issue one batched read of at most [`MAX_BATCH_GET_KEYS`] keys
    async fn batch_get(
        &self,
        table: &str,
        keys: Vec<Attributes>,
    ) -> Result<BatchGetOutput, Error>;

    /// Issue one atomic group of at most [`MAX_TRANSACTION_ACTIONS`] actions
    async fn transact_write(
        &self,
        table: &str,
        actions: Vec<TransactAction>,
        client_request_token: Option<String>,
    ) -> Result<(), Error>;
}

/// Run a store call, abandoning it with [`Error::Canceled`] if the token
/// fires first. The in-flight call is dropped into the client's own
/// cancellation contract.
pub(crate) async fn await_cancellable<F, T>(
    cancel: Option<&CancellationToken>,
    fut: F,
) -> Result<T, Error>
where
    F: std::future::Future<Output = Result<T, Error>>,
{
    match cancel {
        None => fut.await,
        Some(token) => {
            if token.is_cancelled() {
                return Err(Error::Canceled);
            }
            tokio::select! {
                _ = token.cancelled() => Err(Error::Canceled),
                result = fut => result,
            }
        }
    }
}
