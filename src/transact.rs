//! The atomic transaction coordinator
//!
//! A [`Transaction`] collects put, update, delete, and condition-check
//! actions and dispatches them as a single atomic group. There is no
//! partial success: either every action commits or the whole group is
//! rejected with the store's cancellation reasons.

use tokio_util::sync::CancellationToken;

use crate::{
    expr::Condition,
    operation::{DeleteBuilder, PutBuilder, UpdateBuilder},
    store::{self, TransactAction, MAX_TRANSACTION_ACTIONS},
    Attributes, Error, Table,
};

/// A collector for one atomic action group
#[derive(Debug)]
#[must_use]
pub struct Transaction {
    table: Table,
    actions: Vec<TransactAction>,
    client_request_token: Option<String>,
}

impl Transaction {
    pub(crate) fn new(table: Table) -> Self {
        Self {
            table,
            actions: Vec::new(),
            client_request_token: None,
        }
    }

    /// Apply an idempotency token to the atomic group
    pub fn client_request_token(&mut self, token: impl Into<String>) -> &mut Self {
        self.client_request_token = Some(token.into());
        self
    }

    /// Add a put action
    pub fn add_put(&mut self, put: &PutBuilder) -> &mut Self {
        self.actions.push(TransactAction::Put(put.to_command()));
        self
    }

    /// Add an update action
    pub fn add_update(&mut self, update: &UpdateBuilder) -> Result<&mut Self, Error> {
        self.actions.push(TransactAction::Update(update.to_command()?));
        Ok(self)
    }

    /// Add a delete action
    pub fn add_delete(&mut self, delete: &DeleteBuilder) -> &mut Self {
        self.actions.push(TransactAction::Delete(delete.to_command()));
        self
    }

    /// Add a condition check against the item under the given primary key
    pub fn add_condition_check(&mut self, key: Attributes, condition: Condition) -> &mut Self {
        self.actions.push(TransactAction::ConditionCheck { key, condition });
        self
    }

    pub(crate) fn collect(&mut self, action: TransactAction) {
        self.actions.push(action);
    }

    /// The number of collected actions
    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Dispatch the atomic group
    ///
    /// Fails with [`Error::EmptyTransaction`] when no actions were added
    /// and with [`Error::TransactionTooLarge`] when the group exceeds the
    /// store's per-request action cap. A rejected group fails with
    /// [`Error::TransactionFailed`] carrying the cancellation reasons.
    pub async fn execute(self) -> Result<(), Error> {
        self.run(None).await
    }

    /// Dispatch the atomic group, honoring a cancellation signal
    pub async fn execute_canceling(self, cancel: &CancellationToken) -> Result<(), Error> {
        self.run(Some(cancel)).await
    }

    async fn run(self, cancel: Option<&CancellationToken>) -> Result<(), Error> {
        if self.actions.is_empty() {
            return Err(Error::EmptyTransaction);
        }
        if self.actions.len() > MAX_TRANSACTION_ACTIONS {
            return Err(Error::TransactionTooLarge {
                count: self.actions.len(),
                max: MAX_TRANSACTION_ACTIONS,
            });
        }

        let Self {
            table,
            actions,
            client_request_token,
        } = self;
        let call = table
            .client()
            .transact_write(table.table_name(), actions, client_request_token);
        store::await_cancellable(cancel, call).await
    }
}
