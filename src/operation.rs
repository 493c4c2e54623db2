//! Builders for the store's item-level and index-level operations
//!
//! Each builder is a fluent accumulator over one canonical command. A
//! builder is inert until it is handed to a submission path; converting it
//! into a command copies nothing out of the builder, so the same builder
//! can be dispatched more than once. All builders are `Clone`, and a clone
//! shares no mutable state with its source.

use crate::{
    expr::{Condition, Filter, KeyCondition, Projection, Update},
    page::Pages,
    store::{
        DeleteCommand, GetCommand, PutCommand, QueryCommand, ScanCommand, UpdateCommand,
        UpdateReturnValues,
    },
    Attributes, Error, IndexName, Table,
};

/// The attributes a put should return
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PutReturnValues {
    /// Return nothing
    #[default]
    None,
    /// Return the replaced item's attributes
    AllOld,
    /// Echo the materialized item without reading it back
    Input,
    /// Read the item back with strong consistency after the write
    Consistent,
}

/// A builder for put operations
#[derive(Clone, Debug)]
#[must_use]
pub struct PutBuilder {
    item: Attributes,
    condition: Option<Condition>,
    return_values: PutReturnValues,
}

impl PutBuilder {
    /// Prepare a put of the given item
    pub fn new(item: Attributes) -> Self {
        Self {
            item,
            condition: None,
            return_values: PutReturnValues::None,
        }
    }

    /// Apply a conditional expression, conjoining with any already present
    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    /// Select the attributes returned after the write
    pub fn return_values(mut self, return_values: PutReturnValues) -> Self {
        self.return_values = return_values;
        self
    }

    /// The item this put will persist
    pub fn item(&self) -> &Attributes {
        &self.item
    }

    pub(crate) fn to_command(&self) -> PutCommand {
        PutCommand {
            item: self.item.clone(),
            condition: self.condition.clone(),
            return_old: self.return_values == PutReturnValues::AllOld,
        }
    }

    /// Execute the put against the given table
    pub async fn execute(&self, table: &Table) -> Result<Option<Attributes>, Error> {
        let output = table
            .client()
            .put(table.table_name(), self.to_command())
            .await?;

        match self.return_values {
            PutReturnValues::None => Ok(None),
            PutReturnValues::AllOld => Ok(output.attributes),
            PutReturnValues::Input => Ok(Some(self.item.clone())),
            PutReturnValues::Consistent => {
                let key = table.key_of(&self.item);
                let read = table
                    .client()
                    .get(
                        table.table_name(),
                        GetCommand {
                            key,
                            projection: None,
                            consistent_read: true,
                        },
                    )
                    .await?;
                Ok(read.item)
            }
        }
    }
}

/// A builder for get operations
#[derive(Clone, Debug)]
#[must_use]
pub struct GetBuilder {
    key: Attributes,
    projection: Option<Projection>,
    consistent_read: bool,
}

impl GetBuilder {
    /// Prepare a get of the item under the given primary key
    pub fn new(key: Attributes) -> Self {
        Self {
            key,
            projection: None,
            consistent_read: false,
        }
    }

    /// Narrow the returned attributes to the given dotted paths
    pub fn select<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<crate::expr::Path>,
    {
        self.projection = Some(Projection::new(paths));
        self
    }

    /// Require a strongly consistent read
    pub fn consistent_read(mut self) -> Self {
        self.consistent_read = true;
        self
    }

    pub(crate) fn key(&self) -> &Attributes {
        &self.key
    }

    pub(crate) fn to_command(&self) -> GetCommand {
        GetCommand {
            key: self.key.clone(),
            projection: self.projection.clone(),
            consistent_read: self.consistent_read,
        }
    }

    /// Execute the get against the given table
    pub async fn execute(&self, table: &Table) -> Result<Option<Attributes>, Error> {
        let output = table
            .client()
            .get(table.table_name(), self.to_command())
            .await?;
        Ok(output.item)
    }
}

/// A builder for update operations
#[derive(Clone, Debug)]
#[must_use]
pub struct UpdateBuilder {
    key: Attributes,
    update: Update,
    condition: Option<Condition>,
    return_values: UpdateReturnValues,
}

impl UpdateBuilder {
    /// Prepare an update of the item under the given primary key
    pub fn new(key: Attributes) -> Self {
        Self {
            key,
            update: Update::new(),
            condition: None,
            return_values: UpdateReturnValues::None,
        }
    }

    /// Assign a value at a dotted path
    pub fn set(mut self, path: impl Into<crate::expr::Path>, value: impl serde::Serialize) -> Self {
        self.update = self.update.set(path, value);
        self
    }

    /// Remove the attribute at a dotted path
    pub fn remove(mut self, path: impl Into<crate::expr::Path>) -> Self {
        self.update = self.update.remove(path);
        self
    }

    /// Add a number to, or union elements into, the attribute at a path
    pub fn add(mut self, path: impl Into<crate::expr::Path>, value: impl serde::Serialize) -> Self {
        self.update = self.update.add(path, value);
        self
    }

    /// Remove elements from the set-typed attribute at a path
    pub fn delete_elements<I, V>(mut self, path: impl Into<crate::expr::Path>, elements: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: serde::Serialize,
    {
        self.update = self.update.delete_elements(path, elements);
        self
    }

    /// Apply a conditional expression, conjoining with any already present
    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    /// Select the attributes returned after the update
    pub fn return_values(mut self, return_values: UpdateReturnValues) -> Self {
        self.return_values = return_values;
        self
    }

    pub(crate) fn to_command(&self) -> Result<UpdateCommand, Error> {
        if self.update.is_empty() {
            return Err(Error::EmptyUpdate);
        }
        Ok(UpdateCommand {
            key: self.key.clone(),
            update: self.update.clone(),
            condition: self.condition.clone(),
            return_values: self.return_values,
        })
    }

    /// Execute the update against the given table
    pub async fn execute(&self, table: &Table) -> Result<Option<Attributes>, Error> {
        let output = table
            .client()
            .update(table.table_name(), self.to_command()?)
            .await?;
        Ok(output.attributes)
    }
}

/// A builder for delete operations
#[derive(Clone, Debug)]
#[must_use]
pub struct DeleteBuilder {
    key: Attributes,
    condition: Option<Condition>,
    return_old: bool,
}

impl DeleteBuilder {
    /// Prepare a delete of the item under the given primary key
    pub fn new(key: Attributes) -> Self {
        Self {
            key,
            condition: None,
            return_old: false,
        }
    }

    /// Apply a conditional expression, conjoining with any already present
    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    /// Return the removed item's attributes
    pub fn return_all_old(mut self) -> Self {
        self.return_old = true;
        self
    }

    pub(crate) fn to_command(&self) -> DeleteCommand {
        DeleteCommand {
            key: self.key.clone(),
            condition: self.condition.clone(),
            return_old: self.return_old,
        }
    }

    /// Execute the delete against the given table
    pub async fn execute(&self, table: &Table) -> Result<Option<Attributes>, Error> {
        let output = table
            .client()
            .delete(table.table_name(), self.to_command())
            .await?;
        Ok(output.attributes)
    }
}

/// A builder for key-condition query operations
#[derive(Clone, Debug)]
#[must_use]
pub struct QueryBuilder {
    index: Option<IndexName>,
    key_condition: Option<KeyCondition>,
    filter: Option<Filter>,
    projection: Option<Projection>,
    limit: Option<u32>,
    consistent_read: bool,
    scan_forward: bool,
    start_key: Option<Attributes>,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryBuilder {
    /// Prepare a query against the primary index
    pub fn new() -> Self {
        Self {
            index: None,
            key_condition: None,
            filter: None,
            projection: None,
            limit: None,
            consistent_read: false,
            scan_forward: true,
            start_key: None,
        }
    }

    /// Target a secondary index instead of the primary index
    pub fn use_index(mut self, index: impl Into<IndexName>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Set the key condition for the query
    pub fn key_condition(mut self, key_condition: KeyCondition) -> Self {
        self.key_condition = Some(key_condition);
        self
    }

    /// Apply a filter to read items, conjoining with any already present
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Narrow the returned attributes to the given dotted paths
    pub fn select<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<crate::expr::Path>,
    {
        self.projection = Some(Projection::new(paths));
        self
    }

    /// Cap the number of items evaluated per page
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Require strongly consistent reads
    ///
    /// Rejected at submission when the query targets a secondary index.
    pub fn consistent_read(mut self) -> Self {
        self.consistent_read = true;
        self
    }

    /// Choose the traversal direction over the sort range
    pub fn scan_forward(mut self, forward: bool) -> Self {
        self.scan_forward = forward;
        self
    }

    /// Resume from a previously returned cursor
    pub fn start_from(mut self, cursor: Attributes) -> Self {
        self.start_key = Some(cursor);
        self
    }

    pub(crate) fn to_command(&self) -> Result<QueryCommand, Error> {
        if self.consistent_read {
            if let Some(index) = &self.index {
                return Err(Error::ConsistentReadOnIndex {
                    index: index.to_string(),
                });
            }
        }
        let key_condition = self
            .key_condition
            .clone()
            .ok_or(Error::MissingKeyCondition)?;
        Ok(QueryCommand {
            index: self.index.clone(),
            key_condition,
            filter: self.filter.clone(),
            projection: self.projection.clone(),
            limit: self.limit,
            consistent_read: self.consistent_read,
            scan_forward: self.scan_forward,
            start_key: self.start_key.clone(),
        })
    }

    /// Execute a single page of the query against the given table
    pub async fn execute(&self, table: &Table) -> Result<crate::store::PageOutput, Error> {
        table
            .client()
            .query(table.table_name(), self.to_command()?)
            .await
    }

    /// Iterate the query lazily, fetching pages as the consumer advances
    pub fn paginate(&self, table: &Table, page_size: Option<u32>) -> Result<Pages, Error> {
        let mut command = self.to_command()?;
        if page_size.is_some() {
            command.limit = page_size;
        }
        Ok(Pages::query(table.clone(), command))
    }
}

/// A builder for scan operations
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct ScanBuilder {
    index: Option<IndexName>,
    filter: Option<Filter>,
    projection: Option<Projection>,
    limit: Option<u32>,
    consistent_read: bool,
    start_key: Option<Attributes>,
}

impl ScanBuilder {
    /// Prepare a scan of the primary index
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a secondary index instead of the primary index
    pub fn use_index(mut self, index: impl Into<IndexName>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Apply a filter to read items, conjoining with any already present
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Narrow the returned attributes to the given dotted paths
    pub fn select<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<crate::expr::Path>,
    {
        self.projection = Some(Projection::new(paths));
        self
    }

    /// Cap the number of items evaluated per page
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Require strongly consistent reads
    ///
    /// Rejected at submission when the scan targets a secondary index.
    pub fn consistent_read(mut self) -> Self {
        self.consistent_read = true;
        self
    }

    /// Resume from a previously returned cursor
    pub fn start_from(mut self, cursor: Attributes) -> Self {
        self.start_key = Some(cursor);
        self
    }

    pub(crate) fn to_command(&self) -> Result<ScanCommand, Error> {
        if self.consistent_read {
            if let Some(index) = &self.index {
                return Err(Error::ConsistentReadOnIndex {
                    index: index.to_string(),
                });
            }
        }
        Ok(ScanCommand {
            index: self.index.clone(),
            filter: self.filter.clone(),
            projection: self.projection.clone(),
            limit: self.limit,
            consistent_read: self.consistent_read,
            start_key: self.start_key.clone(),
        })
    }

    /// Execute a single page of the scan against the given table
    pub async fn execute(&self, table: &Table) -> Result<crate::store::PageOutput, Error> {
        table
            .client()
            .scan(table.table_name(), self.to_command()?)
            .await
    }

    /// Iterate the scan lazily, fetching pages as the consumer advances
    pub fn paginate(&self, table: &Table, page_size: Option<u32>) -> Result<Pages, Error> {
        let mut command = self.to_command()?;
        if page_size.is_some() {
            command.limit = page_size;
        }
        Ok(Pages::scan(table.clone(), command))
    }
}
