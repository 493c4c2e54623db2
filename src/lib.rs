//! # entable
//!
//! A schema-driven entity access layer for single-table designs on a
//! wide-column key/value store.
//!
//! An application describes each of its logical record kinds as an
//! [`EntityDefinition`]: a schema for the full value, a schema for the key
//! subset, a primary-key generator, any number of secondary index
//! specifications, named queries, and timestamp policies. A [`Table`]
//! pairs a table name and its key attribute names with an injected
//! [`store::StoreClient`], and an [`EntityRepository`] binds the two
//! together into a typed operation surface:
//!
//! * `create` / `upsert` validate the value, stamp timestamps, generate
//!   the primary and secondary index keys, and persist the assembled item.
//! * `update` takes a key and a partial patch, detects which secondary
//!   indexes the patch touches, and regenerates exactly those key
//!   attributes from the merged image, refusing updates that cannot
//!   produce a well-formed key.
//! * `get`, named queries, and `scan` filter on the entity's
//!   discriminator attribute so that co-located entity kinds never leak
//!   into typed results.
//!
//! Builders are inert until submission: validation, timestamp stamping,
//! and key generation run when a builder is handed to `execute`,
//! `with_batch`, or `with_transaction`, and re-run on every submission, so
//! one builder can be retargeted across all three execution modes.
//!
//! Batched work is collected by a [`batch::Batch`], which chunks writes
//! and reads to the store's per-request caps and surfaces unprocessed work
//! for caller-driven retry; atomic groups are collected by a
//! [`transact::Transaction`]. Query and scan results are iterated lazily
//! through [`page::Pages`].

#![warn(missing_docs)]
#![deny(missing_debug_implementations)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod batch;
mod entity;
mod error;
pub mod expr;
pub mod index;
pub mod keys;
pub mod operation;
pub mod page;
pub mod schema;
pub mod store;
pub mod transact;

use std::{fmt, sync::Arc};

pub use crate::{
    entity::{
        EntityConditionCheckBuilder, EntityDefinition, EntityDefinitionBuilder,
        EntityDeleteBuilder, EntityGetBuilder, EntityPutBuilder, EntityQuery, EntityQueryContext,
        EntityRepository, EntityScanBuilder, EntityUpdateBuilder, QueryFactory, ReadOperation,
        TimestampFormat, TimestampPolicy, Timestamps,
    },
    error::{CancellationReason, Error},
};

/// The default attribute holding an item's entity kind
pub const DEFAULT_DISCRIMINATOR_ATTRIBUTE: &str = "entityType";

/// A dynamic entity value: a mapping from attribute name to value
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// An item in the store's wire representation
pub type Item = std::collections::HashMap<String, aws_sdk_dynamodb::types::AttributeValue>;

/// The name of an entity kind
#[aliri_braid::braid(serde)]
pub struct EntityTypeName;

/// The name of a secondary index
#[aliri_braid::braid(serde)]
pub struct IndexName;

/// A handle to one wide-column table and its injected store client
///
/// The handle carries the table name, the attribute names of the primary
/// index, and a shared [`store::StoreClient`]. It is cheap to clone and
/// safe to share across tasks.
#[derive(Clone)]
pub struct Table {
    inner: Arc<TableInner>,
}

struct TableInner {
    table_name: String,
    partition_attr: String,
    sort_attr: Option<String>,
    client: Arc<dyn store::StoreClient>,
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("table_name", &self.inner.table_name)
            .field("partition_attr", &self.inner.partition_attr)
            .field("sort_attr", &self.inner.sort_attr)
            .finish()
    }
}

impl Table {
    /// Start building a handle for the named table
    ///
    /// The primary index attribute names default to `pk` and `sk`.
    pub fn builder(
        table_name: impl Into<String>,
        client: Arc<dyn store::StoreClient>,
    ) -> TableBuilder {
        TableBuilder {
            table_name: table_name.into(),
            partition_attr: "pk".to_owned(),
            sort_attr: Some("sk".to_owned()),
            client,
        }
    }

    /// The table's name
    pub fn table_name(&self) -> &str {
        &self.inner.table_name
    }

    /// The attribute holding the primary partition key
    pub fn partition_attr(&self) -> &str {
        &self.inner.partition_attr
    }

    /// The attribute holding the primary sort key, when the table has one
    pub fn sort_attr(&self) -> Option<&str> {
        self.inner.sort_attr.as_deref()
    }

    /// The injected store client
    pub fn client(&self) -> &dyn store::StoreClient {
        &*self.inner.client
    }

    /// Bind an entity definition to this table
    pub fn entity(&self, definition: EntityDefinition) -> EntityRepository {
        EntityRepository::new(self, definition)
    }

    /// Start collecting a non-atomic batch against this table
    pub fn batch(&self) -> batch::Batch {
        batch::Batch::new(self.clone())
    }

    /// Start collecting an atomic transaction against this table
    pub fn transaction(&self) -> transact::Transaction {
        transact::Transaction::new(self.clone())
    }

    /// Extract the primary key attributes from a full item
    pub(crate) fn key_of(&self, item: &Attributes) -> Attributes {
        let mut key = Attributes::new();
        if let Some(value) = item.get(self.partition_attr()) {
            key.insert(self.partition_attr().to_owned(), value.clone());
        }
        if let Some(attr) = self.sort_attr() {
            if let Some(value) = item.get(attr) {
                key.insert(attr.to_owned(), value.clone());
            }
        }
        key
    }
}

/// A builder for [`Table`] handles
#[must_use]
pub struct TableBuilder {
    table_name: String,
    partition_attr: String,
    sort_attr: Option<String>,
    client: Arc<dyn store::StoreClient>,
}

impl fmt::Debug for TableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableBuilder")
            .field("table_name", &self.table_name)
            .field("partition_attr", &self.partition_attr)
            .field("sort_attr", &self.sort_attr)
            .finish()
    }
}

impl TableBuilder {
    /// Override the attribute holding the primary partition key
    pub fn partition_attr(mut self, attr: impl Into<String>) -> Self {
        self.partition_attr = attr.into();
        self
    }

    /// Override the attribute holding the primary sort key
    pub fn sort_attr(mut self, attr: impl Into<String>) -> Self {
        self.sort_attr = Some(attr.into());
        self
    }

    /// Declare that the table's primary index has no sort key
    pub fn no_sort_attr(mut self) -> Self {
        self.sort_attr = None;
        self
    }

    /// Finish building the handle
    pub fn build(self) -> Table {
        Table {
            inner: Arc::new(TableInner {
                table_name: self.table_name,
                partition_attr: self.partition_attr,
                sort_attr: self.sort_attr,
                client: self.client,
            }),
        }
    }
}
