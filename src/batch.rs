//! The non-atomic batch coordinator
//!
//! A [`Batch`] collects put, delete, and get requests across entity
//! kinds, chunks them to the store's per-request caps, and dispatches the
//! sub-batches. Work the store reports as unprocessed is surfaced on the
//! outcome, never retried here; the caller can resubmit it trivially via
//! [`BatchOutcome::into_unprocessed`], which keeps each entry's
//! entity-kind tag so a retried read still groups into `items_by_type`.
//! Sub-batch failures are aggregated onto the outcome unless the entire
//! batch made no progress, in which case the first failure is returned as
//! the error.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::{
    store::{self, BatchWriteRequest, MAX_BATCH_GET_KEYS, MAX_BATCH_WRITE_ACTIONS},
    Attributes, EntityTypeName, EntityTypeNameRef, Error, Table,
};

#[derive(Clone, Debug)]
struct TaggedWrite {
    request: BatchWriteRequest,
    kind: Option<EntityTypeName>,
}

#[derive(Clone, Debug)]
struct TaggedGet {
    key: Attributes,
    kind: Option<EntityTypeName>,
}

fn write_request_matches(a: &BatchWriteRequest, b: &BatchWriteRequest) -> bool {
    match (a, b) {
        (BatchWriteRequest::Put { item: a }, BatchWriteRequest::Put { item: b }) => a == b,
        (BatchWriteRequest::Delete { key: a }, BatchWriteRequest::Delete { key: b }) => a == b,
        _ => false,
    }
}

/// Re-attach the collected entity-kind tags to the write requests the
/// store handed back as unprocessed
fn tag_unprocessed_writes(
    chunk: &[TaggedWrite],
    unprocessed: Vec<BatchWriteRequest>,
) -> Vec<TaggedWrite> {
    let mut claimed = vec![false; chunk.len()];
    unprocessed
        .into_iter()
        .map(|request| {
            let mut kind = None;
            for (index, tagged) in chunk.iter().enumerate() {
                if !claimed[index] && write_request_matches(&tagged.request, &request) {
                    claimed[index] = true;
                    kind = tagged.kind.clone();
                    break;
                }
            }
            TaggedWrite { request, kind }
        })
        .collect()
}

/// Re-attach the collected entity-kind tags to the keys the store handed
/// back as unprocessed
fn tag_unprocessed_gets(chunk: &[TaggedGet], unprocessed: Vec<Attributes>) -> Vec<TaggedGet> {
    let mut claimed = vec![false; chunk.len()];
    unprocessed
        .into_iter()
        .map(|key| {
            let mut kind = None;
            for (index, tagged) in chunk.iter().enumerate() {
                if !claimed[index] && tagged.key == key {
                    claimed[index] = true;
                    kind = tagged.kind.clone();
                    break;
                }
            }
            TaggedGet { key, kind }
        })
        .collect()
}

/// A collector for batched, non-atomic reads and writes
#[derive(Debug)]
#[must_use]
pub struct Batch {
    table: Table,
    writes: Vec<TaggedWrite>,
    gets: Vec<TaggedGet>,
    declared: Vec<(EntityTypeName, String)>,
}

impl Batch {
    pub(crate) fn new(table: Table) -> Self {
        Self {
            table,
            writes: Vec::new(),
            gets: Vec::new(),
            declared: Vec::new(),
        }
    }

    /// Add an untagged put of a fully materialized item
    pub fn add_put(&mut self, item: Attributes) {
        self.writes.push(TaggedWrite {
            request: BatchWriteRequest::Put { item },
            kind: None,
        });
    }

    /// Add an untagged delete by primary key
    pub fn add_delete(&mut self, key: Attributes) {
        self.writes.push(TaggedWrite {
            request: BatchWriteRequest::Delete { key },
            kind: None,
        });
    }

    /// Add an untagged get by primary key
    pub fn add_get(&mut self, key: Attributes) {
        self.gets.push(TaggedGet { key, kind: None });
    }

    /// The number of collected write operations
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// The number of collected read keys
    pub fn get_count(&self) -> usize {
        self.gets.len()
    }

    pub(crate) fn collect_put(
        &mut self,
        item: Attributes,
        kind: Option<EntityTypeName>,
        discriminator_attr: String,
    ) {
        if let Some(kind) = &kind {
            self.declare(kind.clone(), discriminator_attr);
        }
        self.writes.push(TaggedWrite {
            request: BatchWriteRequest::Put { item },
            kind,
        });
    }

    pub(crate) fn collect_delete(
        &mut self,
        key: Attributes,
        kind: Option<EntityTypeName>,
        discriminator_attr: String,
    ) {
        if let Some(kind) = &kind {
            self.declare(kind.clone(), discriminator_attr);
        }
        self.writes.push(TaggedWrite {
            request: BatchWriteRequest::Delete { key },
            kind,
        });
    }

    pub(crate) fn collect_get(
        &mut self,
        key: Attributes,
        kind: Option<EntityTypeName>,
        discriminator_attr: String,
    ) {
        if let Some(kind) = &kind {
            self.declare(kind.clone(), discriminator_attr);
        }
        self.gets.push(TaggedGet { key, kind });
    }

    fn declare(&mut self, kind: EntityTypeName, discriminator_attr: String) {
        if !self.declared.iter().any(|(k, _)| *k == kind) {
            self.declared.push((kind, discriminator_attr));
        }
    }

    /// Dispatch the collected operations
    pub async fn execute(self) -> Result<BatchOutcome, Error> {
        self.run(None).await
    }

    /// Dispatch the collected operations, honoring a cancellation signal
    ///
    /// When the signal fires, no further sub-batches are issued; work not
    /// yet dispatched is reported as unprocessed and the outcome is marked
    /// canceled.
    pub async fn execute_canceling(self, cancel: &CancellationToken) -> Result<BatchOutcome, Error> {
        self.run(Some(cancel)).await
    }

    async fn run(self, cancel: Option<&CancellationToken>) -> Result<BatchOutcome, Error> {
        if self.writes.is_empty() && self.gets.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let table = self.table;
        let total_writes = self.writes.len();
        let mut unprocessed_writes: Vec<TaggedWrite> = Vec::new();
        let mut items = Vec::new();
        let mut unprocessed_gets: Vec<TaggedGet> = Vec::new();
        let mut errors = Vec::new();
        let mut canceled = false;

        for chunk in self.writes.chunks(MAX_BATCH_WRITE_ACTIONS) {
            if canceled {
                unprocessed_writes.extend(chunk.iter().cloned());
                continue;
            }

            let requests: Vec<BatchWriteRequest> =
                chunk.iter().map(|w| w.request.clone()).collect();
            let call = table.client().batch_write(table.table_name(), requests);
            match store::await_cancellable(cancel, call).await {
                Ok(output) => {
                    if output.unprocessed.len() >= chunk.len() {
                        errors.push(Error::BatchWriteFailed {
                            attempted: chunk.len(),
                            source: None,
                        });
                    }
                    unprocessed_writes.extend(tag_unprocessed_writes(chunk, output.unprocessed));
                }
                Err(Error::Canceled) => {
                    canceled = true;
                    unprocessed_writes.extend(chunk.iter().cloned());
                }
                Err(error) => {
                    errors.push(Error::BatchWriteFailed {
                        attempted: chunk.len(),
                        source: Some(Box::new(error)),
                    });
                    unprocessed_writes.extend(chunk.iter().cloned());
                }
            }
        }

        for chunk in self.gets.chunks(MAX_BATCH_GET_KEYS) {
            if canceled {
                unprocessed_gets.extend(chunk.iter().cloned());
                continue;
            }

            let keys: Vec<Attributes> = chunk.iter().map(|g| g.key.clone()).collect();
            let call = table.client().batch_get(table.table_name(), keys);
            match store::await_cancellable(cancel, call).await {
                Ok(output) => {
                    if output.items.is_empty() && output.unprocessed_keys.len() >= chunk.len() {
                        errors.push(Error::BatchGetFailed {
                            attempted: chunk.len(),
                            source: None,
                        });
                    }
                    items.extend(output.items);
                    unprocessed_gets.extend(tag_unprocessed_gets(chunk, output.unprocessed_keys));
                }
                Err(Error::Canceled) => {
                    canceled = true;
                    unprocessed_gets.extend(chunk.iter().cloned());
                }
                Err(error) => {
                    errors.push(Error::BatchGetFailed {
                        attempted: chunk.len(),
                        source: Some(Box::new(error)),
                    });
                    unprocessed_gets.extend(chunk.iter().cloned());
                }
            }
        }

        let mut items_by_type: HashMap<EntityTypeName, Vec<Attributes>> = self
            .declared
            .iter()
            .map(|(kind, _)| (kind.clone(), Vec::new()))
            .collect();
        for item in &items {
            let declared = self.declared.iter().find(|(kind, attr)| {
                item.get(attr.as_str()).and_then(|v| v.as_str()) == Some(kind.as_str())
            });
            match declared {
                Some((kind, _)) => items_by_type
                    .get_mut(kind)
                    .expect("declared kinds are pre-seeded")
                    .push(item.clone()),
                None => tracing::warn!("batch get returned an item of an undeclared entity kind"),
            }
        }

        let processed = total_writes - unprocessed_writes.len();
        let found = items.len();

        if !canceled && processed == 0 && found == 0 && !errors.is_empty() {
            return Err(errors.remove(0));
        }

        Ok(BatchOutcome {
            writes: BatchWriteSummary {
                processed,
                unprocessed: unprocessed_writes
                    .iter()
                    .map(|w| w.request.clone())
                    .collect(),
            },
            reads: BatchReadSummary {
                found,
                items,
                items_by_type,
                unprocessed_keys: unprocessed_gets.iter().map(|g| g.key.clone()).collect(),
            },
            errors,
            canceled,
            requeue_writes: unprocessed_writes,
            requeue_gets: unprocessed_gets,
            declared: self.declared,
        })
    }
}

/// The write half of a batch outcome
#[derive(Debug, Default)]
pub struct BatchWriteSummary {
    /// The number of writes the store accepted
    pub processed: usize,

    /// Writes the store could not complete; resubmit to retry
    pub unprocessed: Vec<BatchWriteRequest>,
}

/// The read half of a batch outcome
#[derive(Debug, Default)]
pub struct BatchReadSummary {
    /// The number of items found
    pub found: usize,

    /// Every item found, regardless of entity kind
    pub items: Vec<Attributes>,

    /// Items grouped by the entity kinds declared when collecting gets
    pub items_by_type: HashMap<EntityTypeName, Vec<Attributes>>,

    /// Keys the store could not read; resubmit to retry
    pub unprocessed_keys: Vec<Attributes>,
}

impl BatchReadSummary {
    /// The items found for one declared entity kind
    pub fn items_of(&self, kind: &EntityTypeNameRef) -> &[Attributes] {
        self.items_by_type
            .get(kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// The outcome of dispatching a batch
#[derive(Debug)]
pub struct BatchOutcome {
    /// The write half of the outcome
    pub writes: BatchWriteSummary,

    /// The read half of the outcome
    pub reads: BatchReadSummary,

    /// Sub-batch failures that did not sink the whole batch
    pub errors: Vec<Error>,

    /// Whether the caller's cancellation signal stopped dispatch early
    pub canceled: bool,

    requeue_writes: Vec<TaggedWrite>,
    requeue_gets: Vec<TaggedGet>,
    declared: Vec<(EntityTypeName, String)>,
}

impl BatchOutcome {
    /// Whether the store left any work unprocessed
    pub fn has_unprocessed(&self) -> bool {
        !self.writes.unprocessed.is_empty() || !self.reads.unprocessed_keys.is_empty()
    }

    /// Build a new batch containing exactly the unprocessed work
    ///
    /// Each requeued write and get keeps the entity-kind tag it was
    /// collected with, so a resubmitted batch groups its read results by
    /// kind exactly as the original would have. Returns `None` when
    /// nothing was left unprocessed.
    pub fn into_unprocessed(self, table: &Table) -> Option<Batch> {
        if !self.has_unprocessed() {
            return None;
        }

        let Self {
            requeue_writes,
            requeue_gets,
            declared,
            ..
        } = self;
        let tag_of = |kind: Option<EntityTypeName>| {
            kind.and_then(|kind| {
                declared
                    .iter()
                    .find(|(declared_kind, _)| *declared_kind == kind)
                    .map(|(kind, attr)| (kind.clone(), attr.clone()))
            })
        };

        let mut batch = Batch::new(table.clone());
        for TaggedWrite { request, kind } in requeue_writes {
            match (request, tag_of(kind)) {
                (BatchWriteRequest::Put { item }, Some((kind, attr))) => {
                    batch.collect_put(item, Some(kind), attr);
                }
                (BatchWriteRequest::Put { item }, None) => batch.add_put(item),
                (BatchWriteRequest::Delete { key }, Some((kind, attr))) => {
                    batch.collect_delete(key, Some(kind), attr);
                }
                (BatchWriteRequest::Delete { key }, None) => batch.add_delete(key),
            }
        }
        for TaggedGet { key, kind } in requeue_gets {
            match tag_of(kind) {
                Some((kind, attr)) => batch.collect_get(key, Some(kind), attr),
                None => batch.add_get(key),
            }
        }
        Some(batch)
    }
}
