//! Entity definitions and the repository surface over them
//!
//! An [`EntityDefinition`] declares everything the layer needs to know
//! about one logical record kind. The [`EntityRepository`] binds a
//! definition to a [`Table`] and produces entity-aware builders whose
//! validation, timestamp stamping, and key generation are deferred to
//! submission time, so a single builder can be dispatched directly,
//! collected into a batch, or collected into a transaction.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;

use crate::{
    batch::Batch,
    expr::{Condition, Filter, Path, UpdateAction},
    index::IndexEngine,
    keys::{GeneratedKey, IndexSpec, KeyGenerator, KeyInput},
    operation::{
        DeleteBuilder, GetBuilder, PutBuilder, PutReturnValues, QueryBuilder, ScanBuilder,
        UpdateBuilder,
    },
    page::Pages,
    schema::{SchemaValidator, Unvalidated, Validation},
    store::{self, PageOutput, TransactAction, UpdateReturnValues},
    transact::Transaction,
    Attributes, EntityTypeName, EntityTypeNameRef, Error, Table, DEFAULT_DISCRIMINATOR_ATTRIBUTE,
};

/// The wire format of a stamped timestamp
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimestampFormat {
    /// An RFC 3339 string with fractional seconds
    Iso,
    /// Integer seconds since the Unix epoch, suitable as a TTL attribute
    Unix,
}

/// Where and how one timestamp is stamped onto persisted items
#[derive(Clone, Debug)]
pub struct TimestampPolicy {
    format: TimestampFormat,
    attribute: String,
}

impl TimestampPolicy {
    /// Stamp an RFC 3339 timestamp into the given attribute
    pub fn iso(attribute: impl Into<String>) -> Self {
        Self {
            format: TimestampFormat::Iso,
            attribute: attribute.into(),
        }
    }

    /// Stamp a Unix-seconds timestamp into the given attribute
    pub fn unix(attribute: impl Into<String>) -> Self {
        Self {
            format: TimestampFormat::Unix,
            attribute: attribute.into(),
        }
    }

    /// The attribute the timestamp is stamped into
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// The stamped wire format
    pub fn format(&self) -> TimestampFormat {
        self.format
    }

    pub(crate) fn now(&self) -> serde_json::Value {
        let now = time::OffsetDateTime::now_utc();
        match self.format {
            TimestampFormat::Iso => serde_json::Value::String(
                now.format(&Rfc3339)
                    .expect("UTC timestamps always format as RFC 3339"),
            ),
            TimestampFormat::Unix => serde_json::Value::Number(now.unix_timestamp().into()),
        }
    }
}

/// The timestamp policies configured for an entity
///
/// `created_at` is stamped only when an item is created; `updated_at` is
/// stamped on every create and update. A timestamp already supplied by the
/// caller is never overwritten.
#[derive(Clone, Debug, Default)]
pub struct Timestamps {
    /// Stamped once, at item creation
    pub created_at: Option<TimestampPolicy>,

    /// Stamped at creation and on every update
    pub updated_at: Option<TimestampPolicy>,
}

impl Timestamps {
    /// No timestamps
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the creation timestamp
    pub fn created_at(mut self, policy: TimestampPolicy) -> Self {
        self.created_at = Some(policy);
        self
    }

    /// Configure the modification timestamp
    pub fn updated_at(mut self, policy: TimestampPolicy) -> Self {
        self.updated_at = Some(policy);
        self
    }

    /// RFC 3339 `createdAt` and `updatedAt` attributes
    pub fn iso() -> Self {
        Self {
            created_at: Some(TimestampPolicy::iso("createdAt")),
            updated_at: Some(TimestampPolicy::iso("updatedAt")),
        }
    }

    /// Unix-seconds `createdAt` and `updatedAt` attributes
    pub fn unix() -> Self {
        Self {
            created_at: Some(TimestampPolicy::unix("createdAt")),
            updated_at: Some(TimestampPolicy::unix("updatedAt")),
        }
    }
}

/// A read operation produced by a named query's factory
#[derive(Clone, Debug)]
pub enum ReadOperation {
    /// A single-item read by primary key
    Get(GetBuilder),
    /// A key-condition query against the primary or a secondary index
    Query(QueryBuilder),
    /// A scan of the primary or a secondary index
    Scan(ScanBuilder),
}

impl From<GetBuilder> for ReadOperation {
    fn from(builder: GetBuilder) -> Self {
        Self::Get(builder)
    }
}

impl From<QueryBuilder> for ReadOperation {
    fn from(builder: QueryBuilder) -> Self {
        Self::Query(builder)
    }
}

impl From<ScanBuilder> for ReadOperation {
    fn from(builder: ScanBuilder) -> Self {
        Self::Scan(builder)
    }
}

/// Builds the read operation backing one named query
///
/// The factory receives a context exposing `get`, `query`, and `scan`
/// and the caller's raw input, and returns whichever builder it wishes.
pub type QueryFactory = Arc<
    dyn Fn(&EntityQueryContext<'_>, &Attributes) -> Result<ReadOperation, Error> + Send + Sync,
>;

struct NamedQuery {
    schema: Arc<dyn SchemaValidator>,
    factory: QueryFactory,
}

/// The full description of one entity kind
pub struct EntityDefinition {
    name: EntityTypeName,
    schema: Arc<dyn SchemaValidator>,
    key_schema: Arc<dyn SchemaValidator>,
    primary_key: KeyGenerator,
    engine: IndexEngine,
    queries: HashMap<String, NamedQuery>,
    timestamps: Timestamps,
    discriminator_attr: String,
}

impl fmt::Debug for EntityDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDefinition")
            .field("name", &self.name)
            .field("secondaries", &self.engine.secondaries())
            .field("queries", &self.queries.keys().collect::<Vec<_>>())
            .field("timestamps", &self.timestamps)
            .field("discriminator_attr", &self.discriminator_attr)
            .finish()
    }
}

impl EntityDefinition {
    /// Start describing an entity kind
    pub fn builder(name: impl Into<EntityTypeName>) -> EntityDefinitionBuilder {
        EntityDefinitionBuilder {
            name: name.into(),
            schema: Arc::new(Unvalidated),
            key_schema: Arc::new(Unvalidated),
            primary_key: None,
            secondaries: Vec::new(),
            queries: HashMap::new(),
            timestamps: Timestamps::default(),
            discriminator_attr: DEFAULT_DISCRIMINATOR_ATTRIBUTE.to_owned(),
        }
    }

    /// The entity kind's name
    pub fn name(&self) -> &EntityTypeNameRef {
        &self.name
    }

    /// The attribute carrying the entity kind on persisted items
    pub fn discriminator_attr(&self) -> &str {
        &self.discriminator_attr
    }

    /// The engine maintaining the entity's secondary index attributes
    pub fn engine(&self) -> &IndexEngine {
        &self.engine
    }

    /// The entity's timestamp policies
    pub fn timestamps(&self) -> &Timestamps {
        &self.timestamps
    }
}

/// A builder for [`EntityDefinition`]
#[must_use]
pub struct EntityDefinitionBuilder {
    name: EntityTypeName,
    schema: Arc<dyn SchemaValidator>,
    key_schema: Arc<dyn SchemaValidator>,
    primary_key: Option<KeyGenerator>,
    secondaries: Vec<IndexSpec>,
    queries: HashMap<String, NamedQuery>,
    timestamps: Timestamps,
    discriminator_attr: String,
}

impl fmt::Debug for EntityDefinitionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDefinitionBuilder")
            .field("name", &self.name)
            .finish()
    }
}

impl EntityDefinitionBuilder {
    /// The schema validating full entity values
    pub fn schema(mut self, schema: impl SchemaValidator + 'static) -> Self {
        self.schema = Arc::new(schema);
        self
    }

    /// The schema validating the key subset of the entity's attributes
    pub fn key_schema(mut self, schema: impl SchemaValidator + 'static) -> Self {
        self.key_schema = Arc::new(schema);
        self
    }

    /// The pure generator of the primary key, consuming only key attributes
    pub fn primary_key<F>(mut self, generator: F) -> Self
    where
        F: Fn(&KeyInput<'_>) -> GeneratedKey + Send + Sync + 'static,
    {
        self.primary_key = Some(Arc::new(generator));
        self
    }

    /// Declare a secondary index on the entity
    pub fn secondary_index(mut self, spec: IndexSpec) -> Self {
        self.secondaries.push(spec);
        self
    }

    /// Declare a named query
    ///
    /// The input schema validates the caller's query input at submission;
    /// the factory builds the backing read operation.
    pub fn query<V, F>(mut self, name: impl Into<String>, schema: V, factory: F) -> Self
    where
        V: SchemaValidator + 'static,
        F: Fn(&EntityQueryContext<'_>, &Attributes) -> Result<ReadOperation, Error>
            + Send
            + Sync
            + 'static,
    {
        self.queries.insert(
            name.into(),
            NamedQuery {
                schema: Arc::new(schema),
                factory: Arc::new(factory),
            },
        );
        self
    }

    /// Configure timestamp stamping
    pub fn timestamps(mut self, timestamps: Timestamps) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Override the attribute carrying the entity kind
    pub fn discriminator_attr(mut self, attr: impl Into<String>) -> Self {
        self.discriminator_attr = attr.into();
        self
    }

    /// Finish the definition
    ///
    /// # Panics
    ///
    /// Panics if no primary key generator was provided.
    pub fn build(self) -> EntityDefinition {
        EntityDefinition {
            name: self.name,
            schema: self.schema,
            key_schema: self.key_schema,
            primary_key: self
                .primary_key
                .expect("an entity definition requires a primary key generator"),
            engine: IndexEngine::new(self.secondaries),
            queries: self.queries,
            timestamps: self.timestamps,
            discriminator_attr: self.discriminator_attr,
        }
    }
}

/// The typed operation surface over one entity kind on one table
///
/// Repositories are immutable after construction, cheap to clone, and
/// safe to share across tasks. The builders they produce are single-task
/// mutable values.
#[derive(Clone)]
pub struct EntityRepository {
    table: Table,
    definition: Arc<EntityDefinition>,
}

impl fmt::Debug for EntityRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRepository")
            .field("table", &self.table)
            .field("entity", &self.definition.name)
            .finish()
    }
}

impl EntityRepository {
    /// Bind an entity definition to a table
    pub fn new(table: &Table, definition: EntityDefinition) -> Self {
        Self {
            table: table.clone(),
            definition: Arc::new(definition),
        }
    }

    /// The entity definition backing this repository
    pub fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    /// The table this repository operates on
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Prepare a put guarded against overwriting an existing item
    pub fn create(&self, value: Attributes) -> EntityPutBuilder {
        EntityPutBuilder {
            repo: self.clone(),
            value,
            guard_new: true,
            condition: None,
            return_values: PutReturnValues::None,
        }
    }

    /// Prepare an unguarded put
    pub fn upsert(&self, value: Attributes) -> EntityPutBuilder {
        EntityPutBuilder {
            repo: self.clone(),
            value,
            guard_new: false,
            condition: None,
            return_values: PutReturnValues::None,
        }
    }

    /// Prepare a read of the item under the given key value
    pub fn get(&self, key: Attributes) -> EntityGetBuilder {
        EntityGetBuilder {
            repo: self.clone(),
            key,
            select: None,
            consistent_read: false,
            include_indexes: false,
        }
    }

    /// Prepare a partial update of the item under the given key value
    ///
    /// The update is always guarded on the discriminator attribute so
    /// that a key collision with another entity kind cannot be mutated.
    pub fn update(&self, key: Attributes, patch: Attributes) -> EntityUpdateBuilder {
        EntityUpdateBuilder {
            repo: self.clone(),
            key,
            patch,
            extra: crate::expr::Update::new(),
            condition: None,
            return_values: UpdateReturnValues::None,
            force_rebuild: BTreeSet::new(),
        }
    }

    /// Prepare a delete of the item under the given key value
    ///
    /// Guarded on the discriminator attribute, like [`update`][Self::update].
    pub fn delete(&self, key: Attributes) -> EntityDeleteBuilder {
        EntityDeleteBuilder {
            repo: self.clone(),
            key,
            condition: None,
            return_old: false,
        }
    }

    /// Prepare a transactional condition check against the item under the
    /// given key value
    pub fn condition_check(&self, key: Attributes, condition: Condition) -> EntityConditionCheckBuilder {
        EntityConditionCheckBuilder {
            repo: self.clone(),
            key,
            condition,
        }
    }

    /// Construct a named query
    ///
    /// The query's factory runs immediately; the input is validated
    /// against the query's schema when the returned query is executed,
    /// before anything reaches the store.
    pub fn query(&self, name: &str, input: Attributes) -> Result<EntityQuery, Error> {
        let named = self
            .definition
            .queries
            .get(name)
            .ok_or_else(|| Error::UnknownQuery {
                name: name.to_owned(),
                entity: self.definition.name.to_string(),
            })?;

        let context = EntityQueryContext { repo: self };
        let operation = match (named.factory)(&context, &input)? {
            ReadOperation::Query(builder) => {
                ReadOperation::Query(builder.filter(self.discriminator_filter()))
            }
            ReadOperation::Scan(builder) => {
                ReadOperation::Scan(builder.filter(self.discriminator_filter()))
            }
            get => get,
        };

        Ok(EntityQuery {
            repo: self.clone(),
            schema: Arc::clone(&named.schema),
            input,
            operation,
        })
    }

    /// Prepare a scan of the table narrowed to this entity kind
    pub fn scan(&self) -> EntityScanBuilder {
        EntityScanBuilder {
            repo: self.clone(),
            inner: ScanBuilder::new().filter(self.discriminator_filter()),
        }
    }

    fn discriminator_condition(&self) -> Condition {
        Condition::new("#entity_type = :entity_type")
            .name("#entity_type", self.definition.discriminator_attr())
            .value(":entity_type", self.definition.name.as_str())
    }

    fn discriminator_filter(&self) -> Filter {
        Filter::new("#entity_type = :entity_type")
            .name("#entity_type", self.definition.discriminator_attr())
            .value(":entity_type", self.definition.name.as_str())
    }

    /// Generate the primary key attribute map from a validated key image
    fn primary_key_map(&self, image: &Attributes) -> Result<Attributes, Error> {
        let input = KeyInput::new(image);
        let key = (self.definition.primary_key)(&input);
        let missing = input.into_missing();

        if !key.is_well_formed(self.table.sort_attr().is_some()) {
            return Err(Error::MissingAttributes {
                index: "primary".to_owned(),
                attributes: missing,
            });
        }

        let mut map = Attributes::new();
        map.insert(
            self.table.partition_attr().to_owned(),
            serde_json::Value::String(key.pk),
        );
        if let (Some(attr), Some(sk)) = (self.table.sort_attr(), key.sk) {
            map.insert(attr.to_owned(), serde_json::Value::String(sk));
        }
        Ok(map)
    }

    /// Admit a read item into typed results: reject foreign entity kinds
    /// and strip the infrastructure key attributes unless opted in.
    fn admit(&self, item: Attributes, include_indexes: bool) -> Option<Attributes> {
        if let Some(serde_json::Value::String(kind)) =
            item.get(self.definition.discriminator_attr())
        {
            if kind != self.definition.name.as_str() {
                return None;
            }
        }
        if include_indexes {
            Some(item)
        } else {
            Some(self.strip_key_attributes(item))
        }
    }

    fn strip_key_attributes(&self, mut item: Attributes) -> Attributes {
        item.remove(self.table.partition_attr());
        if let Some(attr) = self.table.sort_attr() {
            item.remove(attr);
        }
        for spec in self.definition.engine.secondaries() {
            item.remove(spec.partition_attr());
            if let Some(attr) = spec.sort_attr_name() {
                item.remove(attr);
            }
        }
        item
    }
}

fn validate_sync(schema: &Arc<dyn SchemaValidator>, value: Attributes) -> Result<Attributes, Error> {
    match schema.validate(value) {
        Validation::Ready(Ok(value)) => Ok(value),
        Validation::Ready(Err(issues)) => Err(Error::validation_failed(issues)),
        Validation::Deferred(_) => Err(Error::UnsupportedAsyncValidation),
    }
}

async fn validate_direct(
    schema: &Arc<dyn SchemaValidator>,
    value: Attributes,
) -> Result<Attributes, Error> {
    match schema.validate(value) {
        Validation::Ready(Ok(value)) => Ok(value),
        Validation::Ready(Err(issues)) => Err(Error::validation_failed(issues)),
        Validation::Deferred(fut) => fut.await.map_err(Error::validation_failed),
    }
}

/// An entity-aware put, produced by `create` and `upsert`
///
/// Validation, timestamp stamping, and key generation run at submission,
/// and re-run on every submission, so the builder can be retargeted
/// between direct execution, a batch, and a transaction.
#[derive(Clone, Debug)]
#[must_use]
pub struct EntityPutBuilder {
    repo: EntityRepository,
    value: Attributes,
    guard_new: bool,
    condition: Option<Condition>,
    return_values: PutReturnValues,
}

impl EntityPutBuilder {
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

    fn assemble(&self, validated: Attributes) -> Result<PutBuilder, Error> {
        let repo = &self.repo;
        let definition = &repo.definition;
        let mut item = validated;

        if let Some(policy) = &definition.timestamps.created_at {
            if !item.contains_key(policy.attribute()) {
                item.insert(policy.attribute().to_owned(), policy.now());
            }
        }
        if let Some(policy) = &definition.timestamps.updated_at {
            if !item.contains_key(policy.attribute()) {
                item.insert(policy.attribute().to_owned(), policy.now());
            }
        }

        let primary = repo.primary_key_map(&item)?;
        let index_attrs = definition.engine.build_for_create(&item, true)?;

        item.insert(
            definition.discriminator_attr.clone(),
            serde_json::Value::String(definition.name.to_string()),
        );
        item.extend(primary);
        item.extend(index_attrs);

        let mut builder = PutBuilder::new(item).return_values(self.return_values);
        if self.guard_new {
            let guard = Condition::new("attribute_not_exists(#pk)")
                .name("#pk", repo.table.partition_attr());
            builder = builder.condition(guard);
        }
        if let Some(condition) = &self.condition {
            builder = builder.condition(condition.clone());
        }
        Ok(builder)
    }

    async fn materialize(&self) -> Result<PutBuilder, Error> {
        let validated = validate_direct(&self.repo.definition.schema, self.value.clone()).await?;
        self.assemble(validated)
    }

    fn materialize_sync(&self) -> Result<PutBuilder, Error> {
        let validated = validate_sync(&self.repo.definition.schema, self.value.clone())?;
        self.assemble(validated)
    }

    /// Submit the put directly
    pub async fn execute(&self) -> Result<Option<Attributes>, Error> {
        let builder = self.materialize().await?;
        builder.execute(&self.repo.table).await
    }

    /// Submit the put directly, honoring a cancellation signal
    pub async fn execute_canceling(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Attributes>, Error> {
        let builder = self.materialize().await?;
        store::await_cancellable(Some(cancel), builder.execute(&self.repo.table)).await
    }

    /// Collect the put into a batch
    ///
    /// Batched writes cannot carry conditions; the new-item guard and any
    /// attached condition do not apply on this path.
    pub fn with_batch(&self, batch: &mut Batch) -> Result<(), Error> {
        let builder = self.materialize_sync()?;
        batch.collect_put(
            builder.item().clone(),
            Some(self.repo.definition.name.clone()),
            self.repo.definition.discriminator_attr.clone(),
        );
        Ok(())
    }

    /// Collect the put into a transaction
    pub fn with_transaction(&self, tx: &mut Transaction) -> Result<(), Error> {
        let builder = self.materialize_sync()?;
        tx.collect(TransactAction::Put(builder.to_command()));
        Ok(())
    }
}

/// An entity-aware get
///
/// By default the returned item is stripped of the primary and secondary
/// index key attributes so callers receive a clean entity shape; call
/// [`include_indexes`][Self::include_indexes] to opt them back in.
#[derive(Clone, Debug)]
#[must_use]
pub struct EntityGetBuilder {
    repo: EntityRepository,
    key: Attributes,
    select: Option<Vec<Path>>,
    consistent_read: bool,
    include_indexes: bool,
}

impl EntityGetBuilder {
    /// Narrow the returned attributes to the given dotted paths
    pub fn select<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        self.select = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Require a strongly consistent read
    pub fn consistent_read(mut self) -> Self {
        self.consistent_read = true;
        self
    }

    /// Keep the index key attributes on the returned item
    pub fn include_indexes(mut self) -> Self {
        self.include_indexes = true;
        self
    }

    fn assemble(&self, key_image: Attributes) -> Result<GetBuilder, Error> {
        let key = self.repo.primary_key_map(&key_image)?;
        let mut builder = GetBuilder::new(key);
        if let Some(paths) = &self.select {
            builder = builder.select(paths.iter().cloned());
        }
        if self.consistent_read {
            builder = builder.consistent_read();
        }
        Ok(builder)
    }

    /// Submit the get directly
    pub async fn execute(&self) -> Result<Option<Attributes>, Error> {
        let key_image = validate_direct(&self.repo.definition.key_schema, self.key.clone()).await?;
        let builder = self.assemble(key_image)?;
        let item = builder.execute(&self.repo.table).await?;
        Ok(item.and_then(|item| self.repo.admit(item, self.include_indexes)))
    }

    /// Submit the get directly, honoring a cancellation signal
    pub async fn execute_canceling(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Attributes>, Error> {
        let key_image = validate_direct(&self.repo.definition.key_schema, self.key.clone()).await?;
        let builder = self.assemble(key_image)?;
        let item =
            store::await_cancellable(Some(cancel), builder.execute(&self.repo.table)).await?;
        Ok(item.and_then(|item| self.repo.admit(item, self.include_indexes)))
    }

    /// Collect the get into a batch, tagged with this entity kind
    pub fn with_batch(&self, batch: &mut Batch) -> Result<(), Error> {
        let key_image = validate_sync(&self.repo.definition.key_schema, self.key.clone())?;
        let builder = self.assemble(key_image)?;
        batch.collect_get(
            builder.key().clone(),
            Some(self.repo.definition.name.clone()),
            self.repo.definition.discriminator_attr.clone(),
        );
        Ok(())
    }
}

/// An entity-aware partial update
///
/// At submission the update stamps `updated_at` when configured, detects
/// which secondary indexes the patch touches, regenerates exactly those
/// key attributes from the merged image, and guards the write on the
/// discriminator attribute. The primary key attributes are never written.
#[derive(Clone, Debug)]
#[must_use]
pub struct EntityUpdateBuilder {
    repo: EntityRepository,
    key: Attributes,
    patch: Attributes,
    extra: crate::expr::Update,
    condition: Option<Condition>,
    return_values: UpdateReturnValues,
    force_rebuild: BTreeSet<String>,
}

impl EntityUpdateBuilder {
    /// Merge more attributes into the patch
    pub fn set(mut self, patch: Attributes) -> Self {
        for (attr, value) in patch {
            self.patch.insert(attr, value);
        }
        self
    }

    /// Assign a single value at a dotted path
    pub fn set_value(mut self, path: impl Into<Path>, value: impl serde::Serialize) -> Self {
        self.extra = self.extra.set(path, value);
        self
    }

    /// Remove the attribute at a dotted path
    pub fn remove(mut self, path: impl Into<Path>) -> Self {
        self.extra = self.extra.remove(path);
        self
    }

    /// Add a number to, or union elements into, the attribute at a path
    pub fn add(mut self, path: impl Into<Path>, value: impl serde::Serialize) -> Self {
        self.extra = self.extra.add(path, value);
        self
    }

    /// Remove elements from the set-typed attribute at a path
    pub fn delete_elements_from_set<I, V>(mut self, path: impl Into<Path>, elements: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: serde::Serialize,
    {
        self.extra = self.extra.delete_elements(path, elements);
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

    /// Insist that the named read-only index be recomputed by this update
    pub fn force_index_rebuild(mut self, index: impl Into<String>) -> Self {
        self.force_rebuild.insert(index.into());
        self
    }

    /// Insist that each named read-only index be recomputed by this update
    pub fn force_index_rebuilds<I, S>(mut self, indexes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.force_rebuild.extend(indexes.into_iter().map(Into::into));
        self
    }

    fn assemble(&self, key_image: Attributes) -> Result<UpdateBuilder, Error> {
        let repo = &self.repo;
        let definition = &repo.definition;
        let key = repo.primary_key_map(&key_image)?;

        // The primary key is immutable and the discriminator is owned by
        // the repository; neither may appear in the set payload.
        let mut patch = self.patch.clone();
        patch.remove(&definition.discriminator_attr);
        patch.remove(repo.table.partition_attr());
        if let Some(attr) = repo.table.sort_attr() {
            patch.remove(attr);
        }

        let mut stamped = Attributes::new();
        if let Some(policy) = &definition.timestamps.updated_at {
            if !patch.contains_key(policy.attribute()) {
                stamped.insert(policy.attribute().to_owned(), policy.now());
            }
        }

        let mut diff_patch = patch.clone();
        for action in self.extra.actions() {
            if let UpdateAction::Set { path, value } = action {
                if path.is_top_level() {
                    diff_patch.insert(path.root().to_owned(), value.clone());
                }
            }
        }

        let index_updates =
            definition
                .engine
                .build_for_update(&key_image, &diff_patch, &self.force_rebuild)?;

        let mut builder = UpdateBuilder::new(key).return_values(self.return_values);
        for (attr, value) in patch {
            builder = builder.set(Path::parse(&attr), value);
        }
        for (attr, value) in stamped {
            builder = builder.set(Path::parse(&attr), value);
        }
        for (attr, value) in index_updates {
            builder = builder.set(Path::parse(&attr), value);
        }
        for action in self.extra.actions() {
            builder = match action.clone() {
                UpdateAction::Set { path, value } => builder.set(path, value),
                UpdateAction::Remove { path } => builder.remove(path),
                UpdateAction::Add { path, value } => builder.add(path, value),
                UpdateAction::DeleteElements { path, elements } => {
                    builder.delete_elements(path, elements)
                }
            };
        }

        builder = builder.condition(repo.discriminator_condition());
        if let Some(condition) = &self.condition {
            builder = builder.condition(condition.clone());
        }
        Ok(builder)
    }

    /// Submit the update directly
    pub async fn execute(&self) -> Result<Option<Attributes>, Error> {
        let key_image = validate_direct(&self.repo.definition.key_schema, self.key.clone()).await?;
        let builder = self.assemble(key_image)?;
        builder.execute(&self.repo.table).await
    }

    /// Submit the update directly, honoring a cancellation signal
    pub async fn execute_canceling(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Attributes>, Error> {
        let key_image = validate_direct(&self.repo.definition.key_schema, self.key.clone()).await?;
        let builder = self.assemble(key_image)?;
        store::await_cancellable(Some(cancel), builder.execute(&self.repo.table)).await
    }

    /// Collect the update into a transaction
    pub fn with_transaction(&self, tx: &mut Transaction) -> Result<(), Error> {
        let key_image = validate_sync(&self.repo.definition.key_schema, self.key.clone())?;
        let builder = self.assemble(key_image)?;
        tx.collect(TransactAction::Update(builder.to_command()?));
        Ok(())
    }
}

/// An entity-aware delete, guarded on the discriminator attribute
#[derive(Clone, Debug)]
#[must_use]
pub struct EntityDeleteBuilder {
    repo: EntityRepository,
    key: Attributes,
    condition: Option<Condition>,
    return_old: bool,
}

impl EntityDeleteBuilder {
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

    fn assemble(&self, key_image: Attributes) -> Result<DeleteBuilder, Error> {
        let key = self.repo.primary_key_map(&key_image)?;
        let mut builder = DeleteBuilder::new(key).condition(self.repo.discriminator_condition());
        if let Some(condition) = &self.condition {
            builder = builder.condition(condition.clone());
        }
        if self.return_old {
            builder = builder.return_all_old();
        }
        Ok(builder)
    }

    /// Submit the delete directly
    pub async fn execute(&self) -> Result<Option<Attributes>, Error> {
        let key_image = validate_direct(&self.repo.definition.key_schema, self.key.clone()).await?;
        let builder = self.assemble(key_image)?;
        builder.execute(&self.repo.table).await
    }

    /// Submit the delete directly, honoring a cancellation signal
    pub async fn execute_canceling(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Attributes>, Error> {
        let key_image = validate_direct(&self.repo.definition.key_schema, self.key.clone()).await?;
        let builder = self.assemble(key_image)?;
        store::await_cancellable(Some(cancel), builder.execute(&self.repo.table)).await
    }

    /// Collect the delete into a batch
    ///
    /// Batched writes cannot carry conditions; the discriminator guard
    /// does not apply on this path.
    pub fn with_batch(&self, batch: &mut Batch) -> Result<(), Error> {
        let key_image = validate_sync(&self.repo.definition.key_schema, self.key.clone())?;
        let key = self.repo.primary_key_map(&key_image)?;
        batch.collect_delete(
            key,
            Some(self.repo.definition.name.clone()),
            self.repo.definition.discriminator_attr.clone(),
        );
        Ok(())
    }

    /// Collect the delete into a transaction
    pub fn with_transaction(&self, tx: &mut Transaction) -> Result<(), Error> {
        let key_image = validate_sync(&self.repo.definition.key_schema, self.key.clone())?;
        let builder = self.assemble(key_image)?;
        tx.collect(TransactAction::Delete(builder.to_command()));
        Ok(())
    }
}

/// An entity-aware condition check, for transactional writes
#[derive(Clone, Debug)]
#[must_use]
pub struct EntityConditionCheckBuilder {
    repo: EntityRepository,
    key: Attributes,
    condition: Condition,
}

impl EntityConditionCheckBuilder {
    /// Collect the condition check into a transaction
    pub fn with_transaction(&self, tx: &mut Transaction) -> Result<(), Error> {
        let key_image = validate_sync(&self.repo.definition.key_schema, self.key.clone())?;
        let key = self.repo.primary_key_map(&key_image)?;
        let condition = self
            .repo
            .discriminator_condition()
            .and(self.condition.clone());
        tx.collect(TransactAction::ConditionCheck { key, condition });
        Ok(())
    }
}

/// An entity-aware scan, narrowed to the repository's entity kind
#[derive(Clone, Debug)]
#[must_use]
pub struct EntityScanBuilder {
    repo: EntityRepository,
    inner: ScanBuilder,
}

impl EntityScanBuilder {
    /// Target a secondary index instead of the primary index
    pub fn use_index(mut self, index: impl Into<crate::IndexName>) -> Self {
        self.inner = self.inner.use_index(index);
        self
    }

    /// Apply a further filter, conjoining with the entity narrowing
    pub fn filter(mut self, filter: Filter) -> Self {
        self.inner = self.inner.filter(filter);
        self
    }

    /// Narrow the returned attributes to the given dotted paths
    pub fn select<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        self.inner = self.inner.select(paths);
        self
    }

    /// Cap the number of items evaluated per page
    pub fn limit(mut self, limit: u32) -> Self {
        self.inner = self.inner.limit(limit);
        self
    }

    /// Resume from a previously returned cursor
    pub fn start_from(mut self, cursor: Attributes) -> Self {
        self.inner = self.inner.start_from(cursor);
        self
    }

    /// Execute a single page of the scan
    pub async fn execute(&self) -> Result<PageOutput, Error> {
        self.inner.execute(&self.repo.table).await
    }

    /// Iterate the scan lazily, fetching pages as the consumer advances
    pub fn paginate(&self, page_size: Option<u32>) -> Result<Pages, Error> {
        self.inner.paginate(&self.repo.table, page_size)
    }
}

/// The context handed to a named query's factory
///
/// Exposes only the read-side builders; the factory picks one, shapes it,
/// and returns it.
pub struct EntityQueryContext<'a> {
    repo: &'a EntityRepository,
}

impl fmt::Debug for EntityQueryContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityQueryContext")
            .field("entity", &self.repo.definition.name)
            .finish()
    }
}

impl EntityQueryContext<'_> {
    /// A get of the item under the given key value
    pub fn get(&self, key: Attributes) -> Result<GetBuilder, Error> {
        let key_image = validate_sync(&self.repo.definition.key_schema, key)?;
        let key = self.repo.primary_key_map(&key_image)?;
        Ok(GetBuilder::new(key))
    }

    /// A query builder against the repository's table
    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::new()
    }

    /// A scan builder against the repository's table
    pub fn scan(&self) -> ScanBuilder {
        ScanBuilder::new()
    }
}

/// A constructed named query, ready for execution
///
/// The caller's input is validated against the query's schema when the
/// query is executed, before anything reaches the store.
#[must_use]
pub struct EntityQuery {
    repo: EntityRepository,
    schema: Arc<dyn SchemaValidator>,
    input: Attributes,
    operation: ReadOperation,
}

impl fmt::Debug for EntityQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityQuery")
            .field("entity", &self.repo.definition.name)
            .field("operation", &self.operation)
            .finish()
    }
}

impl EntityQuery {
    /// Validate the input and run the query, yielding a lazy result
    pub async fn execute(self) -> Result<Pages, Error> {
        self.execute_paged(None).await
    }

    /// Validate the input and run the query with an explicit page size
    pub async fn execute_paged(self, page_size: Option<u32>) -> Result<Pages, Error> {
        validate_direct(&self.schema, self.input.clone()).await?;

        match &self.operation {
            ReadOperation::Query(builder) => builder.paginate(&self.repo.table, page_size),
            ReadOperation::Scan(builder) => builder.paginate(&self.repo.table, page_size),
            ReadOperation::Get(builder) => {
                let item = builder.execute(&self.repo.table).await?;
                Ok(Pages::ready(
                    item.and_then(|item| self.repo.admit(item, false))
                        .into_iter()
                        .collect(),
                ))
            }
        }
    }
}
