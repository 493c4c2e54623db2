//! Test support: an in-memory store client and a small schema validator
//!
//! The in-memory store implements the same contract as the DynamoDB-backed
//! client over a `BTreeMap`, interpreting the condition and filter
//! expression shapes the entity layer emits. It also records sub-batch
//! sizes and can be told to leave part of each write sub-batch
//! unprocessed, so batch chunking and unprocessed propagation are
//! observable from tests.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use entable::{
    expr::{Path, Projection, SortKeyTest, Update, UpdateAction},
    schema::{Issue, SchemaValidator, Validation},
    store::{
        BatchGetOutput, BatchWriteOutput, BatchWriteRequest, DeleteCommand, GetCommand,
        PageOutput, PutCommand, QueryCommand, ReadOutput, ScanCommand, StoreClient,
        TransactAction, UpdateCommand, UpdateReturnValues, WriteOutput,
    },
    Attributes, CancellationReason, Error,
};

pub fn attrs(value: serde_json::Value) -> Attributes {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("expected a JSON object"),
    }
}

/// A validator that requires the listed attributes to be present and
/// non-null, and fills in declared defaults
#[derive(Clone, Debug, Default)]
pub struct TestSchema {
    required: Vec<String>,
    defaults: Vec<(String, serde_json::Value)>,
}

impl TestSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, attr: &str) -> Self {
        self.required.push(attr.to_owned());
        self
    }

    pub fn default_value(mut self, attr: &str, value: serde_json::Value) -> Self {
        self.defaults.push((attr.to_owned(), value));
        self
    }

    fn check(&self, mut value: Attributes) -> Result<Attributes, Vec<Issue>> {
        let issues: Vec<Issue> = self
            .required
            .iter()
            .filter(|attr| {
                matches!(value.get(attr.as_str()), None | Some(serde_json::Value::Null))
            })
            .map(|attr| Issue::at(attr.clone(), "is required"))
            .collect();
        if !issues.is_empty() {
            return Err(issues);
        }
        for (attr, default) in &self.defaults {
            value
                .entry(attr.clone())
                .or_insert_with(|| default.clone());
        }
        Ok(value)
    }
}

impl SchemaValidator for TestSchema {
    fn validate(&self, value: Attributes) -> Validation {
        Validation::Ready(self.check(value))
    }
}

/// A validator that always defers its completion
#[derive(Clone, Debug, Default)]
pub struct DeferredSchema {
    inner: TestSchema,
}

impl DeferredSchema {
    pub fn new(inner: TestSchema) -> Self {
        Self { inner }
    }
}

impl SchemaValidator for DeferredSchema {
    fn validate(&self, value: Attributes) -> Validation {
        let inner = self.inner.clone();
        Validation::Deferred(Box::pin(async move { inner.check(value) }))
    }
}

#[derive(Default)]
struct State {
    items: BTreeMap<String, Attributes>,
    write_batch_sizes: Vec<usize>,
    get_batch_sizes: Vec<usize>,
    write_quota_per_batch: Option<usize>,
    get_quota_per_batch: Option<usize>,
}

/// An in-memory store client for exercising the entity layer end to end
pub struct InMemoryStore {
    partition_attr: String,
    sort_attr: Option<String>,
    state: Mutex<State>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("partition_attr", &self.partition_attr)
            .field("sort_attr", &self.sort_attr)
            .finish()
    }
}

impl InMemoryStore {
    pub fn new(partition_attr: &str, sort_attr: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            partition_attr: partition_attr.to_owned(),
            sort_attr: sort_attr.map(str::to_owned),
            state: Mutex::new(State::default()),
        })
    }

    /// The item stored under the given primary key values, if any
    pub fn raw_item(&self, pk: &str, sk: Option<&str>) -> Option<Attributes> {
        let mut key = Attributes::new();
        key.insert(
            self.partition_attr.clone(),
            serde_json::Value::String(pk.to_owned()),
        );
        if let (Some(attr), Some(sk)) = (&self.sort_attr, sk) {
            key.insert(attr.clone(), serde_json::Value::String(sk.to_owned()));
        }
        let id = self.identity(&key);
        self.state.lock().unwrap().items.get(&id).cloned()
    }

    pub fn item_count(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    /// The size of every write sub-batch dispatched so far
    pub fn write_batch_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().write_batch_sizes.clone()
    }

    /// The size of every read sub-batch dispatched so far
    pub fn get_batch_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().get_batch_sizes.clone()
    }

    /// Process at most `quota` writes of each sub-batch, returning the rest
    /// unprocessed
    pub fn set_write_quota_per_batch(&self, quota: usize) {
        self.state.lock().unwrap().write_quota_per_batch = Some(quota);
    }

    /// Read at most `quota` keys of each sub-batch, returning the rest
    /// unprocessed
    pub fn set_get_quota_per_batch(&self, quota: usize) {
        self.state.lock().unwrap().get_quota_per_batch = Some(quota);
    }

    fn identity(&self, source: &Attributes) -> String {
        let pk = source
            .get(&self.partition_attr)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let sk = self
            .sort_attr
            .as_ref()
            .and_then(|attr| source.get(attr))
            .map(|v| v.to_string())
            .unwrap_or_default();
        format!("{pk}\u{1}{sk}")
    }

    fn key_map(&self, item: &Attributes) -> Attributes {
        let mut key = Attributes::new();
        if let Some(value) = item.get(&self.partition_attr) {
            key.insert(self.partition_attr.clone(), value.clone());
        }
        if let Some(attr) = &self.sort_attr {
            if let Some(value) = item.get(attr) {
                key.insert(attr.clone(), value.clone());
            }
        }
        key
    }
}

fn name_table(names: &[(String, String)]) -> HashMap<&str, &str> {
    names
        .iter()
        .map(|(placeholder, attr)| (placeholder.as_str(), attr.as_str()))
        .collect()
}

fn value_table<'a>(
    values: &'a [(String, serde_json::Value)],
    sensitive: &'a [(String, serde_json::Value)],
) -> HashMap<&'a str, &'a serde_json::Value> {
    values
        .iter()
        .chain(sensitive)
        .map(|(placeholder, value)| (placeholder.as_str(), value))
        .collect()
}

fn split_top_level_and(expression: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let bytes = expression.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b' ' if depth == 0 && expression[i..].starts_with(" AND ") => {
                parts.push(expression[start..i].trim());
                start = i + 5;
                i += 4;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(expression[start..].trim());
    parts
}

fn strip_outer_parens(mut expression: &str) -> &str {
    loop {
        let trimmed = expression.trim();
        if !(trimmed.starts_with('(') && trimmed.ends_with(')')) {
            return trimmed;
        }
        let inner = &trimmed[1..trimmed.len() - 1];
        let mut depth = 0i64;
        let mut balanced = true;
        for byte in inner.bytes() {
            match byte {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth < 0 {
                        balanced = false;
                        break;
                    }
                }
                _ => {}
            }
        }
        if !balanced || depth != 0 {
            return trimmed;
        }
        expression = inner;
    }
}

/// Evaluate the condition and filter shapes the entity layer emits
fn eval_expression(
    expression: &str,
    names: &[(String, String)],
    values: &[(String, serde_json::Value)],
    sensitive: &[(String, serde_json::Value)],
    item: Option<&Attributes>,
) -> bool {
    let names = name_table(names);
    let values = value_table(values, sensitive);

    let resolve_attr = |placeholder: &str| -> &str {
        names
            .get(placeholder)
            .copied()
            .unwrap_or_else(|| panic!("unknown name placeholder `{placeholder}`"))
    };
    let resolve_value = |placeholder: &str| -> &serde_json::Value {
        values
            .get(placeholder)
            .copied()
            .unwrap_or_else(|| panic!("unknown value placeholder `{placeholder}`"))
    };

    for conjunct in split_top_level_and(expression) {
        let conjunct = strip_outer_parens(conjunct);

        let holds = if let Some(inner) = conjunct
            .strip_prefix("attribute_not_exists(")
            .and_then(|s| s.strip_suffix(')'))
        {
            let attr = resolve_attr(inner.trim());
            item.map(|i| !i.contains_key(attr)).unwrap_or(true)
        } else if let Some(inner) = conjunct
            .strip_prefix("attribute_exists(")
            .and_then(|s| s.strip_suffix(')'))
        {
            let attr = resolve_attr(inner.trim());
            item.map(|i| i.contains_key(attr)).unwrap_or(false)
        } else if let Some(inner) = conjunct
            .strip_prefix("begins_with(")
            .and_then(|s| s.strip_suffix(')'))
        {
            let (name, value) = inner
                .split_once(',')
                .expect("begins_with takes two arguments");
            let attr = resolve_attr(name.trim());
            let prefix = resolve_value(value.trim())
                .as_str()
                .expect("begins_with prefix must be a string");
            item.and_then(|i| i.get(attr))
                .and_then(|v| v.as_str())
                .map(|v| v.starts_with(prefix))
                .unwrap_or(false)
        } else if let Some((name, value)) = conjunct.split_once(" <> ") {
            let attr = resolve_attr(name.trim());
            let expected = resolve_value(value.trim());
            item.and_then(|i| i.get(attr)) != Some(expected)
        } else if let Some((name, value)) = conjunct.split_once(" = ") {
            let attr = resolve_attr(name.trim());
            let expected = resolve_value(value.trim());
            item.and_then(|i| i.get(attr)) == Some(expected)
        } else {
            panic!("unsupported condition in test store: `{conjunct}`");
        };

        if !holds {
            return false;
        }
    }
    true
}

fn eval_condition(condition: &entable::expr::Condition, item: Option<&Attributes>) -> bool {
    eval_expression(
        &condition.expression,
        &condition.names,
        &condition.values,
        &condition.sensitive_values,
        item,
    )
}

fn eval_filter(filter: &entable::expr::Filter, item: &Attributes) -> bool {
    eval_expression(
        &filter.expression,
        &filter.names,
        &filter.values,
        &filter.sensitive_values,
        Some(item),
    )
}

fn get_path<'a>(item: &'a Attributes, path: &Path) -> Option<&'a serde_json::Value> {
    let mut current = item.get(path.root())?;
    for segment in &path.segments()[1..] {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn set_path(item: &mut Attributes, path: &Path, value: serde_json::Value) {
    let segments = path.segments();
    let last = segments.len() - 1;
    if last == 0 {
        item.insert(segments[0].clone(), value);
        return;
    }

    let mut current: &mut serde_json::Value = item
        .entry(segments[0].clone())
        .or_insert_with(|| serde_json::Value::Object(Attributes::new()));
    for segment in &segments[1..last] {
        if !current.is_object() {
            *current = serde_json::Value::Object(Attributes::new());
        }
        current = match current {
            serde_json::Value::Object(map) => map
                .entry(segment.clone())
                .or_insert_with(|| serde_json::Value::Object(Attributes::new())),
            _ => unreachable!(),
        };
    }
    if !current.is_object() {
        *current = serde_json::Value::Object(Attributes::new());
    }
    if let serde_json::Value::Object(map) = current {
        map.insert(segments[last].clone(), value);
    }
}

fn remove_path(item: &mut Attributes, path: &Path) {
    let segments = path.segments();
    let last = segments.len() - 1;
    if last == 0 {
        item.remove(&segments[0]);
        return;
    }

    let mut current: &mut serde_json::Value = match item.get_mut(&segments[0]) {
        Some(value) => value,
        None => return,
    };
    for segment in &segments[1..last] {
        let next = match current {
            serde_json::Value::Object(map) => map.get_mut(segment.as_str()),
            _ => None,
        };
        current = match next {
            Some(value) => value,
            None => return,
        };
    }
    if let serde_json::Value::Object(map) = current {
        map.remove(&segments[last]);
    }
}

fn apply_update(item: &mut Attributes, update: &Update) {
    for action in update.actions() {
        match action {
            UpdateAction::Set { path, value } => set_path(item, path, value.clone()),
            UpdateAction::Remove { path } => remove_path(item, path),
            UpdateAction::Add { path, value } => match value {
                serde_json::Value::Array(elements) => {
                    let mut merged = get_path(item, path)
                        .and_then(|v| v.as_array())
                        .cloned()
                        .unwrap_or_default();
                    for element in elements {
                        if !merged.contains(element) {
                            merged.push(element.clone());
                        }
                    }
                    set_path(item, path, serde_json::Value::Array(merged));
                }
                number => {
                    let current = get_path(item, path).and_then(|v| v.as_i64()).unwrap_or(0);
                    let delta = number.as_i64().expect("ADD requires an integer in tests");
                    set_path(item, path, serde_json::Value::from(current + delta));
                }
            },
            UpdateAction::DeleteElements { path, elements } => {
                let remaining: Vec<serde_json::Value> = get_path(item, path)
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|element| !elements.contains(element))
                    .collect();
                set_path(item, path, serde_json::Value::Array(remaining));
            }
        }
    }
}

fn project(item: &Attributes, projection: &Projection) -> Attributes {
    let mut out = Attributes::new();
    for path in projection.paths() {
        if let Some(value) = get_path(item, path) {
            set_path(&mut out, path, value.clone());
        }
    }
    out
}

fn updated_roots(update: &Update, source: &Attributes) -> Attributes {
    let mut out = Attributes::new();
    for action in update.actions() {
        let root = action.path().root();
        if let Some(value) = source.get(root) {
            out.insert(root.to_owned(), value.clone());
        }
    }
    out
}

fn sort_test_holds(test: &SortKeyTest, actual: Option<&serde_json::Value>) -> bool {
    let actual_str = actual.and_then(|v| v.as_str());
    match test {
        SortKeyTest::Equal(expected) => actual == Some(expected),
        SortKeyTest::LessThan(expected) => {
            matches!((actual_str, expected.as_str()), (Some(a), Some(e)) if a < e)
        }
        SortKeyTest::LessThanOrEqual(expected) => {
            matches!((actual_str, expected.as_str()), (Some(a), Some(e)) if a <= e)
        }
        SortKeyTest::GreaterThan(expected) => {
            matches!((actual_str, expected.as_str()), (Some(a), Some(e)) if a > e)
        }
        SortKeyTest::GreaterThanOrEqual(expected) => {
            matches!((actual_str, expected.as_str()), (Some(a), Some(e)) if a >= e)
        }
        SortKeyTest::Between { start, end } => matches!(
            (actual_str, start.as_str(), end.as_str()),
            (Some(a), Some(s), Some(e)) if s <= a && a <= e
        ),
        SortKeyTest::BeginsWith(prefix) => {
            actual_str.map(|a| a.starts_with(prefix.as_str())).unwrap_or(false)
        }
    }
}

impl InMemoryStore {
    fn page(
        &self,
        matches: Vec<Attributes>,
        start_key: Option<&Attributes>,
        limit: Option<u32>,
        filter: Option<&entable::expr::Filter>,
        projection: Option<&Projection>,
    ) -> PageOutput {
        let start = match start_key {
            Some(cursor) => matches
                .iter()
                .position(|item| &self.key_map(item) == cursor)
                .map(|i| i + 1)
                .unwrap_or(0),
            None => 0,
        };

        let remaining = &matches[start.min(matches.len())..];
        let scanned = match limit {
            Some(limit) => &remaining[..remaining.len().min(limit as usize)],
            None => remaining,
        };
        let more = start + scanned.len() < matches.len();
        let last_evaluated_key = (more && !scanned.is_empty())
            .then(|| self.key_map(&scanned[scanned.len() - 1]));

        let items = scanned
            .iter()
            .filter(|item| filter.map(|f| eval_filter(f, item)).unwrap_or(true))
            .map(|item| match projection {
                Some(projection) if !projection.is_empty() => project(item, projection),
                _ => item.clone(),
            })
            .collect();

        PageOutput {
            items,
            last_evaluated_key,
        }
    }
}

#[async_trait]
impl StoreClient for InMemoryStore {
    async fn put(&self, _table: &str, command: PutCommand) -> Result<WriteOutput, Error> {
        let id = self.identity(&command.item);
        let mut state = self.state.lock().unwrap();
        let existing = state.items.get(&id);
        if let Some(condition) = &command.condition {
            if !eval_condition(condition, existing) {
                return Err(Error::ConditionFailed);
            }
        }
        let old = state.items.insert(id, command.item);
        Ok(WriteOutput {
            attributes: command.return_old.then_some(old).flatten(),
        })
    }

    async fn get(&self, _table: &str, command: GetCommand) -> Result<ReadOutput, Error> {
        let id = self.identity(&command.key);
        let state = self.state.lock().unwrap();
        let item = state.items.get(&id).map(|item| match &command.projection {
            Some(projection) if !projection.is_empty() => project(item, projection),
            _ => item.clone(),
        });
        Ok(ReadOutput { item })
    }

    async fn update(&self, _table: &str, command: UpdateCommand) -> Result<WriteOutput, Error> {
        let id = self.identity(&command.key);
        let mut state = self.state.lock().unwrap();
        let before = state.items.get(&id).cloned();
        if let Some(condition) = &command.condition {
            if !eval_condition(condition, before.as_ref()) {
                return Err(Error::ConditionFailed);
            }
        }
        let mut item = before.clone().unwrap_or_else(|| command.key.clone());
        apply_update(&mut item, &command.update);
        state.items.insert(id, item.clone());

        let attributes = match command.return_values {
            UpdateReturnValues::None => None,
            UpdateReturnValues::AllNew => Some(item),
            UpdateReturnValues::AllOld => before,
            UpdateReturnValues::UpdatedNew => Some(updated_roots(&command.update, &item)),
            UpdateReturnValues::UpdatedOld => {
                before.map(|before| updated_roots(&command.update, &before))
            }
        };
        Ok(WriteOutput { attributes })
    }

    async fn delete(&self, _table: &str, command: DeleteCommand) -> Result<WriteOutput, Error> {
        let id = self.identity(&command.key);
        let mut state = self.state.lock().unwrap();
        let existing = state.items.get(&id);
        if let Some(condition) = &command.condition {
            if !eval_condition(condition, existing) {
                return Err(Error::ConditionFailed);
            }
        }
        let old = state.items.remove(&id);
        Ok(WriteOutput {
            attributes: command.return_old.then_some(old).flatten(),
        })
    }

    async fn query(&self, _table: &str, command: QueryCommand) -> Result<PageOutput, Error> {
        let state = self.state.lock().unwrap();
        let key_condition = &command.key_condition;
        let mut matches: Vec<Attributes> = state
            .items
            .values()
            .filter(|item| {
                item.get(key_condition.partition_attr()) == Some(key_condition.partition_value())
            })
            .filter(|item| match key_condition.sort() {
                Some((attr, test)) => sort_test_holds(test, item.get(attr)),
                None => true,
            })
            .cloned()
            .collect();
        if !command.scan_forward {
            matches.reverse();
        }
        Ok(self.page(
            matches,
            command.start_key.as_ref(),
            command.limit,
            command.filter.as_ref(),
            command.projection.as_ref(),
        ))
    }

    async fn scan(&self, _table: &str, command: ScanCommand) -> Result<PageOutput, Error> {
        let state = self.state.lock().unwrap();
        let matches: Vec<Attributes> = state.items.values().cloned().collect();
        Ok(self.page(
            matches,
            command.start_key.as_ref(),
            command.limit,
            command.filter.as_ref(),
            command.projection.as_ref(),
        ))
    }

    async fn batch_write(
        &self,
        _table: &str,
        requests: Vec<BatchWriteRequest>,
    ) -> Result<BatchWriteOutput, Error> {
        let mut state = self.state.lock().unwrap();
        state.write_batch_sizes.push(requests.len());
        let quota = state.write_quota_per_batch;

        let mut unprocessed = Vec::new();
        for (index, request) in requests.into_iter().enumerate() {
            if quota.map(|q| index >= q).unwrap_or(false) {
                unprocessed.push(request);
                continue;
            }
            match request {
                BatchWriteRequest::Put { item } => {
                    let id = self.identity(&item);
                    state.items.insert(id, item);
                }
                BatchWriteRequest::Delete { key } => {
                    let id = self.identity(&key);
                    state.items.remove(&id);
                }
            }
        }
        Ok(BatchWriteOutput { unprocessed })
    }

    async fn batch_get(
        &self,
        _table: &str,
        keys: Vec<Attributes>,
    ) -> Result<BatchGetOutput, Error> {
        let mut state = self.state.lock().unwrap();
        state.get_batch_sizes.push(keys.len());
        let quota = state.get_quota_per_batch;

        let mut items = Vec::new();
        let mut unprocessed_keys = Vec::new();
        for (index, key) in keys.into_iter().enumerate() {
            if quota.map(|q| index >= q).unwrap_or(false) {
                unprocessed_keys.push(key);
                continue;
            }
            if let Some(item) = state.items.get(&self.identity(&key)) {
                items.push(item.clone());
            }
        }
        Ok(BatchGetOutput {
            items,
            unprocessed_keys,
        })
    }

    async fn transact_write(
        &self,
        _table: &str,
        actions: Vec<TransactAction>,
        _client_request_token: Option<String>,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();

        let mut failed = false;
        let reasons: Vec<CancellationReason> = actions
            .iter()
            .map(|action| {
                let (key, condition) = match action {
                    TransactAction::Put(command) => {
                        (self.identity(&command.item), command.condition.as_ref())
                    }
                    TransactAction::Update(command) => {
                        (self.identity(&command.key), command.condition.as_ref())
                    }
                    TransactAction::Delete(command) => {
                        (self.identity(&command.key), command.condition.as_ref())
                    }
                    TransactAction::ConditionCheck { key, condition } => {
                        (self.identity(key), Some(condition))
                    }
                };
                let existing = state.items.get(&key);
                let holds = condition
                    .map(|condition| eval_condition(condition, existing))
                    .unwrap_or(true);
                if holds {
                    CancellationReason {
                        code: Some("None".to_owned()),
                        message: None,
                    }
                } else {
                    failed = true;
                    CancellationReason {
                        code: Some("ConditionalCheckFailed".to_owned()),
                        message: Some("the conditional request failed".to_owned()),
                    }
                }
            })
            .collect();

        if failed {
            return Err(Error::TransactionFailed { reasons });
        }

        for action in actions {
            match action {
                TransactAction::Put(command) => {
                    let id = self.identity(&command.item);
                    state.items.insert(id, command.item);
                }
                TransactAction::Update(command) => {
                    let id = self.identity(&command.key);
                    let mut item = state
                        .items
                        .get(&id)
                        .cloned()
                        .unwrap_or_else(|| command.key.clone());
                    apply_update(&mut item, &command.update);
                    state.items.insert(id, item);
                }
                TransactAction::Delete(command) => {
                    let id = self.identity(&command.key);
                    state.items.remove(&id);
                }
                TransactAction::ConditionCheck { .. } => {}
            }
        }
        Ok(())
    }
}

use entable::{
    expr::KeyCondition,
    keys::{GeneratedKey, IndexSpec},
    EntityDefinition, Table,
};

pub fn table(store: Arc<InMemoryStore>) -> Table {
    Table::builder("TestTable", store)
        .partition_attr("pk")
        .sort_attr("sk")
        .build()
}

pub fn dinosaur_definition() -> EntityDefinition {
    EntityDefinition::builder("Dinosaur")
        .schema(TestSchema::new().require("id"))
        .key_schema(TestSchema::new().require("id"))
        .primary_key(|v| {
            GeneratedKey::new(
                format!("DINOSAUR#{}", v.get("id")),
                format!("DINOSAUR#{}", v.get("id")),
            )
        })
        .secondary_index(
            IndexSpec::new("paleontologist-index", "gsi1pk", |v| {
                GeneratedKey::new(
                    format!("PALEONTOLOGIST#{}", v.get("paleontologistId")),
                    format!("DINOSAUR#{}", v.get("id")),
                )
            })
            .sort_attr("gsi1sk"),
        )
        .secondary_index(
            IndexSpec::new("species-diet-index", "gsi2pk", |v| {
                GeneratedKey::new(
                    format!("SPECIES#{}", v.get("species")),
                    format!("DIET#{}#{}", v.get("diet"), v.get("id")),
                )
            })
            .sort_attr("gsi2sk"),
        )
        .secondary_index(
            IndexSpec::new("excavation-site-index", "gsi3pk", |v| {
                GeneratedKey::new(
                    format!("SITE#{}", v.get("excavationSiteId")),
                    format!("DINOSAUR#{}", v.get("id")),
                )
            })
            .sort_attr("gsi3sk")
            .read_only(),
        )
        .build()
}

pub fn user_definition() -> EntityDefinition {
    EntityDefinition::builder("User")
        .schema(TestSchema::new().require("id"))
        .key_schema(TestSchema::new().require("id"))
        .primary_key(|v| {
            GeneratedKey::new(format!("USER#{}", v.get("id")), format!("USER#{}", v.get("id")))
        })
        .secondary_index(
            IndexSpec::new("status-index", "gsi1pk", |v| {
                GeneratedKey::new(
                    format!("STATUS#{}", v.get("status")),
                    format!("USER#{}", v.get("id")),
                )
            })
            .sort_attr("gsi1sk"),
        )
        .query("byStatus", TestSchema::new().require("status"), |ctx, input| {
            let status = input
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned();
            Ok(ctx
                .query()
                .use_index("status-index")
                .key_condition(KeyCondition::partition("gsi1pk", format!("STATUS#{status}")))
                .into())
        })
        .build()
}
