//! The DynamoDB-backed store client
//!
//! Canonical commands are lowered to the wire here: attribute maps are
//! converted through `serde_dynamo`, structured key conditions, update
//! actions, and projections are rendered to placeholder expressions, and
//! every call is wrapped in a client span recording the operation and the
//! consumed capacity.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::{
    error::SdkError,
    operation::{
        delete_item::DeleteItemError, put_item::PutItemError,
        transact_write_items::TransactWriteItemsError, update_item::UpdateItemError,
    },
    types::{
        AttributeValue, ConsumedCapacity, DeleteRequest, KeysAndAttributes, PutRequest,
        ReturnConsumedCapacity, ReturnValue, WriteRequest,
    },
};
use serde_dynamo::aws_sdk_dynamodb_1 as codec;
use tracing::{field, Instrument};

use crate::{
    error::CancellationReason,
    expr::{self, SortKeyTest, UpdateAction},
    store::{
        BatchGetOutput, BatchWriteOutput, BatchWriteRequest, DeleteCommand, GetCommand,
        PageOutput, PutCommand, QueryCommand, ReadOutput, ScanCommand, StoreClient,
        TransactAction, UpdateCommand, UpdateReturnValues, WriteOutput,
    },
    Attributes, Error, Item,
};

/// A [`StoreClient`] backed by the AWS DynamoDB SDK
///
/// The client is cheap to clone and safe to share; retry, backoff, and
/// timeouts are whatever the underlying SDK client was configured with.
#[derive(Clone, Debug)]
pub struct DynamoStoreClient {
    client: aws_sdk_dynamodb::Client,
}

impl DynamoStoreClient {
    /// Wrap an SDK client
    pub fn new(client: aws_sdk_dynamodb::Client) -> Self {
        Self { client }
    }

    /// The underlying SDK client
    pub fn client(&self) -> &aws_sdk_dynamodb::Client {
        &self.client
    }
}

fn codec_error(error: serde_dynamo::Error) -> Error {
    Error::ItemCodec(Box::new(error))
}

fn to_item(attrs: &Attributes) -> Result<Item, Error> {
    codec::to_item(attrs).map_err(codec_error)
}

fn from_item(item: Item) -> Result<Attributes, Error> {
    codec::from_item(item).map_err(codec_error)
}

fn to_attribute_value(value: &serde_json::Value) -> Result<AttributeValue, Error> {
    codec::to_attribute_value(value).map_err(codec_error)
}

/// Convert a list of scalars into a native set attribute value, as
/// required by `ADD` and `DELETE` update actions
fn to_set_value(elements: &[serde_json::Value]) -> Result<AttributeValue, Error> {
    if !elements.is_empty() && elements.iter().all(|e| e.is_string()) {
        return Ok(AttributeValue::Ss(
            elements
                .iter()
                .map(|e| e.as_str().unwrap_or_default().to_owned())
                .collect(),
        ));
    }
    if !elements.is_empty() && elements.iter().all(|e| e.is_number()) {
        return Ok(AttributeValue::Ns(
            elements.iter().map(ToString::to_string).collect(),
        ));
    }
    Err(Error::ItemCodec(
        "set operations require a non-empty list of all-string or all-number elements".into(),
    ))
}

fn collect_names(names: Vec<(String, String)>) -> HashMap<String, String> {
    names.into_iter().collect()
}

fn collect_values(values: Vec<(String, serde_json::Value)>) -> Result<Item, Error> {
    values
        .into_iter()
        .map(|(name, value)| Ok((name, to_attribute_value(&value)?)))
        .collect()
}

/// Allocates one placeholder per distinct path segment
struct NamePool {
    prefix: &'static str,
    assigned: HashMap<String, String>,
    names: HashMap<String, String>,
}

impl NamePool {
    fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            assigned: HashMap::new(),
            names: HashMap::new(),
        }
    }

    fn segment(&mut self, segment: &str) -> String {
        if let Some(placeholder) = self.assigned.get(segment) {
            return placeholder.clone();
        }
        let placeholder = format!("{}_{:03}", self.prefix, self.assigned.len());
        self.assigned
            .insert(segment.to_owned(), placeholder.clone());
        self.names.insert(placeholder.clone(), segment.to_owned());
        placeholder
    }

    fn path(&mut self, path: &expr::Path) -> String {
        path.segments()
            .iter()
            .map(|segment| self.segment(segment))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn into_names(self) -> HashMap<String, String> {
        self.names
    }
}

struct RenderedUpdate {
    expression: String,
    names: HashMap<String, String>,
    values: Item,
}

fn render_update(update: &expr::Update) -> Result<RenderedUpdate, Error> {
    let mut pool = NamePool::new("#upd");
    let mut values = Item::default();
    let mut value_count = 0usize;
    let mut set_clauses = Vec::new();
    let mut remove_clauses = Vec::new();
    let mut add_clauses = Vec::new();
    let mut delete_clauses = Vec::new();

    let mut next_value = |values: &mut Item, value: AttributeValue| {
        let placeholder = format!(":upd_{value_count:03}");
        value_count += 1;
        values.insert(placeholder.clone(), value);
        placeholder
    };

    for action in update.actions() {
        let path = pool.path(action.path());
        match action {
            UpdateAction::Set { value, .. } => {
                let placeholder = next_value(&mut values, to_attribute_value(value)?);
                set_clauses.push(format!("{path} = {placeholder}"));
            }
            UpdateAction::Remove { .. } => {
                remove_clauses.push(path);
            }
            UpdateAction::Add { value, .. } => {
                let attribute = match value {
                    serde_json::Value::Array(elements) => to_set_value(elements)?,
                    other => to_attribute_value(other)?,
                };
                let placeholder = next_value(&mut values, attribute);
                add_clauses.push(format!("{path} {placeholder}"));
            }
            UpdateAction::DeleteElements { elements, .. } => {
                let placeholder = next_value(&mut values, to_set_value(elements)?);
                delete_clauses.push(format!("{path} {placeholder}"));
            }
        }
    }

    let mut expression = String::new();
    for (verb, clauses) in [
        ("SET", set_clauses),
        ("REMOVE", remove_clauses),
        ("ADD", add_clauses),
        ("DELETE", delete_clauses),
    ] {
        if clauses.is_empty() {
            continue;
        }
        if !expression.is_empty() {
            expression.push(' ');
        }
        expression.push_str(verb);
        expression.push(' ');
        expression.push_str(&clauses.join(", "));
    }

    Ok(RenderedUpdate {
        expression,
        names: pool.into_names(),
        values,
    })
}

fn render_projection(projection: &expr::Projection) -> (String, HashMap<String, String>) {
    let mut pool = NamePool::new("#prj");
    let expression = projection
        .paths()
        .iter()
        .map(|path| pool.path(path))
        .collect::<Vec<_>>()
        .join(",");
    (expression, pool.into_names())
}

const PARTITION_KEY_EXPRESSION: &str = "#key_PK = :key_PK";
const PARTITION_EQ_KEY_EXPRESSION: &str = "#key_PK = :key_PK AND #key_SK = :key_SK";
const PARTITION_BETWEEN_KEY_EXPRESSION: &str =
    "#key_PK = :key_PK AND #key_SK BETWEEN :key_SK_START AND :key_SK_END";
const PARTITION_LT_KEY_EXPRESSION: &str = "#key_PK = :key_PK AND #key_SK < :key_SK";
const PARTITION_LTE_KEY_EXPRESSION: &str = "#key_PK = :key_PK AND #key_SK <= :key_SK";
const PARTITION_GT_KEY_EXPRESSION: &str = "#key_PK = :key_PK AND #key_SK > :key_SK";
const PARTITION_GTE_KEY_EXPRESSION: &str = "#key_PK = :key_PK AND #key_SK >= :key_SK";
const PARTITION_BEGINS_WITH_KEY_EXPRESSION: &str =
    "#key_PK = :key_PK AND begins_with(#key_SK, :key_SK)";

struct RenderedKeyCondition {
    expression: &'static str,
    names: HashMap<String, String>,
    values: Item,
}

fn render_key_condition(condition: &expr::KeyCondition) -> Result<RenderedKeyCondition, Error> {
    let mut names = HashMap::new();
    names.insert(
        "#key_PK".to_owned(),
        condition.partition_attr().to_owned(),
    );

    let mut values = Item::default();
    values.insert(
        ":key_PK".to_owned(),
        to_attribute_value(condition.partition_value())?,
    );

    let expression = match condition.sort() {
        None => PARTITION_KEY_EXPRESSION,
        Some((attr, test)) => {
            names.insert("#key_SK".to_owned(), attr.to_owned());
            match test {
                SortKeyTest::Equal(value) => {
                    values.insert(":key_SK".to_owned(), to_attribute_value(value)?);
                    PARTITION_EQ_KEY_EXPRESSION
                }
                SortKeyTest::LessThan(value) => {
                    values.insert(":key_SK".to_owned(), to_attribute_value(value)?);
                    PARTITION_LT_KEY_EXPRESSION
                }
                SortKeyTest::LessThanOrEqual(value) => {
                    values.insert(":key_SK".to_owned(), to_attribute_value(value)?);
                    PARTITION_LTE_KEY_EXPRESSION
                }
                SortKeyTest::GreaterThan(value) => {
                    values.insert(":key_SK".to_owned(), to_attribute_value(value)?);
                    PARTITION_GT_KEY_EXPRESSION
                }
                SortKeyTest::GreaterThanOrEqual(value) => {
                    values.insert(":key_SK".to_owned(), to_attribute_value(value)?);
                    PARTITION_GTE_KEY_EXPRESSION
                }
                SortKeyTest::Between { start, end } => {
                    values.insert(":key_SK_START".to_owned(), to_attribute_value(start)?);
                    values.insert(":key_SK_END".to_owned(), to_attribute_value(end)?);
                    PARTITION_BETWEEN_KEY_EXPRESSION
                }
                SortKeyTest::BeginsWith(prefix) => {
                    values.insert(
                        ":key_SK".to_owned(),
                        AttributeValue::S(prefix.clone()),
                    );
                    PARTITION_BEGINS_WITH_KEY_EXPRESSION
                }
            }
        }
    };

    Ok(RenderedKeyCondition {
        expression,
        names,
        values,
    })
}

fn map_put_error(err: SdkError<PutItemError>) -> Error {
    match err {
        SdkError::ServiceError(e) if e.err().is_conditional_check_failed_exception() => {
            Error::ConditionFailed
        }
        other => Error::Store(Box::new(other)),
    }
}

fn map_update_error(err: SdkError<UpdateItemError>) -> Error {
    match err {
        SdkError::ServiceError(e) if e.err().is_conditional_check_failed_exception() => {
            Error::ConditionFailed
        }
        other => Error::Store(Box::new(other)),
    }
}

fn map_delete_error(err: SdkError<DeleteItemError>) -> Error {
    match err {
        SdkError::ServiceError(e) if e.err().is_conditional_check_failed_exception() => {
            Error::ConditionFailed
        }
        other => Error::Store(Box::new(other)),
    }
}

fn map_transact_error(err: SdkError<TransactWriteItemsError>) -> Error {
    match err {
        SdkError::ServiceError(e) => match e.into_err() {
            TransactWriteItemsError::TransactionCanceledException(canceled) => {
                let reasons = canceled
                    .cancellation_reasons
                    .unwrap_or_default()
                    .into_iter()
                    .map(|reason| CancellationReason {
                        code: reason.code,
                        message: reason.message,
                    })
                    .collect();
                Error::TransactionFailed { reasons }
            }
            other => Error::Store(Box::new(other)),
        },
        other => Error::Store(Box::new(other)),
    }
}

/// Which side of the capacity ledger a wire call consumes
#[derive(Clone, Copy)]
enum CapacityUse {
    Read,
    Write,
}

impl CapacityUse {
    fn span_field(self) -> &'static str {
        match self {
            Self::Read => "aws.dynamodb.consumed_read_capacity",
            Self::Write => "aws.dynamodb.consumed_write_capacity",
        }
    }

    fn units(self, capacity: &ConsumedCapacity) -> Option<f64> {
        let dedicated = match self {
            Self::Read => capacity.read_capacity_units(),
            Self::Write => capacity.write_capacity_units(),
        };
        dedicated.or(capacity.capacity_units())
    }
}

fn record_consumed_capacity(
    span: &tracing::Span,
    usage: CapacityUse,
    consumed_capacity: Option<&ConsumedCapacity>,
) {
    if let Some(capacity) = consumed_capacity {
        span.record(usage.span_field(), usage.units(capacity));
    }
}

fn build_transact_put(
    table: &str,
    command: PutCommand,
) -> Result<aws_sdk_dynamodb::types::Put, Error> {
    let mut builder = aws_sdk_dynamodb::types::Put::builder()
        .set_item(Some(to_item(&command.item)?))
        .table_name(table);

    if let Some(condition) = command.condition {
        let names = collect_names(condition.names);
        let mut values = collect_values(condition.values)?;
        values.extend(collect_values(condition.sensitive_values)?);
        builder = builder
            .set_condition_expression(Some(condition.expression))
            .set_expression_attribute_names((!names.is_empty()).then_some(names))
            .set_expression_attribute_values((!values.is_empty()).then_some(values));
    }

    Ok(builder
        .build()
        .expect("item and table name are always provided"))
}

fn build_transact_update(
    table: &str,
    command: UpdateCommand,
) -> Result<aws_sdk_dynamodb::types::Update, Error> {
    let rendered = render_update(&command.update)?;
    let mut names = rendered.names;
    let mut values = rendered.values;

    let mut builder = aws_sdk_dynamodb::types::Update::builder()
        .set_key(Some(to_item(&command.key)?))
        .update_expression(rendered.expression)
        .table_name(table);

    if let Some(condition) = command.condition {
        names.extend(collect_names(condition.names));
        values.extend(collect_values(condition.values)?);
        values.extend(collect_values(condition.sensitive_values)?);
        builder = builder.set_condition_expression(Some(condition.expression));
    }

    Ok(builder
        .set_expression_attribute_names((!names.is_empty()).then_some(names))
        .set_expression_attribute_values((!values.is_empty()).then_some(values))
        .build()
        .expect("key, update expression, and table name are always provided"))
}

fn build_transact_delete(
    table: &str,
    command: DeleteCommand,
) -> Result<aws_sdk_dynamodb::types::Delete, Error> {
    let mut builder = aws_sdk_dynamodb::types::Delete::builder()
        .set_key(Some(to_item(&command.key)?))
        .table_name(table);

    if let Some(condition) = command.condition {
        let names = collect_names(condition.names);
        let mut values = collect_values(condition.values)?;
        values.extend(collect_values(condition.sensitive_values)?);
        builder = builder
            .set_condition_expression(Some(condition.expression))
            .set_expression_attribute_names((!names.is_empty()).then_some(names))
            .set_expression_attribute_values((!values.is_empty()).then_some(values));
    }

    Ok(builder
        .build()
        .expect("key and table name are always provided"))
}

fn build_transact_condition_check(
    table: &str,
    key: Attributes,
    condition: expr::Condition,
) -> Result<aws_sdk_dynamodb::types::ConditionCheck, Error> {
    let names = collect_names(condition.names);
    let mut values = collect_values(condition.values)?;
    values.extend(collect_values(condition.sensitive_values)?);

    Ok(aws_sdk_dynamodb::types::ConditionCheck::builder()
        .set_key(Some(to_item(&key)?))
        .condition_expression(condition.expression)
        .set_expression_attribute_names((!names.is_empty()).then_some(names))
        .set_expression_attribute_values((!values.is_empty()).then_some(values))
        .table_name(table)
        .build()
        .expect("key, condition expression, and table name are always provided"))
}

#[async_trait]
impl StoreClient for DynamoStoreClient {
    async fn put(&self, table: &str, command: PutCommand) -> Result<WriteOutput, Error> {
        let item = to_item(&command.item)?;

        let span = tracing::info_span!(
            "DynamoDB.PutItem",
            span.kind = "client",
            db.system = "dynamodb",
            db.operation = "PutItem",
            db.name = table,
            aws.dynamodb.conditional_expression = field::Empty,
            aws.dynamodb.expression_attribute_names = field::Empty,
            aws.dynamodb.consumed_write_capacity = field::Empty,
        );

        let mut request = self
            .client
            .put_item()
            .table_name(table)
            .set_item(Some(item))
            .set_return_values(command.return_old.then_some(ReturnValue::AllOld))
            .return_consumed_capacity(ReturnConsumedCapacity::Total);

        if let Some(condition) = command.condition {
            span.record("aws.dynamodb.conditional_expression", &condition.expression);
            let names = collect_names(condition.names);
            span.record(
                "aws.dynamodb.expression_attribute_names",
                field::debug(&names),
            );
            let mut values = collect_values(condition.values)?;
            values.extend(collect_values(condition.sensitive_values)?);
            request = request
                .set_condition_expression(Some(condition.expression))
                .set_expression_attribute_names((!names.is_empty()).then_some(names))
                .set_expression_attribute_values((!values.is_empty()).then_some(values));
        }

        let result = request.send().instrument(span.clone()).await;
        match result {
            Ok(output) => {
                record_consumed_capacity(&span, CapacityUse::Write, output.consumed_capacity.as_ref());
                Ok(WriteOutput {
                    attributes: output.attributes.map(from_item).transpose()?,
                })
            }
            Err(err) => Err(map_put_error(err)),
        }
    }

    async fn get(&self, table: &str, command: GetCommand) -> Result<ReadOutput, Error> {
        let key = to_item(&command.key)?;

        let (projection_expression, projection_names) = match &command.projection {
            Some(projection) if !projection.is_empty() => {
                let (expression, names) = render_projection(projection);
                (Some(expression), names)
            }
            _ => (None, HashMap::new()),
        };

        let span = tracing::info_span!(
            "DynamoDB.GetItem",
            span.kind = "client",
            db.system = "dynamodb",
            db.operation = "GetItem",
            db.name = table,
            aws.dynamodb.projection = projection_expression.as_deref(),
            aws.dynamodb.consistent_read = command.consistent_read,
            aws.dynamodb.consumed_read_capacity = field::Empty,
        );

        let result = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key))
            .set_projection_expression(projection_expression)
            .set_expression_attribute_names(
                (!projection_names.is_empty()).then_some(projection_names),
            )
            .set_consistent_read(command.consistent_read.then_some(true))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .instrument(span.clone())
            .await;

        match result {
            Ok(output) => {
                record_consumed_capacity(&span, CapacityUse::Read, output.consumed_capacity.as_ref());
                Ok(ReadOutput {
                    item: output.item.map(from_item).transpose()?,
                })
            }
            Err(err) => Err(Error::Store(Box::new(err))),
        }
    }

    async fn update(&self, table: &str, command: UpdateCommand) -> Result<WriteOutput, Error> {
        let key = to_item(&command.key)?;
        let rendered = render_update(&command.update)?;

        let span = tracing::info_span!(
            "DynamoDB.UpdateItem",
            span.kind = "client",
            db.system = "dynamodb",
            db.operation = "UpdateItem",
            db.name = table,
            aws.dynamodb.update_expression = rendered.expression,
            aws.dynamodb.conditional_expression = field::Empty,
            aws.dynamodb.consumed_write_capacity = field::Empty,
        );

        let mut names = rendered.names;
        let mut values = rendered.values;

        let mut request = self
            .client
            .update_item()
            .table_name(table)
            .set_key(Some(key))
            .set_update_expression(Some(rendered.expression))
            .set_return_values(match command.return_values {
                UpdateReturnValues::None => None,
                UpdateReturnValues::AllNew => Some(ReturnValue::AllNew),
                UpdateReturnValues::UpdatedNew => Some(ReturnValue::UpdatedNew),
                UpdateReturnValues::AllOld => Some(ReturnValue::AllOld),
                UpdateReturnValues::UpdatedOld => Some(ReturnValue::UpdatedOld),
            })
            .return_consumed_capacity(ReturnConsumedCapacity::Total);

        if let Some(condition) = command.condition {
            span.record("aws.dynamodb.conditional_expression", &condition.expression);
            names.extend(collect_names(condition.names));
            values.extend(collect_values(condition.values)?);
            values.extend(collect_values(condition.sensitive_values)?);
            request = request.set_condition_expression(Some(condition.expression));
        }

        let result = request
            .set_expression_attribute_names((!names.is_empty()).then_some(names))
            .set_expression_attribute_values((!values.is_empty()).then_some(values))
            .send()
            .instrument(span.clone())
            .await;

        match result {
            Ok(output) => {
                record_consumed_capacity(&span, CapacityUse::Write, output.consumed_capacity.as_ref());
                Ok(WriteOutput {
                    attributes: output.attributes.map(from_item).transpose()?,
                })
            }
            Err(err) => Err(map_update_error(err)),
        }
    }

    async fn delete(&self, table: &str, command: DeleteCommand) -> Result<WriteOutput, Error> {
        let key = to_item(&command.key)?;

        let span = tracing::info_span!(
            "DynamoDB.DeleteItem",
            span.kind = "client",
            db.system = "dynamodb",
            db.operation = "DeleteItem",
            db.name = table,
            aws.dynamodb.conditional_expression = field::Empty,
            aws.dynamodb.consumed_write_capacity = field::Empty,
        );

        let mut request = self
            .client
            .delete_item()
            .table_name(table)
            .set_key(Some(key))
            .set_return_values(command.return_old.then_some(ReturnValue::AllOld))
            .return_consumed_capacity(ReturnConsumedCapacity::Total);

        if let Some(condition) = command.condition {
            span.record("aws.dynamodb.conditional_expression", &condition.expression);
            let names = collect_names(condition.names);
            let mut values = collect_values(condition.values)?;
            values.extend(collect_values(condition.sensitive_values)?);
            request = request
                .set_condition_expression(Some(condition.expression))
                .set_expression_attribute_names((!names.is_empty()).then_some(names))
                .set_expression_attribute_values((!values.is_empty()).then_some(values));
        }

        let result = request.send().instrument(span.clone()).await;
        match result {
            Ok(output) => {
                record_consumed_capacity(&span, CapacityUse::Write, output.consumed_capacity.as_ref());
                Ok(WriteOutput {
                    attributes: output.attributes.map(from_item).transpose()?,
                })
            }
            Err(err) => Err(map_delete_error(err)),
        }
    }

    async fn query(&self, table: &str, command: QueryCommand) -> Result<PageOutput, Error> {
        let rendered = render_key_condition(&command.key_condition)?;
        let mut names = rendered.names;
        let mut values = rendered.values;

        let (projection_expression, projection_names) = match &command.projection {
            Some(projection) if !projection.is_empty() => {
                let (expression, projection_names) = render_projection(projection);
                (Some(expression), projection_names)
            }
            _ => (None, HashMap::new()),
        };
        names.extend(projection_names);

        let filter_expression = match command.filter {
            Some(filter) => {
                names.extend(collect_names(filter.names));
                values.extend(collect_values(filter.values)?);
                values.extend(collect_values(filter.sensitive_values)?);
                Some(filter.expression)
            }
            None => None,
        };

        let span = tracing::info_span!(
            "DynamoDB.Query",
            span.kind = "client",
            db.system = "dynamodb",
            db.operation = "Query",
            db.name = table,
            aws.dynamodb.index_name = command.index.as_ref().map(|i| i.as_str()),
            aws.dynamodb.key_condition_expression = rendered.expression,
            aws.dynamodb.filter_expression = filter_expression.as_deref(),
            aws.dynamodb.projection = projection_expression.as_deref(),
            aws.dynamodb.limit = command.limit,
            aws.dynamodb.scan_forward = command.scan_forward,
            aws.dynamodb.consistent_read = command.consistent_read,
            aws.dynamodb.consumed_read_capacity = field::Empty,
            aws.dynamodb.scanned_count = field::Empty,
            aws.dynamodb.count = field::Empty,
            aws.dynamodb.has_next_page = field::Empty,
        );

        let result = self
            .client
            .query()
            .table_name(table)
            .set_index_name(command.index.map(|i| i.to_string()))
            .set_key_condition_expression(Some(rendered.expression.to_owned()))
            .set_filter_expression(filter_expression)
            .set_projection_expression(projection_expression)
            .set_limit(command.limit.map(|l| l.min(i32::MAX as u32) as i32))
            .set_consistent_read(command.consistent_read.then_some(true))
            .set_scan_index_forward((!command.scan_forward).then_some(false))
            .set_exclusive_start_key(command.start_key.as_ref().map(to_item).transpose()?)
            .set_expression_attribute_names((!names.is_empty()).then_some(names))
            .set_expression_attribute_values((!values.is_empty()).then_some(values))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .instrument(span.clone())
            .await;

        match result {
            Ok(output) => {
                record_consumed_capacity(&span, CapacityUse::Read, output.consumed_capacity.as_ref());
                span.record("aws.dynamodb.scanned_count", output.scanned_count);
                span.record("aws.dynamodb.count", output.count);
                span.record(
                    "aws.dynamodb.has_next_page",
                    output.last_evaluated_key.is_some(),
                );

                Ok(PageOutput {
                    items: output
                        .items
                        .unwrap_or_default()
                        .into_iter()
                        .map(from_item)
                        .collect::<Result<_, _>>()?,
                    last_evaluated_key: output.last_evaluated_key.map(from_item).transpose()?,
                })
            }
            Err(err) => Err(Error::Store(Box::new(err))),
        }
    }

    async fn scan(&self, table: &str, command: ScanCommand) -> Result<PageOutput, Error> {
        let mut names = HashMap::new();
        let mut values = Item::default();

        let (projection_expression, projection_names) = match &command.projection {
            Some(projection) if !projection.is_empty() => {
                let (expression, projection_names) = render_projection(projection);
                (Some(expression), projection_names)
            }
            _ => (None, HashMap::new()),
        };
        names.extend(projection_names);

        let filter_expression = match command.filter {
            Some(filter) => {
                names.extend(collect_names(filter.names));
                values.extend(collect_values(filter.values)?);
                values.extend(collect_values(filter.sensitive_values)?);
                Some(filter.expression)
            }
            None => None,
        };

        let span = tracing::info_span!(
            "DynamoDB.Scan",
            span.kind = "client",
            db.system = "dynamodb",
            db.operation = "Scan",
            db.name = table,
            aws.dynamodb.index_name = command.index.as_ref().map(|i| i.as_str()),
            aws.dynamodb.filter_expression = filter_expression.as_deref(),
            aws.dynamodb.projection = projection_expression.as_deref(),
            aws.dynamodb.limit = command.limit,
            aws.dynamodb.consistent_read = command.consistent_read,
            aws.dynamodb.consumed_read_capacity = field::Empty,
            aws.dynamodb.scanned_count = field::Empty,
            aws.dynamodb.count = field::Empty,
            aws.dynamodb.has_next_page = field::Empty,
        );

        let result = self
            .client
            .scan()
            .table_name(table)
            .set_index_name(command.index.map(|i| i.to_string()))
            .set_filter_expression(filter_expression)
            .set_projection_expression(projection_expression)
            .set_limit(command.limit.map(|l| l.min(i32::MAX as u32) as i32))
            .set_consistent_read(command.consistent_read.then_some(true))
            .set_exclusive_start_key(command.start_key.as_ref().map(to_item).transpose()?)
            .set_expression_attribute_names((!names.is_empty()).then_some(names))
            .set_expression_attribute_values((!values.is_empty()).then_some(values))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .instrument(span.clone())
            .await;

        match result {
            Ok(output) => {
                record_consumed_capacity(&span, CapacityUse::Read, output.consumed_capacity.as_ref());
                span.record("aws.dynamodb.scanned_count", output.scanned_count);
                span.record("aws.dynamodb.count", output.count);
                span.record(
                    "aws.dynamodb.has_next_page",
                    output.last_evaluated_key.is_some(),
                );

                Ok(PageOutput {
                    items: output
                        .items
                        .unwrap_or_default()
                        .into_iter()
                        .map(from_item)
                        .collect::<Result<_, _>>()?,
                    last_evaluated_key: output.last_evaluated_key.map(from_item).transpose()?,
                })
            }
            Err(err) => Err(Error::Store(Box::new(err))),
        }
    }

    async fn batch_write(
        &self,
        table: &str,
        requests: Vec<BatchWriteRequest>,
    ) -> Result<BatchWriteOutput, Error> {
        let span = tracing::info_span!(
            "DynamoDB.BatchWriteItem",
            span.kind = "client",
            db.system = "dynamodb",
            db.operation = "BatchWriteItem",
            db.name = table,
            aws.dynamodb.batch_operations = requests.len(),
            aws.dynamodb.consumed_write_capacity = field::Empty,
        );

        let mut write_requests = Vec::with_capacity(requests.len());
        for request in requests {
            let write_request = match request {
                BatchWriteRequest::Put { item } => WriteRequest::builder()
                    .put_request(
                        PutRequest::builder()
                            .set_item(Some(to_item(&item)?))
                            .build()
                            .expect("item is always provided"),
                    )
                    .build(),
                BatchWriteRequest::Delete { key } => WriteRequest::builder()
                    .delete_request(
                        DeleteRequest::builder()
                            .set_key(Some(to_item(&key)?))
                            .build()
                            .expect("key is always provided"),
                    )
                    .build(),
            };
            write_requests.push(write_request);
        }

        let request_items = [(table.to_owned(), write_requests)].into_iter().collect();

        let result = self
            .client
            .batch_write_item()
            .set_request_items(Some(request_items))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .instrument(span.clone())
            .await;

        match result {
            Ok(output) => {
                let mut unprocessed = Vec::new();
                for (_, write_requests) in output.unprocessed_items.unwrap_or_default() {
                    for write_request in write_requests {
                        if let Some(put) = write_request.put_request {
                            unprocessed.push(BatchWriteRequest::Put {
                                item: from_item(put.item)?,
                            });
                        } else if let Some(delete) = write_request.delete_request {
                            unprocessed.push(BatchWriteRequest::Delete {
                                key: from_item(delete.key)?,
                            });
                        }
                    }
                }
                Ok(BatchWriteOutput { unprocessed })
            }
            Err(err) => Err(Error::Store(Box::new(err))),
        }
    }

    async fn batch_get(
        &self,
        table: &str,
        keys: Vec<Attributes>,
    ) -> Result<BatchGetOutput, Error> {
        let span = tracing::info_span!(
            "DynamoDB.BatchGetItem",
            span.kind = "client",
            db.system = "dynamodb",
            db.operation = "BatchGetItem",
            db.name = table,
            aws.dynamodb.batch_operations = keys.len(),
            aws.dynamodb.consumed_read_capacity = field::Empty,
        );

        let mut keys_and_attributes = KeysAndAttributes::builder();
        for key in &keys {
            keys_and_attributes = keys_and_attributes.keys(to_item(key)?);
        }
        let request_items = [(
            table.to_owned(),
            keys_and_attributes
                .build()
                .expect("keys is always provided"),
        )]
        .into_iter()
        .collect();

        let result = self
            .client
            .batch_get_item()
            .set_request_items(Some(request_items))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .instrument(span.clone())
            .await;

        match result {
            Ok(output) => {
                let items = output
                    .responses
                    .unwrap_or_default()
                    .remove(table)
                    .unwrap_or_default()
                    .into_iter()
                    .map(from_item)
                    .collect::<Result<_, _>>()?;
                let unprocessed_keys = output
                    .unprocessed_keys
                    .unwrap_or_default()
                    .remove(table)
                    .map(|k| k.keys)
                    .unwrap_or_default()
                    .into_iter()
                    .map(from_item)
                    .collect::<Result<_, _>>()?;
                Ok(BatchGetOutput {
                    items,
                    unprocessed_keys,
                })
            }
            Err(err) => Err(Error::Store(Box::new(err))),
        }
    }

    async fn transact_write(
        &self,
        table: &str,
        actions: Vec<TransactAction>,
        client_request_token: Option<String>,
    ) -> Result<(), Error> {
        let span = tracing::info_span!(
            "DynamoDB.TransactWriteItems",
            span.kind = "client",
            db.system = "dynamodb",
            db.operation = "TransactWriteItems",
            db.name = table,
            aws.dynamodb.batch_operations = actions.len(),
            aws.dynamodb.consumed_write_capacity = field::Empty,
        );

        let mut items = Vec::with_capacity(actions.len());
        for action in actions {
            let builder = aws_sdk_dynamodb::types::TransactWriteItem::builder();
            let item = match action {
                TransactAction::Put(command) => {
                    builder.put(build_transact_put(table, command)?).build()
                }
                TransactAction::Update(command) => builder
                    .update(build_transact_update(table, command)?)
                    .build(),
                TransactAction::Delete(command) => builder
                    .delete(build_transact_delete(table, command)?)
                    .build(),
                TransactAction::ConditionCheck { key, condition } => builder
                    .condition_check(build_transact_condition_check(table, key, condition)?)
                    .build(),
            };
            items.push(item);
        }

        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(items))
            .set_client_request_token(client_request_token)
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(map_transact_error(err)),
        }
    }
}
