//! Expression builders
//!
//! The store accepts one combined placeholder table per request, while
//! this layer assembles a request's expressions from independent sources:
//! a caller-supplied condition, a repository-injected guard, an entity
//! filter. [`Expression`] namespaces every placeholder by expression kind
//! so those sources merge onto one request without colliding. Key
//! conditions, update mutations, and projections are structured values;
//! the store client lowers them to the wire's placeholder syntax when a
//! command is dispatched.

use std::{fmt, marker::PhantomData};

/// The placeholder namespace an expression's parameters are spliced into
pub trait ExpressionKind {
    /// The token inserted after `#` and `:` in every placeholder
    const PREFIX: &'static str;
}

/// The namespace for condition expressions guarding writes
#[derive(Clone, Copy, Debug)]
pub enum ConditionKind {}

impl ExpressionKind for ConditionKind {
    const PREFIX: &'static str = "cnd";
}

/// The namespace for filter expressions applied to read items
#[derive(Clone, Copy, Debug)]
pub enum FilterKind {}

impl ExpressionKind for FilterKind {
    const PREFIX: &'static str = "flt";
}

/// A parameterized expression with its name and value tables
///
/// The expression kind determines the namespace of its placeholders, so a
/// condition and a filter built from the same source text can ride on the
/// same request. Values added through
/// [`sensitive_value`][Self::sensitive_value] are withheld from debug
/// output and from request logging.
#[must_use]
pub struct Expression<K> {
    /// The parameterized expression
    pub expression: String,

    /// The attribute names used in the expression
    pub names: Vec<(String, String)>,

    /// The attribute values used in the expression
    pub values: Vec<(String, serde_json::Value)>,

    /// Values used in the expression that must stay out of logs
    pub sensitive_values: Vec<(String, serde_json::Value)>,

    kind: PhantomData<fn() -> K>,
}

/// A condition expression guarding a single-item write
pub type Condition = Expression<ConditionKind>;

/// A filter expression applied to items after they are read
pub type Filter = Expression<FilterKind>;

impl<K> Clone for Expression<K> {
    fn clone(&self) -> Self {
        Self {
            expression: self.expression.clone(),
            names: self.names.clone(),
            values: self.values.clone(),
            sensitive_values: self.sensitive_values.clone(),
            kind: PhantomData,
        }
    }
}

impl<K: ExpressionKind> fmt::Debug for Expression<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("prefix", &K::PREFIX)
            .field("expression", &self.expression)
            .field("names", &self.names)
            .field("values", &self.values)
            .field(
                "sensitive_values",
                &format_args!("{} redacted", self.sensitive_values.len()),
            )
            .finish()
    }
}

impl<K: ExpressionKind> Expression<K> {
    /// Create a new expression, moving its placeholders into the kind's
    /// namespace
    pub fn new(expression: impl Into<String>) -> Self {
        let raw = expression.into();
        let mut namespaced = String::with_capacity(raw.len() + 16);
        for c in raw.chars() {
            namespaced.push(c);
            if c == '#' || c == ':' {
                namespaced.push_str(K::PREFIX);
                namespaced.push('_');
            }
        }
        Self {
            expression: namespaced,
            names: Vec::new(),
            values: Vec::new(),
            sensitive_values: Vec::new(),
            kind: PhantomData,
        }
    }

    fn placeholder(marker: char, name: &str) -> String {
        format!("{marker}{}_{}", K::PREFIX, name.trim_start_matches(marker))
    }

    /// Bind a name placeholder to an attribute name
    pub fn name(mut self, name: &str, attr: impl Into<String>) -> Self {
        self.names.push((Self::placeholder('#', name), attr.into()));
        self
    }

    /// Bind a value placeholder
    ///
    /// # Panics
    ///
    /// Panics if the value cannot be serialized to an attribute value.
    pub fn value(mut self, name: &str, value: impl serde::Serialize) -> Self {
        self.values.push((
            Self::placeholder(':', name),
            serde_json::to_value(value).unwrap(),
        ));
        self
    }

    /// Bind a value placeholder whose value must stay out of logs
    ///
    /// # Panics
    ///
    /// Panics if the value cannot be serialized to an attribute value.
    pub fn sensitive_value(mut self, name: &str, value: impl serde::Serialize) -> Self {
        self.sensitive_values.push((
            Self::placeholder(':', name),
            serde_json::to_value(value).unwrap(),
        ));
        self
    }

    /// Conjoin another expression of the same kind onto this one
    ///
    /// Both operands are parenthesized, so either side may itself contain
    /// disjunctions. Name and value tables are merged; placeholders must
    /// not collide across the two expressions.
    pub fn and(mut self, other: Self) -> Self {
        self.expression = format!("({}) AND ({})", self.expression, other.expression);
        self.names.extend(other.names);
        self.values.extend(other.values);
        self.sensitive_values.extend(other.sensitive_values);
        self
    }
}

/// A key condition for a query operation
///
/// The partition key is always an equality test; the sort key, when
/// constrained, supports equality, range comparisons, an inclusive
/// between, and a prefix match.
#[derive(Clone, Debug)]
#[must_use]
pub struct KeyCondition {
    partition_attr: String,
    partition_value: serde_json::Value,
    sort: Option<(String, SortKeyTest)>,
}

/// The test applied to a sort key within a key condition
#[derive(Clone, Debug)]
pub enum SortKeyTest {
    /// The sort key equals the value
    Equal(serde_json::Value),
    /// The sort key is strictly less than the value
    LessThan(serde_json::Value),
    /// The sort key is less than or equal to the value
    LessThanOrEqual(serde_json::Value),
    /// The sort key is strictly greater than the value
    GreaterThan(serde_json::Value),
    /// The sort key is greater than or equal to the value
    GreaterThanOrEqual(serde_json::Value),
    /// The sort key lies between the bounds, inclusive
    Between {
        /// The inclusive lower bound
        start: serde_json::Value,
        /// The inclusive upper bound
        end: serde_json::Value,
    },
    /// The sort key begins with the prefix
    BeginsWith(String),
}

impl KeyCondition {
    /// Constrain the partition key attribute to equal the given value
    ///
    /// # Panics
    ///
    /// Panics if the given value cannot be serialized to an attribute value.
    pub fn partition(attr: impl Into<String>, value: impl serde::Serialize) -> Self {
        Self {
            partition_attr: attr.into(),
            partition_value: serde_json::to_value(value).unwrap(),
            sort: None,
        }
    }

    /// Constrain the sort key attribute to equal the given value
    pub fn sort_equals(mut self, attr: impl Into<String>, value: impl serde::Serialize) -> Self {
        self.sort = Some((
            attr.into(),
            SortKeyTest::Equal(serde_json::to_value(value).unwrap()),
        ));
        self
    }

    /// Constrain the sort key attribute to be less than the given value
    pub fn sort_less_than(mut self, attr: impl Into<String>, value: impl serde::Serialize) -> Self {
        self.sort = Some((
            attr.into(),
            SortKeyTest::LessThan(serde_json::to_value(value).unwrap()),
        ));
        self
    }

    /// Constrain the sort key attribute to be at most the given value
    pub fn sort_less_than_or_equal(
        mut self,
        attr: impl Into<String>,
        value: impl serde::Serialize,
    ) -> Self {
        self.sort = Some((
            attr.into(),
            SortKeyTest::LessThanOrEqual(serde_json::to_value(value).unwrap()),
        ));
        self
    }

    /// Constrain the sort key attribute to be greater than the given value
    pub fn sort_greater_than(
        mut self,
        attr: impl Into<String>,
        value: impl serde::Serialize,
    ) -> Self {
        self.sort = Some((
            attr.into(),
            SortKeyTest::GreaterThan(serde_json::to_value(value).unwrap()),
        ));
        self
    }

    /// Constrain the sort key attribute to be at least the given value
    pub fn sort_greater_than_or_equal(
        mut self,
        attr: impl Into<String>,
        value: impl serde::Serialize,
    ) -> Self {
        self.sort = Some((
            attr.into(),
            SortKeyTest::GreaterThanOrEqual(serde_json::to_value(value).unwrap()),
        ));
        self
    }

    /// Constrain the sort key attribute to lie between the bounds, inclusive
    pub fn sort_between(
        mut self,
        attr: impl Into<String>,
        start: impl serde::Serialize,
        end: impl serde::Serialize,
    ) -> Self {
        self.sort = Some((
            attr.into(),
            SortKeyTest::Between {
                start: serde_json::to_value(start).unwrap(),
                end: serde_json::to_value(end).unwrap(),
            },
        ));
        self
    }

    /// Constrain the sort key attribute to begin with the given prefix
    pub fn sort_begins_with(mut self, attr: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.sort = Some((attr.into(), SortKeyTest::BeginsWith(prefix.into())));
        self
    }

    /// The attribute name holding the partition key
    pub fn partition_attr(&self) -> &str {
        &self.partition_attr
    }

    /// The value the partition key must equal
    pub fn partition_value(&self) -> &serde_json::Value {
        &self.partition_value
    }

    /// The sort key attribute and its test, when constrained
    pub fn sort(&self) -> Option<(&str, &SortKeyTest)> {
        self.sort.as_ref().map(|(attr, test)| (attr.as_str(), test))
    }
}

/// A dotted attribute path
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// Parse a dotted attribute path
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path.split('.').map(str::to_owned).collect(),
        }
    }

    /// The path's segments, outermost first
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The top-level attribute the path starts at
    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    /// Whether the path addresses a top-level attribute
    pub fn is_top_level(&self) -> bool {
        self.segments.len() == 1
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl From<&str> for Path {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl From<String> for Path {
    fn from(path: String) -> Self {
        Self::parse(&path)
    }
}

/// One mutation within an update expression
#[derive(Clone, Debug)]
pub enum UpdateAction {
    /// Assign the value at the path
    Set {
        /// The attribute path to assign
        path: Path,
        /// The value to assign
        value: serde_json::Value,
    },
    /// Remove the attribute at the path
    Remove {
        /// The attribute path to remove
        path: Path,
    },
    /// Numeric increment, or union into a set-typed attribute
    Add {
        /// The attribute path to add to
        path: Path,
        /// A number to add, or an array of elements to union
        value: serde_json::Value,
    },
    /// Remove elements from a set-typed attribute
    DeleteElements {
        /// The set-typed attribute path
        path: Path,
        /// The elements to remove
        elements: Vec<serde_json::Value>,
    },
}

impl UpdateAction {
    /// The path the action applies to
    pub fn path(&self) -> &Path {
        match self {
            Self::Set { path, .. }
            | Self::Remove { path }
            | Self::Add { path, .. }
            | Self::DeleteElements { path, .. } => path,
        }
    }
}

/// An accumulated update expression
///
/// Actions are lowered to the store's update expression syntax by the
/// store client when the command is dispatched.
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct Update {
    actions: Vec<UpdateAction>,
}

impl Update {
    /// Create an empty update expression
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a value at a dotted path
    ///
    /// # Panics
    ///
    /// Panics if the given value cannot be serialized to an attribute value.
    pub fn set(mut self, path: impl Into<Path>, value: impl serde::Serialize) -> Self {
        self.actions.push(UpdateAction::Set {
            path: path.into(),
            value: serde_json::to_value(value).unwrap(),
        });
        self
    }

    /// Remove the attribute at a dotted path
    pub fn remove(mut self, path: impl Into<Path>) -> Self {
        self.actions.push(UpdateAction::Remove { path: path.into() });
        self
    }

    /// Add a number to, or union elements into, the attribute at a path
    ///
    /// # Panics
    ///
    /// Panics if the given value cannot be serialized to an attribute value.
    pub fn add(mut self, path: impl Into<Path>, value: impl serde::Serialize) -> Self {
        self.actions.push(UpdateAction::Add {
            path: path.into(),
            value: serde_json::to_value(value).unwrap(),
        });
        self
    }

    /// Remove elements from the set-typed attribute at a path
    ///
    /// # Panics
    ///
    /// Panics if an element cannot be serialized to an attribute value.
    pub fn delete_elements<I, V>(mut self, path: impl Into<Path>, elements: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: serde::Serialize,
    {
        self.actions.push(UpdateAction::DeleteElements {
            path: path.into(),
            elements: elements
                .into_iter()
                .map(|e| serde_json::to_value(e).unwrap())
                .collect(),
        });
        self
    }

    /// Whether no actions have been accumulated
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// The accumulated actions, in insertion order
    pub fn actions(&self) -> &[UpdateAction] {
        &self.actions
    }
}

/// A projection narrowing the attributes returned by a read
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct Projection {
    paths: Vec<Path>,
}

impl Projection {
    /// Build a projection from dotted attribute paths, dropping duplicates
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        let mut seen = fnv::FnvHashSet::default();
        let mut out = Vec::new();
        for path in paths {
            let path = path.into();
            if seen.insert(path.to_string()) {
                out.push(path);
            }
        }
        Self { paths: out }
    }

    /// The projected paths
    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    /// Whether the projection selects no attributes
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
