//! Key generation over schema-driven entity values
//!
//! Every index on an entity, primary or secondary, is described by an
//! [`IndexSpec`]: the attribute names that store the key pair and a pure
//! generator from an entity value to the key strings. Generators read
//! attributes through a [`KeyInput`], which substitutes the literal
//! `undefined` for absent attributes and records their names, so that a
//! key built from an incomplete image is detectable after the fact.

use std::{borrow::Cow, cell::RefCell, fmt, sync::Arc};

use crate::{Attributes, IndexName};

pub(crate) const UNDEFINED: &str = "undefined";

/// A generated index key pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedKey {
    /// The partition key value
    pub pk: String,

    /// The sort key value, when the index declares a sort attribute
    pub sk: Option<String>,
}

impl GeneratedKey {
    /// A key with only a partition component
    pub fn partition(pk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: None,
        }
    }

    /// A key with partition and sort components
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: Some(sk.into()),
        }
    }

    /// A key is well-formed when its partition value is non-empty, a sort
    /// value is present whenever the index declares one, and neither value
    /// contains the literal `undefined` marker.
    pub(crate) fn is_well_formed(&self, requires_sort: bool) -> bool {
        if self.pk.is_empty() || self.pk.contains(UNDEFINED) {
            return false;
        }
        match &self.sk {
            Some(sk) => !sk.is_empty() && !sk.contains(UNDEFINED),
            None => !requires_sort,
        }
    }
}

/// A read-only view over an entity value handed to key generators
///
/// Attribute lookups that miss resolve to the literal `undefined` and are
/// recorded, so the engine can both detect a malformed key and name the
/// attributes that were required to build it.
pub struct KeyInput<'a> {
    attrs: &'a Attributes,
    missing: RefCell<Vec<String>>,
}

impl fmt::Debug for KeyInput<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyInput")
            .field("attrs", &self.attrs)
            .field("missing", &self.missing.borrow())
            .finish()
    }
}

impl<'a> KeyInput<'a> {
    pub(crate) fn new(attrs: &'a Attributes) -> Self {
        Self {
            attrs,
            missing: RefCell::new(Vec::new()),
        }
    }

    /// Read an attribute as a key component
    ///
    /// Strings are borrowed as-is; numbers and booleans are rendered in
    /// their canonical decimal form. A null or absent attribute yields the
    /// `undefined` marker and is recorded as missing.
    pub fn get(&self, attr: &str) -> Cow<'a, str> {
        match self.attrs.get(attr) {
            Some(serde_json::Value::String(s)) => Cow::Borrowed(s.as_str()),
            Some(serde_json::Value::Number(n)) => Cow::Owned(n.to_string()),
            Some(serde_json::Value::Bool(b)) => Cow::Owned(b.to_string()),
            Some(serde_json::Value::Null) | None => {
                self.record_missing(attr);
                Cow::Borrowed(UNDEFINED)
            }
            // Composite values have no canonical key rendering
            Some(_) => {
                self.record_missing(attr);
                Cow::Borrowed(UNDEFINED)
            }
        }
    }

    /// Returns true when the attribute is present and non-null
    pub fn has(&self, attr: &str) -> bool {
        !matches!(self.attrs.get(attr), None | Some(serde_json::Value::Null))
    }

    fn record_missing(&self, attr: &str) {
        let mut missing = self.missing.borrow_mut();
        if !missing.iter().any(|m| m == attr) {
            missing.push(attr.to_owned());
        }
    }

    pub(crate) fn into_missing(self) -> Vec<String> {
        self.missing.into_inner()
    }
}

/// A pure key generator from an entity value to a key pair
pub type KeyGenerator = Arc<dyn Fn(&KeyInput<'_>) -> GeneratedKey + Send + Sync>;

/// The outcome of evaluating a generator against an entity value
#[derive(Debug)]
pub(crate) struct EvaluatedKey {
    pub key: GeneratedKey,
    pub missing: Vec<String>,
}

/// The declarative description of one index on an entity
///
/// For secondary indexes, the partition and sort attribute names are the
/// dedicated storage attributes chosen by the table operator, such as
/// `gsi1pk` and `gsi1sk`. A read-only index is excluded from automatic
/// maintenance on updates unless the caller forces a rebuild.
#[derive(Clone)]
pub struct IndexSpec {
    name: IndexName,
    partition_attr: String,
    sort_attr: Option<String>,
    read_only: bool,
    generator: KeyGenerator,
}

impl fmt::Debug for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSpec")
            .field("name", &self.name)
            .field("partition_attr", &self.partition_attr)
            .field("sort_attr", &self.sort_attr)
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl IndexSpec {
    /// Describe an index keyed only by a partition attribute
    pub fn new<F>(name: impl Into<IndexName>, partition_attr: impl Into<String>, generator: F) -> Self
    where
        F: Fn(&KeyInput<'_>) -> GeneratedKey + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            partition_attr: partition_attr.into(),
            sort_attr: None,
            read_only: false,
            generator: Arc::new(generator),
        }
    }

    /// Declare the attribute that stores the index's sort key
    pub fn sort_attr(mut self, attr: impl Into<String>) -> Self {
        self.sort_attr = Some(attr.into());
        self
    }

    /// Opt the index out of automatic maintenance on updates
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// The index name
    pub fn name(&self) -> &IndexName {
        &self.name
    }

    /// The attribute storing the partition key
    pub fn partition_attr(&self) -> &str {
        &self.partition_attr
    }

    /// The attribute storing the sort key, when declared
    pub fn sort_attr_name(&self) -> Option<&str> {
        self.sort_attr.as_deref()
    }

    /// Whether the index is excluded from automatic maintenance
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn requires_sort(&self) -> bool {
        self.sort_attr.is_some()
    }

    pub(crate) fn evaluate(&self, attrs: &Attributes) -> EvaluatedKey {
        let input = KeyInput::new(attrs);
        let key = (self.generator)(&input);
        EvaluatedKey {
            key,
            missing: input.into_missing(),
        }
    }

    /// Insert the generated key pair into `out` under the index's storage
    /// attribute names.
    pub(crate) fn emit(&self, key: GeneratedKey, out: &mut Attributes) {
        out.insert(
            self.partition_attr.clone(),
            serde_json::Value::String(key.pk),
        );
        if let (Some(attr), Some(sk)) = (&self.sort_attr, key.sk) {
            out.insert(attr.clone(), serde_json::Value::String(sk));
        }
    }
}

/// Apply a patch on top of a current image, yielding the merged image that
/// post-update key generation runs against
pub(crate) fn merge_image(current: &Attributes, patch: &Attributes) -> Attributes {
    let mut merged = current.clone();
    for (attr, value) in patch {
        merged.insert(attr.clone(), value.clone());
    }
    merged
}
