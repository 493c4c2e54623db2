//! Differential maintenance of secondary index key attributes
//!
//! The engine owns an entity's secondary [`IndexSpec`]s and computes the
//! index key attributes to write, either from a full entity value at
//! creation or from a current image plus a patch at update. On updates it
//! only emits attributes for indexes the patch actually touches, and it
//! refuses to emit a key the merged image cannot fully produce.
//!
//! The engine never emits the primary-index attributes from its update
//! path. A primary key is immutable over an item's lifetime; regenerating
//! it would address a different item.

use std::collections::BTreeSet;

use crate::{
    keys::{merge_image, IndexSpec},
    Attributes, Error,
};

/// Computes index key attributes for creates and partial updates
#[derive(Clone, Debug, Default)]
pub struct IndexEngine {
    secondaries: Vec<IndexSpec>,
}

impl IndexEngine {
    /// Build an engine over an entity's secondary indexes
    pub fn new(secondaries: Vec<IndexSpec>) -> Self {
        Self { secondaries }
    }

    /// The secondary indexes the engine maintains
    pub fn secondaries(&self) -> &[IndexSpec] {
        &self.secondaries
    }

    pub(crate) fn spec(&self, name: &str) -> Option<&IndexSpec> {
        self.secondaries.iter().find(|s| s.name().as_str() == name)
    }

    /// Generate every secondary index key attribute from a full entity
    /// value
    ///
    /// Read-only indexes are skipped when `exclude_read_only` is set. A
    /// malformed key fails with [`Error::MissingAttributes`] naming the
    /// offending index and the attributes its generator required.
    pub fn build_for_create(
        &self,
        value: &Attributes,
        exclude_read_only: bool,
    ) -> Result<Attributes, Error> {
        let mut out = Attributes::new();
        for spec in &self.secondaries {
            if spec.is_read_only() && exclude_read_only {
                continue;
            }

            let evaluated = spec.evaluate(value);
            if !evaluated.key.is_well_formed(spec.requires_sort()) {
                return Err(Error::MissingAttributes {
                    index: spec.name().to_string(),
                    attributes: evaluated.missing,
                });
            }
            spec.emit(evaluated.key, &mut out);
        }
        Ok(out)
    }

    /// Generate the index key attributes a partial update must write
    ///
    /// For each secondary index, the key is generated from the current
    /// image and from the merged post-update image. When both agree the
    /// patch does not touch the index and nothing is emitted for it.
    /// Otherwise the index is affected, and the merged image must produce
    /// a well-formed key or the update fails with
    /// [`Error::InsufficientDataForIndex`].
    ///
    /// Read-only indexes are skipped unless named in `force_rebuild`.
    /// Forced indexes are rebuilt unconditionally. Any name in
    /// `force_rebuild` that is not a declared secondary fails with
    /// [`Error::UnknownIndex`].
    pub fn build_for_update(
        &self,
        current: &Attributes,
        patch: &Attributes,
        force_rebuild: &BTreeSet<String>,
    ) -> Result<Attributes, Error> {
        self.check_known(force_rebuild)?;

        let merged = merge_image(current, patch);
        let mut out = Attributes::new();

        for spec in &self.secondaries {
            let forced = force_rebuild.contains(spec.name().as_str());
            if spec.is_read_only() && !forced {
                continue;
            }

            let after = spec.evaluate(&merged);
            if !forced {
                let before = spec.evaluate(current);
                if before.key == after.key {
                    continue;
                }
            }

            if !after.key.is_well_formed(spec.requires_sort()) {
                return Err(Error::InsufficientDataForIndex {
                    index: spec.name().to_string(),
                    attributes: after.missing,
                });
            }
            spec.emit(after.key, &mut out);
        }
        Ok(out)
    }

    fn check_known(&self, force_rebuild: &BTreeSet<String>) -> Result<(), Error> {
        let unknown: Vec<String> = force_rebuild
            .iter()
            .filter(|name| self.spec(name).is_none())
            .cloned()
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        Err(Error::UnknownIndex {
            names: unknown,
            known: self
                .secondaries
                .iter()
                .map(|s| s.name().to_string())
                .collect(),
        })
    }
}
