//! Compiling a [`DataProcessing`] and applying cursor pagination

use super::{compile_all, resolve, Condition, DataProcessing, IncludeSet, OrderBy};
use super::SpecificationError;
use crate::entity::{Entity, EntityId, TypeRegistry};

/// A [`DataProcessing`] checked against the model and ready to run
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// AND of every filter
    pub condition: Condition,
    pub order: OrderBy,
    /// Repository includes merged with caller includes, declared names
    pub includes: IncludeSet,
}

impl CompiledQuery {
    /// Whether the fetch must run as one query per relation
    pub fn split_query(&self) -> bool {
        self.includes.requires_split_query()
    }
}

impl DataProcessing {
    /// Compile filters, sort and includes against `root`
    ///
    /// `required` is the repository's mandatory include set; caller includes
    /// are merged into it.
    ///
    /// # Errors
    ///
    /// The first [`SpecificationError`] found in the includes, the filters or
    /// the sort, in that order.
    pub fn compile(
        &self,
        root: &str,
        registry: &TypeRegistry,
        required: &IncludeSet,
    ) -> Result<CompiledQuery, SpecificationError> {
        let includes = required.merged(&self.includes).resolve(root, registry)?;
        let condition = compile_all(&self.filter_params, root, registry)?;
        let order = resolve(&self.sort_param, root, registry)?;
        Ok(CompiledQuery {
            condition,
            order,
            includes,
        })
    }
}

/// Drop every row up to and including the cursor row
///
/// Rows are scanned in their current order. When the cursor id never
/// appears, every row is dropped. Without a cursor nothing is dropped.
pub fn skip_past_cursor<E: Entity>(rows: Vec<E>, cursor: Option<EntityId>) -> Vec<E> {
    let Some(cursor) = cursor else {
        return rows;
    };
    let mut rows = rows.into_iter();
    for row in rows.by_ref() {
        if row.id() == cursor {
            break;
        }
    }
    rows.collect()
}

/// Keep at most `page_size` rows; a negative size keeps everything
pub fn take_page<E>(rows: Vec<E>, page_size: i64) -> Vec<E> {
    match usize::try_from(page_size) {
        Ok(size) => rows.into_iter().take(size).collect(),
        Err(_) => rows,
    }
}
