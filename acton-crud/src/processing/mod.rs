//! Dynamic query building: filters, sort, includes and cursor pagination
//!
//! A [`DataProcessing`] is the declarative, string-keyed description a caller
//! sends; [`DataProcessing::compile`] checks it against the
//! [`TypeRegistry`](crate::entity::TypeRegistry) and produces a
//! [`CompiledQuery`] whose condition and ordering run against any
//! [`Record`](crate::entity::Record).
//!
//! # Example
//!
//! ```rust
//! use acton_crud::processing::{
//!     DataProcessing, FilterOperator, FilterParam, PaginationParam, SortParam,
//! };
//!
//! let query = DataProcessing::default()
//!     .filter(FilterParam::new("status", FilterOperator::Equal).value("Active"))
//!     .sort(SortParam::ascending("name"))
//!     .include("location");
//!
//! let next_page = PaginationParam::after(query, 42);
//! assert_eq!(next_page.last_value_id, Some(42));
//! ```

mod error;
mod filter;
mod include;
mod pipeline;
mod sort;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

pub use error::SpecificationError;
pub use filter::{compile, compile_all, Comparison, Condition, FilterOperator, FilterParam, Scalar};
pub use include::IncludeSet;
pub use pipeline::{skip_past_cursor, take_page, CompiledQuery};
pub use sort::{resolve, OrderBy, OrderDirection, SortDirection, SortParam};

/// Filters, sort and includes for one listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataProcessing {
    #[serde(default)]
    pub includes: IncludeSet,
    #[serde(default)]
    pub filter_params: Vec<FilterParam>,
    #[serde(default)]
    pub sort_param: SortParam,
}

impl DataProcessing {
    #[must_use]
    pub fn filter(mut self, param: FilterParam) -> Self {
        self.filter_params.push(param);
        self
    }

    #[must_use]
    pub fn sort(mut self, param: SortParam) -> Self {
        self.sort_param = param;
        self
    }

    #[must_use]
    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.includes.insert(path);
        self
    }
}

/// A [`DataProcessing`] plus the id of the last row the caller has seen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationParam {
    #[serde(default)]
    pub data_processing: DataProcessing,
    #[serde(default)]
    pub last_value_id: Option<EntityId>,
}

impl PaginationParam {
    /// First page
    pub fn first(data_processing: DataProcessing) -> Self {
        Self {
            data_processing,
            last_value_id: None,
        }
    }

    /// Page starting after the row with id `cursor`
    pub fn after(data_processing: DataProcessing, cursor: EntityId) -> Self {
        Self {
            data_processing,
            last_value_id: Some(cursor),
        }
    }
}
