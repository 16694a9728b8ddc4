//! Query descriptors, output row sorting, and the query executor (spec
//! §2 item 13 "Query Executor", §4.5–§4.7).

pub mod descriptor;
pub mod executor;
pub mod sort;

pub use descriptor::QueryDescriptor;
pub use executor::{QueryStats, RowOutput, TsvRowOutput};
