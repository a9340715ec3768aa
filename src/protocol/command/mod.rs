pub mod column_definition;
pub mod metadata;
pub mod prepared;
pub mod query;
pub mod resultset;
pub mod row;
pub mod task;


pub use column_definition::{ColumnDefinition, ColumnDefinitionTail};
pub use resultset::{Progress, ResultSetDecoder};
pub use task::{Action, CommandTask, ExecuteRequest};
