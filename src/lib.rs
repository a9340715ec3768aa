pub mod buffer;
pub mod collation;
pub mod constant;
pub mod error;
pub mod handler;
mod opts;
pub mod protocol;
pub mod row;
pub mod spool;
pub mod value;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use error::{Error, ErrorKind, Result};
pub use handler::{CancelToken, CollectHandler, DropHandler, ResultSetHandler};
pub use opts::Opts;
pub use protocol::command::{Action, CommandTask, ExecuteRequest, Progress, ResultSetDecoder};
pub use row::{ResultRowMeta, Row, RowBody};
pub use spool::{SpoolOpts, SpooledValue};
pub use value::{FromValue, Value, ZeroDateBehavior};
