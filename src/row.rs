use std::sync::Arc;

use crate::collation::CustomCollations;
use crate::error::{Error, Result};
use crate::protocol::codec::RowProtocol;
use crate::protocol::command::column_definition::ColumnDefinition;
use crate::protocol::command::row::decode_row_payload;
use crate::spool::SpooledValue;
use crate::value::{FromValue, Value, ZeroDateBehavior};

/// Per-result-set description shared by every row of that result set.
#[derive(Debug)]
pub struct ResultRowMeta {
    pub columns: Arc<[ColumnDefinition]>,
    /// Position of the result set within a multi-result response, starting at 0
    pub result_index: usize,
    pub protocol: RowProtocol,
    pub collations: Arc<CustomCollations>,
    pub zero_date: ZeroDateBehavior,
}

impl ResultRowMeta {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Index of the first column labelled `name`
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

#[derive(Debug, PartialEq)]
pub enum RowBody {
    /// One value per column
    Values(Vec<Value>),
    /// The raw row payload, written to a temp file because it exceeded the in-memory limit
    Spilled(SpooledValue),
}

/// A decoded row.
#[derive(Debug)]
pub struct Row {
    meta: Arc<ResultRowMeta>,
    body: RowBody,
}

impl Row {
    pub fn new(meta: Arc<ResultRowMeta>, body: RowBody) -> Self {
        Self { meta, body }
    }

    pub fn meta(&self) -> &Arc<ResultRowMeta> {
        &self.meta
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.meta.columns
    }

    pub fn len(&self) -> usize {
        self.meta.column_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn body(&self) -> &RowBody {
        &self.body
    }

    /// Decoded values, or `None` for a spilled row.
    pub fn values(&self) -> Option<&[Value]> {
        match &self.body {
            RowBody::Values(values) => Some(values),
            RowBody::Spilled(_) => None,
        }
    }

    pub fn spilled(&self) -> Option<&SpooledValue> {
        match &self.body {
            RowBody::Spilled(spooled) => Some(spooled),
            RowBody::Values(_) => None,
        }
    }

    pub fn get<T: FromValue>(&self, idx: usize) -> Result<T> {
        let values = self.values().ok_or_else(|| {
            Error::BadUsageError("row was spilled to disk; call materialize() first".to_string())
        })?;
        let value = values.get(idx).ok_or_else(|| {
            Error::BadUsageError(format!(
                "column index {idx} out of range for a row of {} columns",
                values.len()
            ))
        })?;
        T::from_value(value)
    }

    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let idx = self
            .meta
            .column_index(name)
            .ok_or_else(|| Error::BadUsageError(format!("no column named `{name}`")))?;
        self.get(idx)
    }

    /// Decode a spilled row by reading its payload back from disk.
    ///
    /// Every value is held in memory afterwards. Rows that were never spilled are returned as is.
    pub fn materialize(self) -> Result<Row> {
        match self.body {
            RowBody::Values(_) => Ok(self),
            RowBody::Spilled(spooled) => {
                let payload = spooled.read_all()?;
                let values = decode_row_payload(&payload, &self.meta, None)?;
                Ok(Row {
                    meta: self.meta,
                    body: RowBody::Values(values),
                })
            }
        }
    }

    pub fn into_values(self) -> Result<Vec<Value>> {
        match self.materialize()?.body {
            RowBody::Values(values) => Ok(values),
            RowBody::Spilled(_) => Err(Error::LibraryBug(crate::error::eyre!(
                "materialized row is still spilled"
            ))),
        }
    }
}
