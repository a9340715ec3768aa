//! A scripted server: builds response bytes and records handler events.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;

use zero_mysql_stream::constant::{ColumnFlags, ColumnType, ServerStatusFlags};
use zero_mysql_stream::error::{Error, Result};
use zero_mysql_stream::protocol::command::column_definition::{
    ColumnDefinition, write_column_definition,
};
use zero_mysql_stream::protocol::packet::{Sequence, write_packets};
use zero_mysql_stream::protocol::primitive::*;
use zero_mysql_stream::protocol::response::TerminatorStatus;
use zero_mysql_stream::{Progress, ResultRowMeta, ResultSetDecoder, ResultSetHandler, Row, Value};

/// Route decoder logs to the test output; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn column(name: &str, column_type: ColumnType, charset: u16) -> ColumnDefinition {
    ColumnDefinition {
        ordinal: 0,
        catalog: "def".into(),
        schema: "test".into(),
        table: "t".into(),
        org_table: "t".into(),
        name: name.into(),
        org_name: name.into(),
        charset,
        column_length: 255,
        column_type,
        flags: ColumnFlags::empty(),
        decimals: 0,
    }
}

/// Response bytes, packet by packet, with sequence ids starting at 1
pub struct Wire {
    pub bytes: Vec<u8>,
    sequence: Sequence,
}

impl Wire {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(sequence_id: u8) -> Self {
        Self {
            bytes: Vec::new(),
            sequence: Sequence::new(sequence_id),
        }
    }

    pub fn packet(&mut self, payload: &[u8]) -> &mut Self {
        write_packets(&mut self.bytes, payload, &mut self.sequence);
        self
    }

    pub fn column_count(&mut self, count: u64) -> &mut Self {
        let mut payload = Vec::new();
        write_int_lenenc(&mut payload, count);
        self.packet(&payload)
    }

    pub fn columns(&mut self, columns: &[ColumnDefinition]) -> &mut Self {
        for column in columns {
            let mut payload = Vec::new();
            write_column_definition(&mut payload, column);
            self.packet(&payload);
        }
        self
    }

    pub fn eof(&mut self, status: ServerStatusFlags) -> &mut Self {
        let mut payload = vec![0xFE, 0x00, 0x00];
        write_int_2(&mut payload, status.bits());
        self.packet(&payload)
    }

    /// OK packet; `header` is 0x00 for a plain OK and 0xFE for a deprecate-EOF terminator
    pub fn ok(
        &mut self,
        header: u8,
        affected_rows: u64,
        last_insert_id: u64,
        status: ServerStatusFlags,
    ) -> &mut Self {
        let mut payload = vec![header];
        write_int_lenenc(&mut payload, affected_rows);
        write_int_lenenc(&mut payload, last_insert_id);
        write_int_2(&mut payload, status.bits());
        write_int_2(&mut payload, 0);
        self.packet(&payload)
    }

    pub fn err(&mut self, code: u16, state: &str, message: &str) -> &mut Self {
        let mut payload = vec![0xFF];
        write_int_2(&mut payload, code);
        payload.push(b'#');
        payload.extend_from_slice(state.as_bytes());
        payload.extend_from_slice(message.as_bytes());
        self.packet(&payload)
    }

    pub fn text_row(&mut self, values: &[Option<&str>]) -> &mut Self {
        let payload = text_row(values);
        self.packet(&payload)
    }

    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

pub fn text_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut payload = Vec::new();
    for value in values {
        match value {
            Some(text) => write_bytes_lenenc(&mut payload, text.as_bytes()),
            None => payload.push(0xFB),
        }
    }
    payload
}

#[derive(Debug, PartialEq)]
pub enum Event {
    Meta {
        columns: Vec<String>,
        result_index: usize,
    },
    Row(Vec<Value>),
    Complete {
        affected_rows: u64,
        last_insert_id: u64,
        has_more: bool,
    },
    Error(String),
}

/// Records every callback as an [`Event`]; spilled rows are kept aside.
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<Event>,
    pub spilled: Vec<Row>,
    pub metas: Vec<Arc<ResultRowMeta>>,
}

impl Recorder {
    pub fn rows(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Row(_)))
            .count()
            + self.spilled.len()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl ResultSetHandler for Recorder {
    fn on_row_meta(&mut self, meta: &Arc<ResultRowMeta>) -> Result<()> {
        self.metas.push(Arc::clone(meta));
        self.events.push(Event::Meta {
            columns: meta.columns.iter().map(|c| c.name.clone()).collect(),
            result_index: meta.result_index,
        });
        Ok(())
    }

    fn on_row(&mut self, row: Row) -> Result<()> {
        if row.spilled().is_some() {
            self.spilled.push(row);
            return Ok(());
        }
        self.events.push(Event::Row(row.into_values()?));
        Ok(())
    }

    fn on_result_complete(&mut self, status: &TerminatorStatus, has_more: bool) -> Result<()> {
        self.events.push(Event::Complete {
            affected_rows: status.affected_rows,
            last_insert_id: status.last_insert_id,
            has_more,
        });
        Ok(())
    }

    fn on_error(&mut self, error: &Error) {
        self.events.push(Event::Error(error.to_string()));
    }
}

/// Feed `wire` in `chunk`-byte pieces, returning the last progress.
pub fn feed_in_chunks<H: ResultSetHandler>(
    decoder: &mut ResultSetDecoder<H>,
    wire: &[u8],
    chunk: usize,
) -> Result<Progress> {
    let mut progress = Progress::NeedMoreData;
    for piece in wire.chunks(chunk.max(1)) {
        progress = decoder.feed(piece)?;
    }
    Ok(progress)
}

/// A server that answers the n-th flushed request with the n-th scripted response.
///
/// Reads return at most `max_read` bytes. Once the released responses are drained a read
/// returns 0, like a closed socket.
#[derive(Debug)]
pub struct ScriptedStream {
    responses: VecDeque<Vec<u8>>,
    released: usize,
    pending: VecDeque<u8>,
    /// Client bytes, one entry per flush
    pub written: Vec<Vec<u8>>,
    current_write: Vec<u8>,
    max_read: usize,
}

impl ScriptedStream {
    pub fn new(responses: Vec<Vec<u8>>, max_read: usize) -> Self {
        Self {
            responses: responses.into(),
            released: 0,
            pending: VecDeque::new(),
            written: Vec::new(),
            current_write: Vec::new(),
            max_read: max_read.max(1),
        }
    }

    fn release(&mut self) {
        while self.released < self.written.len() {
            let Some(response) = self.responses.pop_front() else {
                break;
            };
            self.pending.extend(response);
            self.released += 1;
        }
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.release();
        let n = buf.len().min(self.max_read).min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.current_write.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.current_write.is_empty() {
            self.written.push(std::mem::take(&mut self.current_write));
        }
        Ok(())
    }
}
