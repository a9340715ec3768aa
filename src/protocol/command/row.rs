//! Row assembly across packet boundaries, with spooling of oversized columns and rows.
//!
//! A row is decoded in one of three ways:
//! - the whole payload is buffered: it is decoded in place,
//! - a single packet declared larger than the big-column threshold is still arriving: values are
//!   decoded as bytes come in and big columns stream straight to temp files,
//! - a payload larger than the in-memory limit: the raw payload streams to a temp file and the
//!   row is emitted as [`RowBody::Spilled`].

use std::mem;

use tracing::{debug, trace, warn};

use crate::buffer::Cursor;
use crate::constant::MAX_PAYLOAD_LENGTH;
use crate::error::{Error, ErrorKind, Result, eyre};
use crate::protocol::codec::{CodecContext, Decoded, RowProtocol};
use crate::protocol::packet::{
    PacketHeader, PayloadFrames, PayloadProbe, Pull, Sequence, has_full_packet,
    probe_payload_size, read_header, read_logical_packet,
};
use crate::protocol::primitive::*;
use crate::protocol::value::{NullBitmap, null_bitmap_len};
use crate::row::{ResultRowMeta, RowBody};
use crate::spool::{SpoolOpts, SpoolWriter};
use crate::value::Value;

/// Largest run of bytes copied into the carry buffer at once
const FILL_CHUNK: usize = 64 * 1024;

/// Everything a row step needs besides the bytes.
#[derive(Debug, Clone, Copy)]
pub struct RowEnv<'a> {
    pub meta: &'a ResultRowMeta,
    pub spool: &'a SpoolOpts,
    /// Rows are still consumed off the wire but neither decoded nor emitted
    pub canceled: bool,
}

impl RowEnv<'_> {
    fn codec(&self) -> CodecContext<'_> {
        CodecContext {
            zero_date: self.meta.zero_date,
            big_column_threshold: self.spool.big_column_threshold,
            collations: &self.meta.collations,
        }
    }
}

/// Outcome of [`RowState::step`]
#[derive(Debug)]
pub enum RowStep {
    NeedMore,
    Row(RowBody),
    /// The row was consumed while canceled
    Skipped,
    /// The row was consumed but a temp file could not be written
    Failed(Error),
}

/// Resumable position inside the row being read.
#[derive(Debug, Default)]
pub enum RowState {
    /// At a packet boundary, waiting for enough bytes to choose a path
    #[default]
    AccumulatingPacket,
    DecodingRow(Box<RowAccumulator>),
    SpoolingBigColumn(Box<RowAccumulator>, ColumnSpool),
    SpillingRow(RowSpill),
}

enum Flow {
    Continue(RowState),
    Suspend(RowState),
    Done(RowStep),
}

impl RowState {
    pub fn is_at_boundary(&self) -> bool {
        matches!(self, RowState::AccumulatingPacket)
    }

    /// Advance through the buffered bytes of the current row.
    ///
    /// Returns [`RowStep::NeedMore`] with the progress kept in `self` when the buffer runs out.
    /// Consumed headers are committed to `sequence` as they are read. On error the row in
    /// progress is dropped, which deletes its temp files.
    pub fn step(
        &mut self,
        cursor: &mut Cursor<'_>,
        sequence: &mut Sequence,
        env: &RowEnv<'_>,
    ) -> Result<RowStep> {
        let mut state = mem::take(self);
        loop {
            let flow = match state {
                RowState::AccumulatingPacket => start_row(cursor, sequence, env)?,
                RowState::DecodingRow(acc) => acc.decode(cursor, sequence, env)?,
                RowState::SpoolingBigColumn(acc, spool) => {
                    acc.spool_column(spool, cursor, sequence, env)?
                }
                RowState::SpillingRow(spill) => spill.stream(cursor, sequence, env)?,
            };
            match flow {
                Flow::Continue(next) => state = next,
                Flow::Suspend(pending) => {
                    *self = pending;
                    return Ok(RowStep::NeedMore);
                }
                Flow::Done(step) => return Ok(step),
            }
        }
    }
}

fn start_row(cursor: &mut Cursor<'_>, sequence: &mut Sequence, env: &RowEnv<'_>) -> Result<Flow> {
    let data = cursor.remaining();
    let Some(header) = PacketHeader::peek(data).copied() else {
        return Ok(Flow::Suspend(RowState::AccumulatingPacket));
    };
    let length = header.length();

    if length == MAX_PAYLOAD_LENGTH || length > env.spool.max_in_memory_row_size {
        return match probe_payload_size(data, env.spool.max_in_memory_row_size) {
            PayloadProbe::Undecided => Ok(Flow::Suspend(RowState::AccumulatingPacket)),
            PayloadProbe::Fits { total } => {
                trace!(total, "multi-packet row kept in memory");
                decode_whole(cursor, sequence, env)
            }
            PayloadProbe::Exceeds => {
                commit_header(cursor, sequence)?;
                debug!(
                    limit = env.spool.max_in_memory_row_size,
                    "row exceeds the in-memory limit, spilling to disk"
                );
                let writer = (!env.canceled).then(|| SpoolWriter::create(&env.spool.dir));
                Ok(Flow::Continue(RowState::SpillingRow(RowSpill {
                    frames: PayloadFrames::new(length),
                    writer,
                })))
            }
        };
    }

    if has_full_packet(data) {
        return decode_whole(cursor, sequence, env);
    }

    if length > env.spool.big_column_threshold {
        commit_header(cursor, sequence)?;
        debug!(length, "decoding a large row as it arrives");
        return Ok(Flow::Continue(RowState::DecodingRow(Box::new(
            RowAccumulator::new(length, env.meta.column_count()),
        ))));
    }

    Ok(Flow::Suspend(RowState::AccumulatingPacket))
}

fn commit_header(cursor: &mut Cursor<'_>, sequence: &mut Sequence) -> Result<()> {
    let header = read_header(cursor).ok_or_else(|| Error::LibraryBug(eyre!("header vanished")))?;
    sequence.advance(header.sequence_id)
}

fn decode_whole(cursor: &mut Cursor<'_>, sequence: &mut Sequence, env: &RowEnv<'_>) -> Result<Flow> {
    let Some(packet) = read_logical_packet(cursor, *sequence)? else {
        return Ok(Flow::Suspend(RowState::AccumulatingPacket));
    };
    *sequence = packet.sequence;

    if env.canceled {
        return Ok(Flow::Done(RowStep::Skipped));
    }

    match decode_row_payload(&packet.payload, env.meta, Some(env.spool)) {
        Ok(values) => Ok(Flow::Done(RowStep::Row(RowBody::Values(values)))),
        Err(e) if e.kind() == ErrorKind::Resource => Ok(Flow::Done(RowStep::Failed(e))),
        Err(e) => Err(e),
    }
}

/// Decode a complete row payload.
///
/// With `spool` set, values above its big-column threshold are written to temp files;
/// without it every value is decoded in memory. Bytes after the last column are ignored.
pub fn decode_row_payload(
    payload: &[u8],
    meta: &ResultRowMeta,
    spool: Option<&SpoolOpts>,
) -> Result<Vec<Value>> {
    let column_count = meta.column_count();
    let ctx = CodecContext {
        zero_date: meta.zero_date,
        big_column_threshold: spool.map_or(usize::MAX, |s| s.big_column_threshold),
        collations: &meta.collations,
    };

    let mut data = payload;
    let bitmap = match meta.protocol {
        RowProtocol::Text => None,
        RowProtocol::Binary => {
            let (header, rest) = read_int_1(data)?;
            if header != 0x00 {
                return Err(Error::InvalidPacket);
            }
            let (bits, rest) = read_string_fix(rest, null_bitmap_len(column_count))?;
            data = rest;
            Some(NullBitmap::for_result_set(bits))
        }
    };

    let mut values = Vec::with_capacity(column_count);
    for (idx, column) in meta.columns.iter().enumerate() {
        if bitmap.as_ref().is_some_and(|b| b.is_null(idx)) {
            values.push(Value::Null);
            continue;
        }
        let consumed = match meta.protocol.decode_column(data, column, &ctx)? {
            Decoded::Value { value, consumed } => {
                values.push(value);
                consumed
            }
            Decoded::NeedMore => return Err(Error::UnexpectedEof),
            Decoded::BigColumn { prefix_len, len } => {
                let Some(opts) = spool else {
                    return Err(Error::LibraryBug(eyre!(
                        "big column without a spool directory"
                    )));
                };
                let len = usize::try_from(len).map_err(|_| Error::InvalidPacket)?;
                let end = prefix_len + len;
                let bytes = data.get(prefix_len..end).ok_or(Error::UnexpectedEof)?;
                debug!(column = %column.name, len, "spooling big column");
                let mut writer = SpoolWriter::create(&opts.dir);
                writer.write(bytes);
                values.push(Value::Spooled(writer.finish()?));
                end
            }
        };
        data = data.get(consumed..).ok_or(Error::UnexpectedEof)?;
    }

    Ok(values)
}

fn discard_values(values: Vec<Value>) {
    for value in values {
        if let Value::Spooled(spooled) = value {
            let path = spooled.path().to_path_buf();
            if let Err(error) = spooled.delete() {
                warn!(?path, %error, "failed to delete spooled column");
            }
        }
    }
}

enum Fill {
    Filled,
    NeedMore,
    End,
}

/// Values decoded so far for a row whose bytes are still arriving.
#[derive(Debug)]
pub struct RowAccumulator {
    frames: PayloadFrames,
    /// Payload bytes moved out of the receive buffer but not yet decoded
    carry: Vec<u8>,
    carry_pos: usize,
    header_read: bool,
    bitmap: Option<NullBitmap>,
    values: Vec<Value>,
    /// First spool failure of the row, reported once the row is consumed
    failure: Option<Error>,
}

impl RowAccumulator {
    fn new(first_packet_length: usize, column_count: usize) -> Self {
        Self {
            frames: PayloadFrames::new(first_packet_length),
            carry: Vec::new(),
            carry_pos: 0,
            header_read: false,
            bitmap: None,
            values: Vec::with_capacity(column_count),
            failure: None,
        }
    }

    fn pending(&self) -> &[u8] {
        &self.carry[self.carry_pos..]
    }

    fn fill(&mut self, cursor: &mut Cursor<'_>, sequence: &mut Sequence) -> Result<Fill> {
        match self.frames.peek(cursor, sequence)? {
            Pull::Chunk(chunk) => {
                let n = chunk.len().min(FILL_CHUNK);
                if self.carry_pos > 0 {
                    self.carry.drain(..self.carry_pos);
                    self.carry_pos = 0;
                }
                self.carry.extend_from_slice(&chunk[..n]);
                self.frames.consume(cursor, n);
                Ok(Fill::Filled)
            }
            Pull::NeedMore => Ok(Fill::NeedMore),
            Pull::End => Ok(Fill::End),
        }
    }

    fn read_row_header(&mut self, env: &RowEnv<'_>) -> Result<bool> {
        if env.meta.protocol == RowProtocol::Text {
            return Ok(true);
        }
        let needed = 1 + null_bitmap_len(env.meta.column_count());
        let Some(bytes) = self.pending().get(..needed) else {
            return Ok(false);
        };
        let (header, bits) = read_int_1(bytes)?;
        if header != 0x00 {
            return Err(Error::InvalidPacket);
        }
        self.bitmap = Some(NullBitmap::for_result_set(bits));
        self.carry_pos += needed;
        Ok(true)
    }

    fn decode(
        mut self: Box<Self>,
        cursor: &mut Cursor<'_>,
        sequence: &mut Sequence,
        env: &RowEnv<'_>,
    ) -> Result<Flow> {
        let ctx = env.codec();
        loop {
            if !self.header_read {
                self.header_read = self.read_row_header(env)?;
                if !self.header_read {
                    match self.fill(cursor, sequence)? {
                        Fill::Filled => continue,
                        Fill::NeedMore => return Ok(Flow::Suspend(RowState::DecodingRow(self))),
                        Fill::End => return Err(Error::UnexpectedEof),
                    }
                }
            }

            let idx = self.values.len();
            let Some(column) = env.meta.columns.get(idx) else {
                return self.skip_to_end(cursor, sequence, env);
            };
            if self.bitmap.as_ref().is_some_and(|b| b.is_null(idx)) {
                self.values.push(Value::Null);
                continue;
            }

            match env.meta.protocol.decode_column(self.pending(), column, &ctx)? {
                Decoded::Value { value, consumed } => {
                    self.carry_pos += consumed;
                    self.values.push(value);
                }
                Decoded::BigColumn { prefix_len, len } => {
                    self.carry_pos += prefix_len;
                    debug!(column = %column.name, len, "streaming big column to disk");
                    let spool = ColumnSpool::new(len, env);
                    return Ok(Flow::Continue(RowState::SpoolingBigColumn(self, spool)));
                }
                Decoded::NeedMore => match self.fill(cursor, sequence)? {
                    Fill::Filled => {}
                    Fill::NeedMore => return Ok(Flow::Suspend(RowState::DecodingRow(self))),
                    Fill::End => return Err(Error::UnexpectedEof),
                },
            }
        }
    }

    fn skip_to_end(
        mut self: Box<Self>,
        cursor: &mut Cursor<'_>,
        sequence: &mut Sequence,
        env: &RowEnv<'_>,
    ) -> Result<Flow> {
        self.carry_pos = self.carry.len();
        loop {
            match self.frames.peek(cursor, sequence)? {
                Pull::Chunk(chunk) => {
                    let n = chunk.len();
                    self.frames.consume(cursor, n);
                }
                Pull::NeedMore => return Ok(Flow::Suspend(RowState::DecodingRow(self))),
                Pull::End => return Ok(Flow::Done(self.finish(env))),
            }
        }
    }

    fn finish(self: Box<Self>, env: &RowEnv<'_>) -> RowStep {
        let RowAccumulator {
            values, failure, ..
        } = *self;
        if env.canceled {
            discard_values(values);
            return RowStep::Skipped;
        }
        if let Some(error) = failure {
            discard_values(values);
            return RowStep::Failed(error);
        }
        RowStep::Row(RowBody::Values(values))
    }

    fn spool_column(
        mut self: Box<Self>,
        mut spool: ColumnSpool,
        cursor: &mut Cursor<'_>,
        sequence: &mut Sequence,
        env: &RowEnv<'_>,
    ) -> Result<Flow> {
        if env.canceled {
            spool.cancel();
        }

        let carried = self.pending();
        if spool.remaining > 0 && !carried.is_empty() {
            let n = usize::try_from(spool.remaining).map_or(carried.len(), |r| r.min(carried.len()));
            spool.write(&carried[..n]);
            self.carry_pos += n;
        }

        while spool.remaining > 0 {
            match self.frames.peek(cursor, sequence)? {
                Pull::Chunk(chunk) => {
                    let n = usize::try_from(spool.remaining).map_or(chunk.len(), |r| r.min(chunk.len()));
                    spool.write(&chunk[..n]);
                    self.frames.consume(cursor, n);
                }
                Pull::NeedMore => {
                    return Ok(Flow::Suspend(RowState::SpoolingBigColumn(self, spool)));
                }
                Pull::End => return Err(Error::UnexpectedEof),
            }
        }

        let value = spool.finish(&mut self.failure);
        self.values.push(value);
        Ok(Flow::Continue(RowState::DecodingRow(self)))
    }
}

/// A single column value being streamed to its own temp file.
#[derive(Debug)]
pub struct ColumnSpool {
    /// `None` once canceled
    writer: Option<SpoolWriter>,
    remaining: u64,
}

impl ColumnSpool {
    fn new(len: u64, env: &RowEnv<'_>) -> Self {
        Self {
            writer: (!env.canceled).then(|| SpoolWriter::create(&env.spool.dir)),
            remaining: len,
        }
    }

    fn write(&mut self, chunk: &[u8]) {
        if let Some(writer) = self.writer.as_mut() {
            writer.write(chunk);
        }
        self.remaining -= chunk.len() as u64;
    }

    fn cancel(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.discard();
        }
    }

    fn finish(mut self, failure: &mut Option<Error>) -> Value {
        let Some(writer) = self.writer.take() else {
            return Value::Null;
        };
        match writer.finish() {
            Ok(spooled) => Value::Spooled(spooled),
            Err(error) => {
                if failure.is_none() {
                    *failure = Some(error);
                } else {
                    warn!(%error, "additional spool failure in the same row");
                }
                Value::Null
            }
        }
    }
}

/// A whole row payload being streamed to a temp file.
#[derive(Debug)]
pub struct RowSpill {
    frames: PayloadFrames,
    /// `None` when the row is being skipped
    writer: Option<SpoolWriter>,
}

impl RowSpill {
    fn stream(
        mut self,
        cursor: &mut Cursor<'_>,
        sequence: &mut Sequence,
        env: &RowEnv<'_>,
    ) -> Result<Flow> {
        if env.canceled {
            if let Some(writer) = self.writer.take() {
                writer.discard();
            }
        }

        loop {
            match self.frames.peek(cursor, sequence)? {
                Pull::Chunk(chunk) => {
                    if let Some(writer) = self.writer.as_mut() {
                        writer.write(chunk);
                    }
                    let n = chunk.len();
                    self.frames.consume(cursor, n);
                }
                Pull::NeedMore => return Ok(Flow::Suspend(RowState::SpillingRow(self))),
                Pull::End => break,
            }
        }

        debug!(packets = self.frames.packets(), "spilled row fully received");
        let step = match self.writer {
            None => RowStep::Skipped,
            Some(writer) => match writer.finish() {
                Ok(spooled) => RowStep::Row(RowBody::Spilled(spooled)),
                Err(error) => RowStep::Failed(error),
            },
        };
        Ok(Flow::Done(step))
    }
}
