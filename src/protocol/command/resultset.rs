//! Resumable decoding of a command response: OK, ERR, LOCAL INFILE request, or result sets.

use std::mem;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::buffer::{Cursor, ReadBuffer};
use crate::constant::{CapabilityFlags, PACKET_HEADER_LENGTH, MAX_PAYLOAD_LENGTH, ServerStatusFlags};
use crate::error::{Error, Result, eyre};
use crate::handler::{CancelToken, ResultSetHandler};
use crate::opts::Opts;
use crate::protocol::codec::RowProtocol;
use crate::protocol::command::column_definition::ColumnDefinition;
use crate::protocol::command::metadata::{MetadataRead, read_column_metadata};
use crate::protocol::command::row::{RowEnv, RowState, RowStep};
use crate::protocol::packet::{PacketHeader, Sequence, read_logical_packet};
use crate::protocol::response::{
    ErrPayload, OkPayload, ResponseKind, TerminatorStatus, detect_response_kind,
    read_eof_packet, read_local_infile_request,
};
use crate::row::{ResultRowMeta, Row};

/// Outcome of [`ResultSetDecoder::decode`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// The response is fully decoded. Check [`ResultSetDecoder::awaiting_fetch`] for an open cursor.
    Complete,
    /// Every buffered byte that could be used has been used
    NeedMoreData,
    /// The server asks for the contents of `filename`
    LocalInfile { filename: String },
}

#[derive(Debug)]
enum Phase {
    DetectResponse,
    ReadMetadata,
    ReadRows(RowState),
    ReadTerminator,
    LocalInfile(String),
    Finished,
    Failed,
}

enum Step {
    Next(Phase),
    Wait(Phase),
    Complete,
    LocalInfile(String),
}

/// An `0xFF` packet, or a `0xFE` packet short enough to be a terminator rather than a row.
fn is_terminator(first: u8, length: usize, capabilities: CapabilityFlags) -> bool {
    match first {
        0xFF => true,
        0xFE if capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) => {
            length < MAX_PAYLOAD_LENGTH
        }
        0xFE => length < 9,
        _ => false,
    }
}

#[derive(Debug)]
struct DecodeState {
    phase: Phase,
    capabilities: CapabilityFlags,
    protocol: RowProtocol,
    opts: Opts,
    sequence: Sequence,
    cancel: CancelToken,
    meta: Option<Arc<ResultRowMeta>>,
    /// Columns of the prepared statement, used when the server skips the metadata
    cached_columns: Option<Arc<[ColumnDefinition]>>,
    result_index: usize,
    /// The current result set already delivered its terminal error
    result_failed: bool,
    awaiting_fetch: bool,
}

/// State machine decoding one command response from bytes fed in arbitrary chunks.
///
/// Events go to the handler `H` as soon as the bytes for them are buffered. Framing errors put
/// the decoder in a failed state; every later call returns an error.
#[derive(Debug)]
pub struct ResultSetDecoder<H> {
    handler: H,
    buffer: ReadBuffer,
    state: DecodeState,
}

impl<H: ResultSetHandler> ResultSetDecoder<H> {
    /// A decoder for the response to a command sent with sequence id 0.
    pub fn new(handler: H, opts: Opts, capabilities: CapabilityFlags, protocol: RowProtocol) -> Self {
        Self {
            handler,
            buffer: ReadBuffer::new(),
            state: DecodeState {
                phase: Phase::DetectResponse,
                capabilities,
                protocol,
                opts,
                sequence: Sequence::new(1),
                cancel: CancelToken::new(),
                meta: None,
                cached_columns: None,
                result_index: 0,
                result_failed: false,
                awaiting_fetch: false,
            },
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.state.cancel = cancel;
        self
    }

    /// Columns to use when the server omits the metadata of a prepared statement's result set.
    pub fn with_cached_columns(mut self, columns: Arc<[ColumnDefinition]>) -> Self {
        self.state.cached_columns = Some(columns);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.state.cancel.clone()
    }

    /// Columns remembered from the last binary result set with metadata
    pub fn cached_columns(&self) -> Option<&Arc<[ColumnDefinition]>> {
        self.state.cached_columns.as_ref()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Sequence id the next packet must carry
    pub fn sequence(&self) -> Sequence {
        self.state.sequence
    }

    /// An open cursor has more rows; send `COM_STMT_FETCH` and call [`Self::begin_fetch`].
    pub fn awaiting_fetch(&self) -> bool {
        self.state.awaiting_fetch
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state.phase, Phase::Failed)
    }

    /// Expect a fresh response; `sequence` follows the request just written.
    pub fn start(&mut self, sequence: Sequence) {
        self.buffer.clear();
        self.state.phase = Phase::DetectResponse;
        self.state.sequence = sequence;
        self.state.meta = None;
        self.state.result_index = 0;
        self.state.result_failed = false;
        self.state.awaiting_fetch = false;
    }

    /// Expect the rows of a `COM_STMT_FETCH`, reusing the metadata of the open cursor.
    pub fn begin_fetch(&mut self, sequence: Sequence) -> Result<()> {
        if !self.state.awaiting_fetch || self.state.meta.is_none() {
            return Err(Error::BadUsageError("no open cursor to fetch from".to_string()));
        }
        self.state.awaiting_fetch = false;
        self.state.sequence = sequence;
        self.state.phase = Phase::ReadRows(RowState::default());
        Ok(())
    }

    /// Expect the OK or ERR that follows the LOCAL INFILE content.
    pub fn resume_after_local_infile(&mut self, sequence: Sequence) -> Result<()> {
        if !matches!(self.state.phase, Phase::LocalInfile(_)) {
            return Err(Error::BadUsageError(
                "no LOCAL INFILE request is pending".to_string(),
            ));
        }
        self.state.sequence = sequence;
        self.state.phase = Phase::DetectResponse;
        Ok(())
    }

    /// Append received bytes and decode as far as they allow.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Progress> {
        self.buffer.extend(bytes);
        self.decode()
    }

    #[tracing::instrument(skip_all)]
    pub fn decode(&mut self) -> Result<Progress> {
        let Self {
            handler,
            buffer,
            state,
        } = self;

        if matches!(state.phase, Phase::Failed) {
            return Err(Error::BadUsageError(
                "decoder failed earlier and cannot continue".to_string(),
            ));
        }

        let mut cursor = buffer.cursor();
        let result = state.run(&mut cursor, handler);
        let consumed = cursor.position();
        buffer.advance(consumed);

        result.inspect_err(|error| {
            state.phase = Phase::Failed;
            state.meta = None;
            if state.result_failed {
                warn!(%error, "decode failed after the result set already reported an error");
            } else {
                debug!(%error, "decode failed");
                handler.on_error(error);
            }
        })
    }
}

impl DecodeState {
    fn run<H: ResultSetHandler>(
        &mut self,
        cursor: &mut Cursor<'_>,
        handler: &mut H,
    ) -> Result<Progress> {
        loop {
            let step = match mem::replace(&mut self.phase, Phase::Failed) {
                Phase::DetectResponse => self.detect_response(cursor, handler)?,
                Phase::ReadMetadata => self.read_metadata(cursor, handler)?,
                Phase::ReadRows(rows) => self.read_rows(rows, cursor, handler)?,
                Phase::ReadTerminator => self.read_terminator(cursor, handler)?,
                Phase::LocalInfile(filename) => Step::LocalInfile(filename),
                Phase::Finished => Step::Complete,
                Phase::Failed => {
                    return Err(Error::LibraryBug(eyre!("decode loop entered a failed phase")));
                }
            };
            match step {
                Step::Next(phase) => self.phase = phase,
                Step::Wait(phase) => {
                    self.phase = phase;
                    return Ok(Progress::NeedMoreData);
                }
                Step::Complete => {
                    self.phase = Phase::Finished;
                    return Ok(Progress::Complete);
                }
                Step::LocalInfile(filename) => {
                    self.phase = Phase::LocalInfile(filename.clone());
                    return Ok(Progress::LocalInfile { filename });
                }
            }
        }
    }

    fn detect_response<H: ResultSetHandler>(
        &mut self,
        cursor: &mut Cursor<'_>,
        handler: &mut H,
    ) -> Result<Step> {
        let mut probe = cursor.clone();
        let Some(packet) = read_logical_packet(&mut probe, self.sequence)? else {
            return Ok(Step::Wait(Phase::DetectResponse));
        };
        let kind = detect_response_kind(&packet.payload, self.capabilities)?;
        trace!(?kind, result_index = self.result_index, "response detected");

        // the column count packet is left for the metadata reader
        if kind == ResponseKind::ResultSet {
            return Ok(Step::Next(Phase::ReadMetadata));
        }

        *cursor = probe;
        self.sequence = packet.sequence;
        match kind {
            ResponseKind::Ok => {
                let ok = OkPayload::parse(&packet.payload, self.capabilities)?;
                self.finish_result(ok.into(), handler)
            }
            ResponseKind::Err => {
                let error = ErrPayload::parse(&packet.payload)?;
                self.server_error(error, handler)
            }
            ResponseKind::LocalInfile => {
                let filename = read_local_infile_request(&packet.payload)?;
                debug!(%filename, "server requested LOCAL INFILE");
                Ok(Step::LocalInfile(filename))
            }
            ResponseKind::ResultSet => Ok(Step::Next(Phase::ReadMetadata)),
        }
    }

    fn read_metadata<H: ResultSetHandler>(
        &mut self,
        cursor: &mut Cursor<'_>,
        handler: &mut H,
    ) -> Result<Step> {
        let read = read_column_metadata(cursor, self.capabilities, self.sequence)?;
        let (columns, metadata_follows, column_count, eof_status) = match read {
            MetadataRead::NeedMore => return Ok(Step::Wait(Phase::ReadMetadata)),
            MetadataRead::ServerError { error, sequence } => {
                self.sequence = sequence;
                return self.server_error(error, handler);
            }
            MetadataRead::Columns {
                columns,
                metadata_follows,
                column_count,
                eof_status,
                sequence,
            } => {
                self.sequence = sequence;
                (columns, metadata_follows, column_count, eof_status)
            }
        };

        let columns: Arc<[ColumnDefinition]> = if metadata_follows {
            let columns: Arc<[ColumnDefinition]> = columns.into();
            if self.protocol == RowProtocol::Binary {
                self.cached_columns = Some(Arc::clone(&columns));
            }
            columns
        } else {
            let cached = self.cached_columns.clone().ok_or_else(|| {
                Error::BadUsageError(
                    "server omitted the column metadata and no cached columns were given"
                        .to_string(),
                )
            })?;
            if cached.len() != column_count {
                return Err(Error::BadUsageError(format!(
                    "cached columns describe {} columns, server sent {column_count}",
                    cached.len()
                )));
            }
            cached
        };

        let meta = Arc::new(ResultRowMeta {
            columns,
            result_index: self.result_index,
            protocol: self.protocol,
            collations: Arc::clone(&self.opts.custom_collations),
            zero_date: self.opts.zero_date_behavior,
        });
        debug!(
            columns = meta.column_count(),
            result_index = self.result_index,
            metadata_follows,
            "result set metadata read"
        );
        handler.on_row_meta(&meta)?;
        self.meta = Some(meta);

        // A legacy EOF announcing an open cursor is the last packet until the first fetch
        let cursor_open = eof_status.filter(|status| {
            status.contains(ServerStatusFlags::SERVER_STATUS_CURSOR_EXISTS)
                && !status.contains(ServerStatusFlags::SERVER_STATUS_LAST_ROW_SENT)
        });
        if let Some(status_flags) = cursor_open {
            if !self.cancel.is_canceled() {
                debug!("cursor opened, rows follow COM_STMT_FETCH");
                self.awaiting_fetch = true;
                return Ok(Step::Complete);
            }
            // no rows arrive without a fetch, so the canceled result ends here
            debug!("cursor opened after cancel, result closed without fetching");
            let status = TerminatorStatus {
                status_flags,
                ..TerminatorStatus::default()
            };
            return self.finish_result(status, handler);
        }

        Ok(Step::Next(Phase::ReadRows(RowState::default())))
    }

    fn read_rows<H: ResultSetHandler>(
        &mut self,
        mut rows: RowState,
        cursor: &mut Cursor<'_>,
        handler: &mut H,
    ) -> Result<Step> {
        let meta = self
            .meta
            .clone()
            .ok_or_else(|| Error::LibraryBug(eyre!("reading rows without metadata")))?;

        loop {
            if rows.is_at_boundary() {
                let data = cursor.remaining();
                let Some(header) = PacketHeader::peek(data) else {
                    return Ok(Step::Wait(Phase::ReadRows(rows)));
                };
                let length = header.length();
                if length > 0 {
                    let Some(&first) = data.get(PACKET_HEADER_LENGTH) else {
                        return Ok(Step::Wait(Phase::ReadRows(rows)));
                    };
                    if is_terminator(first, length, self.capabilities) {
                        return Ok(Step::Next(Phase::ReadTerminator));
                    }
                }
            }

            let env = RowEnv {
                meta: &meta,
                spool: &self.opts.spool,
                canceled: self.cancel.is_canceled() || self.result_failed,
            };
            match rows.step(cursor, &mut self.sequence, &env)? {
                RowStep::NeedMore => return Ok(Step::Wait(Phase::ReadRows(rows))),
                RowStep::Row(body) => {
                    if self.cancel.is_canceled() {
                        trace!("row dropped after cancel");
                    } else {
                        handler.on_row(Row::new(Arc::clone(&meta), body))?;
                    }
                }
                RowStep::Skipped => trace!("row skipped"),
                RowStep::Failed(error) => {
                    warn!(%error, "row could not be spooled, skipping the rest of the result set");
                    handler.on_error(&error);
                    self.result_failed = true;
                }
            }
        }
    }

    fn read_terminator<H: ResultSetHandler>(
        &mut self,
        cursor: &mut Cursor<'_>,
        handler: &mut H,
    ) -> Result<Step> {
        let Some(packet) = read_logical_packet(cursor, self.sequence)? else {
            return Ok(Step::Wait(Phase::ReadTerminator));
        };
        self.sequence = packet.sequence;

        match packet.payload.first() {
            Some(0xFF) => {
                let error = ErrPayload::parse(&packet.payload)?;
                self.server_error(error, handler)
            }
            Some(0xFE) => {
                let status = if self
                    .capabilities
                    .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
                {
                    TerminatorStatus::from(OkPayload::parse(&packet.payload, self.capabilities)?)
                } else {
                    TerminatorStatus::from(read_eof_packet(&packet.payload)?)
                };
                self.finish_result(status, handler)
            }
            _ => Err(Error::InvalidPacket),
        }
    }

    /// An ERR packet ends the command.
    fn server_error<H: ResultSetHandler>(
        &mut self,
        payload: ErrPayload,
        handler: &mut H,
    ) -> Result<Step> {
        let error = Error::ServerError(payload);
        if self.result_failed {
            warn!(%error, "server error after the result set already failed");
        } else {
            debug!(%error, "server returned an error");
            handler.on_error(&error);
        }
        self.result_failed = false;
        self.awaiting_fetch = false;
        self.meta = None;
        Ok(Step::Complete)
    }

    fn finish_result<H: ResultSetHandler>(
        &mut self,
        status: TerminatorStatus,
        handler: &mut H,
    ) -> Result<Step> {
        if status.has_more_to_fetch() && !self.cancel.is_canceled() {
            debug!("cursor has more rows");
            self.awaiting_fetch = true;
            return Ok(Step::Complete);
        }
        self.awaiting_fetch = false;

        let has_more = status.has_more_results();
        if self.result_failed {
            debug!("result set already failed, completion not delivered");
        } else {
            handler.on_result_complete(&status, has_more)?;
        }
        self.result_failed = false;
        self.meta = None;

        if has_more {
            self.result_index += 1;
            Ok(Step::Next(Phase::DetectResponse))
        } else {
            Ok(Step::Complete)
        }
    }
}
