//! One request/response cycle: encode the command, then decode the response fed back to it.
//!
//! The task never performs I/O. [`CommandTask::start`] yields the request bytes, and every
//! [`CommandTask::feed`] returns the next [`Action`] for the caller's transport.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::constant::{CapabilityFlags, CursorType, PACKET_HEADER_LENGTH};
use crate::error::{Error, Result, eyre};
use crate::handler::{CancelToken, ResultSetHandler};
use crate::opts::Opts;
use crate::protocol::codec::RowProtocol;
use crate::protocol::command::column_definition::ColumnDefinition;
use crate::protocol::command::prepared::{write_execute, write_fetch, write_reset_statement};
use crate::protocol::command::query::write_query;
use crate::protocol::command::resultset::{Progress, ResultSetDecoder};
use crate::protocol::packet::{Sequence, write_packet_header, write_packets};

/// Bytes of LOCAL INFILE content per packet. Kept below the maximum payload so no packet is
/// mistaken for the head of a multi-packet payload.
const LOCAL_INFILE_CHUNK: usize = 1 << 20;

/// Rows requested per `COM_STMT_FETCH`
pub const DEFAULT_FETCH_ROWS: u32 = 1000;

/// What the transport should do next
#[derive(Debug, PartialEq, Eq)]
pub enum Action<'a> {
    /// Send these bytes, then call `feed(&[])`
    Write(&'a [u8]),
    /// Read from the server and feed what arrived
    NeedMoreData,
    Finished,
}

/// A `COM_STMT_EXECUTE` request
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub statement_id: u32,
    /// Pre-encoded parameter block (NULL bitmap, bound flag, types, values)
    pub params: Vec<u8>,
    pub cursor: CursorType,
    /// Rows per fetch while a cursor is open
    pub fetch_rows: u32,
    /// Columns from the prepare response, used when the server omits the metadata
    pub cached_columns: Option<Arc<[ColumnDefinition]>>,
}

impl ExecuteRequest {
    pub fn new(statement_id: u32, params: Vec<u8>) -> Self {
        Self {
            statement_id,
            params,
            cursor: CursorType::NoCursor,
            fetch_rows: DEFAULT_FETCH_ROWS,
            cached_columns: None,
        }
    }
}

struct Upload {
    file: File,
    chunk: Vec<u8>,
    sequence: Sequence,
}

pub struct CommandTask<H> {
    decoder: ResultSetDecoder<H>,
    request: Vec<u8>,
    write_buffer: Vec<u8>,
    statement_id: Option<u32>,
    fetch_rows: u32,
    local_infile_dir: Option<PathBuf>,
    upload: Option<Upload>,
    /// Why a LOCAL INFILE request was answered with an empty file
    refused: Option<Error>,
    finished: bool,
}

impl<H: ResultSetHandler> CommandTask<H> {
    fn new(
        payload: &[u8],
        handler: H,
        opts: Opts,
        capabilities: CapabilityFlags,
        protocol: RowProtocol,
    ) -> Self {
        let local_infile_dir = opts.local_infile_dir.clone();
        let mut decoder = ResultSetDecoder::new(handler, opts, capabilities, protocol);

        let mut request = Vec::with_capacity(PACKET_HEADER_LENGTH + payload.len());
        let mut sequence = Sequence::default();
        write_packets(&mut request, payload, &mut sequence);
        decoder.start(sequence);

        Self {
            decoder,
            request,
            write_buffer: Vec::new(),
            statement_id: None,
            fetch_rows: DEFAULT_FETCH_ROWS,
            local_infile_dir,
            upload: None,
            refused: None,
            finished: false,
        }
    }

    /// `COM_QUERY`; rows use the text protocol.
    pub fn query(sql: &str, handler: H, opts: Opts, capabilities: CapabilityFlags) -> Self {
        let mut payload = Vec::with_capacity(1 + sql.len());
        write_query(&mut payload, sql);
        Self::new(&payload, handler, opts, capabilities, RowProtocol::Text)
    }

    /// `COM_STMT_EXECUTE`; rows use the binary protocol.
    pub fn execute(
        request: ExecuteRequest,
        handler: H,
        opts: Opts,
        capabilities: CapabilityFlags,
    ) -> Self {
        let mut payload = Vec::with_capacity(10 + request.params.len());
        write_execute(
            &mut payload,
            request.statement_id,
            request.cursor,
            &request.params,
        );
        let mut task = Self::new(&payload, handler, opts, capabilities, RowProtocol::Binary);
        if let Some(columns) = request.cached_columns {
            task.decoder = task.decoder.with_cached_columns(columns);
        }
        task.statement_id = Some(request.statement_id);
        task.fetch_rows = request.fetch_rows;
        task
    }

    /// `COM_STMT_RESET`; the response is a single OK or ERR.
    pub fn reset(statement_id: u32, handler: H, opts: Opts, capabilities: CapabilityFlags) -> Self {
        let mut payload = Vec::with_capacity(5);
        write_reset_statement(&mut payload, statement_id);
        Self::new(&payload, handler, opts, capabilities, RowProtocol::Binary)
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.decoder = self.decoder.with_cancel_token(cancel);
        self
    }

    /// The framed request to send first
    pub fn start(&self) -> &[u8] {
        &self.request
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.decoder.cancel_token()
    }

    pub fn decoder(&self) -> &ResultSetDecoder<H> {
        &self.decoder
    }

    pub fn handler(&self) -> &H {
        self.decoder.handler()
    }

    pub fn into_handler(self) -> H {
        self.decoder.into_handler()
    }

    /// Hand received bytes to the decoder. Pass an empty slice after completing a write.
    #[tracing::instrument(skip_all)]
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Action<'_>> {
        if self.upload.is_some() {
            if !bytes.is_empty() {
                return Err(Error::BadUsageError(
                    "server data fed while LOCAL INFILE content is being sent".to_string(),
                ));
            }
            return self.upload_next();
        }
        if self.finished {
            return Ok(Action::Finished);
        }

        match self.decoder.feed(bytes)? {
            Progress::NeedMoreData => Ok(Action::NeedMoreData),
            Progress::Complete if self.decoder.awaiting_fetch() => self.fetch(),
            Progress::Complete => {
                self.finished = true;
                match self.refused.take() {
                    Some(error) => Err(error),
                    None => Ok(Action::Finished),
                }
            }
            Progress::LocalInfile { filename } => self.begin_upload(&filename),
        }
    }

    fn fetch(&mut self) -> Result<Action<'_>> {
        let statement_id = self.statement_id.ok_or_else(|| {
            Error::LibraryBug(eyre!("server opened a cursor for a command without a statement"))
        })?;
        let mut payload = Vec::with_capacity(9);
        write_fetch(&mut payload, statement_id, self.fetch_rows);

        self.write_buffer.clear();
        let mut sequence = Sequence::default();
        write_packets(&mut self.write_buffer, &payload, &mut sequence);
        self.decoder.begin_fetch(sequence)?;
        debug!(statement_id, rows = self.fetch_rows, "fetching from cursor");
        Ok(Action::Write(&self.write_buffer))
    }

    fn begin_upload(&mut self, filename: &str) -> Result<Action<'_>> {
        let sequence = self.decoder.sequence();
        match self.open_local_infile(filename) {
            Ok(file) => {
                debug!(%filename, "sending LOCAL INFILE content");
                self.upload = Some(Upload {
                    file,
                    chunk: vec![0; LOCAL_INFILE_CHUNK],
                    sequence,
                });
                self.upload_next()
            }
            Err(error) => {
                warn!(%filename, %error, "refusing LOCAL INFILE request");
                self.refused = Some(error);
                self.finish_upload(sequence)
            }
        }
    }

    fn upload_next(&mut self) -> Result<Action<'_>> {
        let Some(mut upload) = self.upload.take() else {
            return Err(Error::LibraryBug(eyre!("no LOCAL INFILE upload in progress")));
        };
        let n = upload.file.read(&mut upload.chunk)?;
        if n == 0 {
            return self.finish_upload(upload.sequence);
        }

        self.write_buffer.clear();
        write_packet_header(&mut self.write_buffer, upload.sequence.stamp(), n);
        self.write_buffer.extend_from_slice(&upload.chunk[..n]);
        self.upload = Some(upload);
        Ok(Action::Write(&self.write_buffer))
    }

    /// The empty packet ending the content; the server answers with OK or ERR.
    fn finish_upload(&mut self, mut sequence: Sequence) -> Result<Action<'_>> {
        self.write_buffer.clear();
        write_packet_header(&mut self.write_buffer, sequence.stamp(), 0);
        self.decoder.resume_after_local_infile(sequence)?;
        Ok(Action::Write(&self.write_buffer))
    }

    fn open_local_infile(&self, filename: &str) -> Result<File> {
        let dir = self.local_infile_dir.as_deref().ok_or_else(|| {
            Error::BadConfigError("LOCAL INFILE is disabled; set localInfileDir".to_string())
        })?;
        let path = resolve_within(dir, filename)?;
        File::open(&path).map_err(Error::from)
    }
}

/// Resolve `filename` against `dir`, refusing anything that lands outside it.
fn resolve_within(dir: &Path, filename: &str) -> Result<PathBuf> {
    let dir = dir.canonicalize().map_err(|e| {
        Error::BadConfigError(format!("localInfileDir {}: {e}", dir.display()))
    })?;
    let path = dir.join(filename).canonicalize().map_err(|e| {
        Error::BadUsageError(format!("LOCAL INFILE file {filename}: {e}"))
    })?;
    if !path.starts_with(&dir) {
        return Err(Error::BadUsageError(format!(
            "LOCAL INFILE file {filename} is outside localInfileDir"
        )));
    }
    Ok(path)
}
