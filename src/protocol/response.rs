use crate::constant::{CapabilityFlags, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use zerocopy::byteorder::little_endian::U16 as U16LE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Kind of the first packet of a command response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Ok,
    Err,
    LocalInfile,
    /// Column count packet
    ResultSet,
}

/// Classify the first payload of a response.
///
/// `0x00` is shared by OK packets and a zero column count; a column count packet is exactly
/// one length-encoded integer (after the optional metadata flag byte), an OK packet is longer.
pub fn detect_response_kind(payload: &[u8], capabilities: CapabilityFlags) -> Result<ResponseKind> {
    let Some(&first) = payload.first() else {
        return Err(Error::InvalidPacket);
    };

    match first {
        0xFF => return Ok(ResponseKind::Err),
        0xFB => return Ok(ResponseKind::LocalInfile),
        _ => {}
    }

    let count_offset =
        usize::from(capabilities.contains(CapabilityFlags::CLIENT_OPTIONAL_RESULTSET_METADATA));
    let Some(&count_first) = payload.get(count_offset) else {
        return Err(Error::InvalidPacket);
    };
    let count_packet_len = count_offset + lenenc_int_len(count_first);

    if first == 0x00 && payload.len() != count_packet_len {
        return Ok(ResponseKind::Ok);
    }
    if payload.len() != count_packet_len {
        return Err(Error::InvalidPacket);
    }
    Ok(ResponseKind::ResultSet)
}

/// OK packet response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPayload {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: ServerStatusFlags,
    pub warnings: u16,
    pub info: String,
}

impl OkPayload {
    /// Parse an OK packet, or an OK-shaped terminator (header `0xFE`).
    pub fn parse(payload: &[u8], capabilities: CapabilityFlags) -> Result<Self> {
        let (header, data) = read_int_1(payload)?;
        if header != 0x00 && header != 0xFE {
            return Err(Error::InvalidPacket);
        }

        let (affected_rows, rest) = read_int_lenenc(data)?;
        let (last_insert_id, rest) = read_int_lenenc(rest)?;
        let (status_flags, rest) = read_int_2(rest)?;
        let (warnings, rest) = read_int_2(rest)?;

        let info = if capabilities.contains(CapabilityFlags::CLIENT_SESSION_TRACK) {
            // session state changes, if any, follow the info string and are ignored
            if rest.is_empty() {
                &[][..]
            } else {
                read_string_lenenc(rest)?.0
            }
        } else {
            rest
        };

        Ok(OkPayload {
            affected_rows,
            last_insert_id,
            status_flags: ServerStatusFlags::from_bits_retain(status_flags),
            warnings,
            info: String::from_utf8_lossy(info).into_owned(),
        })
    }
}

/// ERR packet response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ERROR {} ({}): {}", self.error_code, self.sql_state, self.message)]
pub struct ErrPayload {
    pub error_code: u16,
    pub sql_state: String,
    pub message: String,
}

impl ErrPayload {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (header, data) = read_int_1(payload)?;
        if header != 0xFF {
            return Err(Error::InvalidPacket);
        }

        let (error_code, data) = read_int_2(data)?;

        let (sql_state, rest) = match data.split_first() {
            Some((b'#', after)) => {
                let (state, rest) = read_string_fix(after, 5)?;
                (String::from_utf8_lossy(state).into_owned(), rest)
            }
            _ => (String::new(), data),
        };

        Ok(ErrPayload {
            error_code,
            sql_state,
            message: String::from_utf8_lossy(rest).into_owned(),
        })
    }
}

/// EOF packet body after the `0xFE` header (zero-copy)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct EofPacket {
    pub warnings: U16LE,
    pub status_flags: U16LE,
}

impl EofPacket {
    pub fn status_flags(&self) -> ServerStatusFlags {
        ServerStatusFlags::from_bits_retain(self.status_flags.get())
    }
}

/// Legacy EOF packets are shorter than 9 bytes; anything longer starting with `0xFE` is data.
#[inline]
pub fn is_eof_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&0xFE) && payload.len() < 9
}

pub fn read_eof_packet(payload: &[u8]) -> Result<&EofPacket> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE {
        return Err(Error::InvalidPacket);
    }
    let body = data.get(..4).ok_or(Error::UnexpectedEof)?;
    EofPacket::ref_from_bytes(body).map_err(|_| Error::InvalidPacket)
}

/// `0xFB` followed by the file name the server wants.
pub fn read_local_infile_request(payload: &[u8]) -> Result<String> {
    let (header, rest) = read_int_1(payload)?;
    if header != 0xFB {
        return Err(Error::InvalidPacket);
    }
    Ok(String::from_utf8_lossy(rest).into_owned())
}

/// Status carried by the packet that ends a result set or a row-less response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminatorStatus {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: ServerStatusFlags,
    pub warnings: u16,
    pub info: String,
}

impl TerminatorStatus {
    pub fn has_more_results(&self) -> bool {
        self.status_flags
            .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
    }

    /// An open cursor still has rows to fetch.
    pub fn has_more_to_fetch(&self) -> bool {
        self.status_flags
            .contains(ServerStatusFlags::SERVER_STATUS_CURSOR_EXISTS)
            && !self
                .status_flags
                .contains(ServerStatusFlags::SERVER_STATUS_LAST_ROW_SENT)
    }
}

impl From<OkPayload> for TerminatorStatus {
    fn from(ok: OkPayload) -> Self {
        Self {
            affected_rows: ok.affected_rows,
            last_insert_id: ok.last_insert_id,
            status_flags: ok.status_flags,
            warnings: ok.warnings,
            info: ok.info,
        }
    }
}

impl From<&EofPacket> for TerminatorStatus {
    fn from(eof: &EofPacket) -> Self {
        Self {
            status_flags: eof.status_flags(),
            warnings: eof.warnings.get(),
            ..Self::default()
        }
    }
}
