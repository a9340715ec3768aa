use tracing::debug;

use crate::buffer::Cursor;
use crate::constant::{CapabilityFlags, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::protocol::command::column_definition::ColumnDefinition;
use crate::protocol::packet::{Sequence, read_logical_packet};
use crate::protocol::primitive::*;
use crate::protocol::response::{ErrPayload, is_eof_packet, read_eof_packet};

/// Outcome of [`read_column_metadata`]
#[derive(Debug)]
pub enum MetadataRead {
    /// Not everything is buffered yet. Nothing was consumed.
    NeedMore,
    Columns {
        columns: Vec<ColumnDefinition>,
        /// `false` when the server skipped the definitions; the caller supplies cached columns
        metadata_follows: bool,
        column_count: usize,
        /// Status of the legacy EOF packet closing the definitions, when one was read
        eof_status: Option<ServerStatusFlags>,
        sequence: Sequence,
    },
    /// An ERR packet arrived in place of a definition.
    ServerError { error: ErrPayload, sequence: Sequence },
}

/// Read the column count packet, the column definitions and the legacy EOF packet.
///
/// The read is all-or-nothing: the cursor only moves when a complete outcome is returned.
/// The sequence value after the last packet is returned for the caller to commit.
pub fn read_column_metadata(
    cursor: &mut Cursor<'_>,
    capabilities: CapabilityFlags,
    sequence: Sequence,
) -> Result<MetadataRead> {
    let mark = cursor.mark();

    let Some(count_packet) = read_logical_packet(cursor, sequence)? else {
        return Ok(MetadataRead::NeedMore);
    };
    let mut sequence = count_packet.sequence;

    let mut data: &[u8] = &count_packet.payload;
    let metadata_follows =
        if capabilities.contains(CapabilityFlags::CLIENT_OPTIONAL_RESULTSET_METADATA) {
            let (flag, rest) = read_int_1(data)?;
            data = rest;
            flag == 1
        } else {
            true
        };
    let (column_count, _) = read_int_lenenc(data)?;
    let column_count = usize::try_from(column_count).map_err(|_| Error::InvalidPacket)?;

    if !metadata_follows {
        debug!(column_count, "column metadata skipped by server");
        return Ok(MetadataRead::Columns {
            columns: Vec::new(),
            metadata_follows,
            column_count,
            eof_status: None,
            sequence,
        });
    }

    let mut columns = Vec::with_capacity(column_count);
    for ordinal in 0..column_count {
        let Some(packet) = read_logical_packet(cursor, sequence)? else {
            cursor.rewind(mark);
            return Ok(MetadataRead::NeedMore);
        };
        sequence = packet.sequence;
        if packet.payload.first() == Some(&0xFF) {
            let error = ErrPayload::parse(&packet.payload)?;
            return Ok(MetadataRead::ServerError { error, sequence });
        }
        columns.push(ColumnDefinition::parse(ordinal, &packet.payload)?);
    }

    let mut eof_status = None;
    if !capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
        let Some(packet) = read_logical_packet(cursor, sequence)? else {
            cursor.rewind(mark);
            return Ok(MetadataRead::NeedMore);
        };
        sequence = packet.sequence;
        if packet.payload.first() == Some(&0xFF) {
            let error = ErrPayload::parse(&packet.payload)?;
            return Ok(MetadataRead::ServerError { error, sequence });
        }
        if !is_eof_packet(&packet.payload) {
            return Err(Error::InvalidPacket);
        }
        eof_status = Some(read_eof_packet(&packet.payload)?.status_flags());
    }

    Ok(MetadataRead::Columns {
        columns,
        metadata_follows,
        column_count,
        eof_status,
        sequence,
    })
}
