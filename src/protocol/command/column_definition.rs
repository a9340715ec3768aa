use crate::constant::{BINARY_COLLATION, ColumnFlags, ColumnType};
use crate::error::{Error, Result, eyre};
use crate::protocol::primitive::*;
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Length of the fixed tail, announced by a `0x0c` length-encoded integer
const TAIL_LENGTH: usize = 12;

/// Fixed-size tail of Column Definition packet (12 bytes)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct ColumnDefinitionTail {
    charset: U16LE,
    column_length: U32LE,
    column_type: u8,
    flags: U16LE,
    decimals: u8,
    reserved: U16LE,
}

impl ColumnDefinitionTail {
    pub fn charset(&self) -> u16 {
        self.charset.get()
    }

    pub fn column_length(&self) -> u32 {
        self.column_length.get()
    }

    pub fn column_type(&self) -> Result<ColumnType> {
        ColumnType::from_u8(self.column_type).ok_or_else(|| {
            Error::LibraryBug(eyre!("unknown column type: 0x{:02X}", self.column_type))
        })
    }

    /// Unknown bits are kept; servers add flags over time.
    pub fn flags(&self) -> ColumnFlags {
        ColumnFlags::from_bits_retain(self.flags.get())
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }
}

/// One column of a result set.
///
/// Read once per result set and shared by every row of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Position in the row, starting at 0
    pub ordinal: usize,
    pub catalog: String,
    pub schema: String,
    /// Table alias
    pub table: String,
    pub org_table: String,
    /// Column alias
    pub name: String,
    pub org_name: String,
    /// Collation id
    pub charset: u16,
    pub column_length: u32,
    pub column_type: ColumnType,
    pub flags: ColumnFlags,
    pub decimals: u8,
}

impl ColumnDefinition {
    pub fn parse(ordinal: usize, payload: &[u8]) -> Result<Self> {
        let (catalog, data) = read_string_lenenc(payload)?;
        let (schema, data) = read_string_lenenc(data)?;
        let (table, data) = read_string_lenenc(data)?;
        let (org_table, data) = read_string_lenenc(data)?;
        let (name, data) = read_string_lenenc(data)?;
        let (org_name, data) = read_string_lenenc(data)?;

        // length of fixed fields is always 0x0c
        let (_length, data) = read_int_lenenc(data)?;
        let tail_bytes = data.get(..TAIL_LENGTH).ok_or(Error::UnexpectedEof)?;
        let tail = ColumnDefinitionTail::ref_from_bytes(tail_bytes).map_err(|_| Error::InvalidPacket)?;

        Ok(Self {
            ordinal,
            catalog: lossy(catalog),
            schema: lossy(schema),
            table: lossy(table),
            org_table: lossy(org_table),
            name: lossy(name),
            org_name: lossy(org_name),
            charset: tail.charset(),
            column_length: tail.column_length(),
            column_type: tail.column_type()?,
            flags: tail.flags(),
            decimals: tail.decimals(),
        })
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags.contains(ColumnFlags::UNSIGNED_FLAG)
    }

    /// Values of this column are raw bytes rather than text.
    pub fn is_binary(&self) -> bool {
        self.charset == BINARY_COLLATION
    }

    pub fn is_nullable(&self) -> bool {
        !self.flags.contains(ColumnFlags::NOT_NULL_FLAG)
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Encode a column definition packet payload. Used to build server responses in tests and benches.
pub fn write_column_definition(out: &mut Vec<u8>, column: &ColumnDefinition) {
    write_bytes_lenenc(out, column.catalog.as_bytes());
    write_bytes_lenenc(out, column.schema.as_bytes());
    write_bytes_lenenc(out, column.table.as_bytes());
    write_bytes_lenenc(out, column.org_table.as_bytes());
    write_bytes_lenenc(out, column.name.as_bytes());
    write_bytes_lenenc(out, column.org_name.as_bytes());
    write_int_lenenc(out, TAIL_LENGTH as u64);
    write_int_2(out, column.charset);
    write_int_4(out, column.column_length);
    write_int_1(out, column.column_type as u8);
    write_int_2(out, column.flags.bits());
    write_int_1(out, column.decimals);
    write_int_2(out, 0);
}
