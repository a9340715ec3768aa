use crate::constant::{CommandByte, CursorType};
use crate::protocol::primitive::*;

/// Write COM_STMT_EXECUTE command
///
/// `params` is the already encoded parameter block: NULL bitmap, new-params-bound flag,
/// types and values. It is empty for statements without placeholders.
pub fn write_execute(out: &mut Vec<u8>, statement_id: u32, cursor: CursorType, params: &[u8]) {
    write_int_1(out, CommandByte::StmtExecute as u8);
    write_int_4(out, statement_id);

    // flags (1 byte)
    write_int_1(out, cursor as u8);

    // iteration count (4 bytes) - always 1
    write_int_4(out, 1);

    out.extend_from_slice(params);
}

/// Write COM_STMT_FETCH command
pub fn write_fetch(out: &mut Vec<u8>, statement_id: u32, rows: u32) {
    write_int_1(out, CommandByte::StmtFetch as u8);
    write_int_4(out, statement_id);
    write_int_4(out, rows);
}

/// Write COM_STMT_RESET command
pub fn write_reset_statement(out: &mut Vec<u8>, statement_id: u32) {
    write_int_1(out, CommandByte::StmtReset as u8);
    write_int_4(out, statement_id);
}
