mod common;

use std::path::Path;

use common::{Event, Recorder, Wire, column, feed_in_chunks, init_tracing};
use zero_mysql_stream::constant::{
    CapabilityFlags, ColumnType, MAX_PAYLOAD_LENGTH, ServerStatusFlags,
};
use zero_mysql_stream::protocol::RowProtocol;
use zero_mysql_stream::protocol::primitive::{write_bytes_lenenc, write_int_4};
use zero_mysql_stream::{
    Error, ErrorKind, Opts, Progress, ResultSetDecoder, SpoolOpts, Value, ZeroDateBehavior,
};

const AUTOCOMMIT: ServerStatusFlags = ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT;

fn decoder(spool: SpoolOpts) -> ResultSetDecoder<Recorder> {
    decoder_for(spool, RowProtocol::Text)
}

fn decoder_for(spool: SpoolOpts, protocol: RowProtocol) -> ResultSetDecoder<Recorder> {
    let mut opts = Opts::new(ZeroDateBehavior::Round);
    opts.spool = spool;
    ResultSetDecoder::new(
        Recorder::default(),
        opts,
        CapabilityFlags::CLIENT_PROTOCOL_41,
        protocol,
    )
}

/// Text row payload holding one value of `len` bytes
fn blob_row(len: usize, fill: u8) -> Vec<u8> {
    let mut payload = Vec::with_capacity(len + 9);
    write_bytes_lenenc(&mut payload, &vec![fill; len]);
    payload
}

fn spool_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

fn blob_result_header() -> Wire {
    let mut wire = Wire::new();
    wire.column_count(1)
        .columns(&[column("data", ColumnType::MYSQL_TYPE_BLOB, 63)])
        .eof(AUTOCOMMIT);
    wire
}

#[test]
fn rows_past_the_in_memory_limit_are_spilled() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let limit = MAX_PAYLOAD_LENGTH + 100;
    let spool = SpoolOpts {
        dir: dir.path().to_path_buf(),
        big_column_threshold: usize::MAX,
        max_in_memory_row_size: limit,
    };

    // values this long take a 9-byte length prefix
    let below = blob_row(limit - 1 - 9, b'a');
    let above = blob_row(limit + 1 - 9, b'b');
    assert_eq!(below.len(), limit - 1);
    assert_eq!(above.len(), limit + 1);

    let mut wire = blob_result_header();
    wire.packet(&below).packet(&above).eof(AUTOCOMMIT);
    let wire = wire.take();

    let mut decoder = decoder(spool);
    let progress = feed_in_chunks(&mut decoder, &wire, 1 << 20).unwrap();
    assert_eq!(progress, Progress::Complete);

    let mut recorder = decoder.into_handler();
    assert_eq!(recorder.rows(), 2);
    assert_eq!(recorder.count(|e| matches!(e, Event::Complete { .. })), 1);

    let in_memory = recorder.events.iter().find_map(|e| match e {
        Event::Row(values) => Some(values),
        _ => None,
    });
    match in_memory.map(Vec::as_slice) {
        Some([Value::Bytes(bytes)]) => {
            assert_eq!(bytes.len(), limit - 10);
            assert!(bytes.iter().all(|&b| b == b'a'));
        }
        _ => panic!("row below the limit was not decoded in memory"),
    }

    let spilled = recorder.spilled.pop().unwrap();
    let spooled = spilled.spilled().unwrap();
    assert_eq!(spooled.total(), (limit + 1) as u64);
    assert!(spooled.path().starts_with(dir.path()));
    assert_eq!(spool_files(dir.path()), 1);

    match spilled.into_values().unwrap().as_slice() {
        [Value::Bytes(bytes)] => {
            assert_eq!(bytes.len(), limit - 8);
            assert!(bytes.iter().all(|&b| b == b'b'));
        }
        _ => panic!("spilled row did not decode to one value"),
    }
    assert_eq!(spool_files(dir.path()), 0);
}

#[test]
fn single_packet_rows_respect_a_small_in_memory_limit() {
    let dir = tempfile::tempdir().unwrap();
    let limit = 1024;
    let spool = SpoolOpts {
        dir: dir.path().to_path_buf(),
        big_column_threshold: usize::MAX,
        max_in_memory_row_size: limit,
    };

    // values of 251 bytes or more take a 3-byte length prefix
    let below = blob_row(limit - 1 - 3, b'c');
    let above = blob_row(limit + 1 - 3, b'd');
    assert_eq!(below.len(), limit - 1);
    assert_eq!(above.len(), limit + 1);

    let mut wire = blob_result_header();
    wire.packet(&below).packet(&above).eof(AUTOCOMMIT);

    let mut decoder = decoder(spool);
    let progress = feed_in_chunks(&mut decoder, &wire.take(), 7).unwrap();
    assert_eq!(progress, Progress::Complete);

    let mut recorder = decoder.into_handler();
    assert_eq!(recorder.rows(), 2);
    assert_eq!(recorder.count(|e| matches!(e, Event::Row(_))), 1);
    assert_eq!(recorder.spilled.len(), 1);

    let spilled = recorder.spilled.pop().unwrap();
    assert_eq!(spilled.spilled().unwrap().total(), (limit + 1) as u64);
    assert_eq!(spool_files(dir.path()), 1);
    match spilled.into_values().unwrap().as_slice() {
        [Value::Bytes(bytes)] => {
            assert_eq!(bytes.len(), limit - 2);
            assert!(bytes.iter().all(|&b| b == b'd'));
        }
        _ => panic!("spilled row did not decode to one value"),
    }
    assert_eq!(spool_files(dir.path()), 0);
}

#[test]
fn cancel_while_a_column_is_spooling_removes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let spool = SpoolOpts {
        dir: dir.path().to_path_buf(),
        big_column_threshold: 100,
        ..SpoolOpts::default()
    };

    let header = blob_result_header().take();
    let mut wire = blob_result_header();
    wire.packet(&blob_row(1000, b'x')).eof(AUTOCOMMIT);
    let wire = wire.take();

    let mut decoder = decoder(spool);
    let split = header.len() + 500;
    let progress = decoder.feed(&wire[..split]).unwrap();
    assert_eq!(progress, Progress::NeedMoreData);
    assert_eq!(spool_files(dir.path()), 1);

    decoder.cancel_token().cancel();
    let progress = decoder.feed(&wire[split..]).unwrap();
    assert_eq!(progress, Progress::Complete);
    assert_eq!(spool_files(dir.path()), 0);

    let recorder = decoder.handler();
    assert_eq!(recorder.rows(), 0);
    assert_eq!(recorder.count(|e| matches!(e, Event::Complete { .. })), 1);
}

#[test]
fn cancel_while_a_row_is_spilling_removes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let spool = SpoolOpts {
        dir: dir.path().to_path_buf(),
        big_column_threshold: usize::MAX,
        max_in_memory_row_size: 1024,
    };

    let header = blob_result_header().take();
    let mut wire = blob_result_header();
    wire.packet(&blob_row(MAX_PAYLOAD_LENGTH + 50, b'y')).eof(AUTOCOMMIT);
    let wire = wire.take();

    let mut decoder = decoder(spool);
    // the first packet and the header of the second one
    let split = header.len() + 4 + MAX_PAYLOAD_LENGTH + 4;
    let progress = decoder.feed(&wire[..split]).unwrap();
    assert_eq!(progress, Progress::NeedMoreData);
    assert_eq!(spool_files(dir.path()), 1);

    decoder.cancel_token().cancel();
    let progress = decoder.feed(&wire[split..]).unwrap();
    assert_eq!(progress, Progress::Complete);
    assert_eq!(spool_files(dir.path()), 0);
    assert_eq!(decoder.handler().rows(), 0);
}

#[test]
fn spool_failure_ends_the_result_set() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let spool = SpoolOpts {
        dir: dir.path().join("missing"),
        big_column_threshold: 100,
        ..SpoolOpts::default()
    };

    let mut wire = blob_result_header();
    wire.packet(&blob_row(1000, b'z'))
        .packet(&blob_row(10, b'z'))
        .eof(AUTOCOMMIT);

    let mut decoder = decoder(spool);
    let progress = decoder.feed(&wire.take()).unwrap();

    assert_eq!(progress, Progress::Complete);
    assert!(!decoder.is_failed());
    let recorder = decoder.handler();
    assert_eq!(recorder.rows(), 0);
    assert_eq!(recorder.count(|e| matches!(e, Event::Error(_))), 1);
    assert_eq!(recorder.count(|e| matches!(e, Event::Complete { .. })), 0);
}

#[test]
fn sequence_error_while_a_row_is_spilling_removes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let spool = SpoolOpts {
        dir: dir.path().to_path_buf(),
        big_column_threshold: usize::MAX,
        max_in_memory_row_size: 1024,
    };

    let header = blob_result_header().take();
    let mut wire = blob_result_header();
    wire.packet(&blob_row(MAX_PAYLOAD_LENGTH + 50, b'y')).eof(AUTOCOMMIT);
    let mut wire = wire.take();
    // the second packet of the row claims id 9 instead of 5
    let second_header = header.len() + 4 + MAX_PAYLOAD_LENGTH;
    wire[second_header + 3] = 9;

    let mut decoder = decoder(spool);
    let split = header.len() + 1000;
    assert_eq!(decoder.feed(&wire[..split]).unwrap(), Progress::NeedMoreData);
    assert_eq!(spool_files(dir.path()), 1);

    let err = decoder.feed(&wire[split..]).unwrap_err();
    assert!(matches!(err, Error::SequenceMismatch { expected: 5, actual: 9 }));
    assert!(decoder.is_failed());
    assert_eq!(spool_files(dir.path()), 0);
    assert_eq!(decoder.handler().count(|e| matches!(e, Event::Error(_))), 1);
}

#[test]
fn streamed_column_spool_failure_ends_the_result_set() {
    let dir = tempfile::tempdir().unwrap();
    let spool = SpoolOpts {
        dir: dir.path().join("missing"),
        big_column_threshold: 100,
        ..SpoolOpts::default()
    };

    let mut wire = blob_result_header();
    wire.packet(&blob_row(1000, b'z'))
        .packet(&blob_row(10, b'z'))
        .eof(AUTOCOMMIT);

    let mut decoder = decoder(spool);
    let progress = feed_in_chunks(&mut decoder, &wire.take(), 7).unwrap();

    assert_eq!(progress, Progress::Complete);
    assert!(!decoder.is_failed());
    let recorder = decoder.handler();
    assert_eq!(recorder.rows(), 0);
    assert_eq!(recorder.count(|e| matches!(e, Event::Error(_))), 1);
    assert_eq!(recorder.count(|e| matches!(e, Event::Complete { .. })), 0);
    assert_eq!(decoder.feed(&[]).unwrap(), Progress::Complete);
}

#[test]
fn row_spill_failure_ends_the_result_set() {
    let dir = tempfile::tempdir().unwrap();
    let spool = SpoolOpts {
        dir: dir.path().join("missing"),
        big_column_threshold: usize::MAX,
        max_in_memory_row_size: 1024,
    };

    let mut wire = blob_result_header();
    wire.packet(&blob_row(2000, b'z'))
        .packet(&blob_row(10, b'z'))
        .eof(AUTOCOMMIT);

    let mut decoder = decoder(spool);
    let progress = feed_in_chunks(&mut decoder, &wire.take(), 7).unwrap();

    assert_eq!(progress, Progress::Complete);
    assert!(!decoder.is_failed());
    let recorder = decoder.handler();
    assert_eq!(recorder.rows(), 0);
    assert_eq!(recorder.count(|e| matches!(e, Event::Error(_))), 1);
    assert_eq!(recorder.count(|e| matches!(e, Event::Complete { .. })), 0);
    assert_eq!(decoder.feed(&[]).unwrap(), Progress::Complete);
}

#[test]
fn framing_error_after_a_spool_failure_is_not_reported_twice() {
    let dir = tempfile::tempdir().unwrap();
    let spool = SpoolOpts {
        dir: dir.path().join("missing"),
        big_column_threshold: 100,
        ..SpoolOpts::default()
    };

    let mut wire = blob_result_header();
    wire.packet(&blob_row(1000, b'z'));
    let mut bytes = wire.take();
    // the next row skips from id 5 to 9
    let mut stray = Wire::starting_at(9);
    stray.packet(&blob_row(10, b'z'));
    bytes.extend_from_slice(&stray.take());

    let mut decoder = decoder(spool);
    let err = decoder.feed(&bytes).unwrap_err();

    assert!(matches!(err, Error::SequenceMismatch { expected: 5, actual: 9 }));
    assert!(decoder.is_failed());
    assert_eq!(decoder.handler().count(|e| matches!(e, Event::Error(_))), 1);
}

#[test]
fn binary_row_streams_a_big_column_before_a_null() {
    let dir = tempfile::tempdir().unwrap();
    let spool = SpoolOpts {
        dir: dir.path().to_path_buf(),
        big_column_threshold: 100,
        ..SpoolOpts::default()
    };
    let blob: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();

    // three columns: one bitmap byte, `note` is column 2 at bit 4
    let mut row = vec![0x00, 0b0001_0000];
    write_int_4(&mut row, 7);
    write_bytes_lenenc(&mut row, &blob);

    let mut wire = Wire::new();
    wire.column_count(3)
        .columns(&[
            column("id", ColumnType::MYSQL_TYPE_LONG, 63),
            column("data", ColumnType::MYSQL_TYPE_BLOB, 63),
            column("note", ColumnType::MYSQL_TYPE_VAR_STRING, 255),
        ])
        .eof(AUTOCOMMIT)
        .packet(&row)
        .eof(AUTOCOMMIT);

    let mut decoder = decoder_for(spool, RowProtocol::Binary);
    let progress = feed_in_chunks(&mut decoder, &wire.take(), 7).unwrap();
    assert_eq!(progress, Progress::Complete);

    let recorder = decoder.into_handler();
    let values = recorder.events.iter().find_map(|e| match e {
        Event::Row(values) => Some(values),
        _ => None,
    });
    match values.map(Vec::as_slice) {
        Some([Value::SignedInt(7), Value::Spooled(spooled), Value::Null]) => {
            assert_eq!(spooled.total(), 1000);
            assert_eq!(spooled.read_all().unwrap(), blob);
        }
        other => panic!("unexpected row {other:?}"),
    }
}

#[test]
fn spool_errors_are_resource_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = zero_mysql_stream::spool::SpoolWriter::create(&dir.path().join("missing"));
    writer.write(b"lost");
    assert!(writer.has_failed());
    let err = writer.finish().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert!(!err.is_fatal());
}
