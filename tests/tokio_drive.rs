mod common;

use std::io::{Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use common::{Event, Recorder, ScriptedStream, Wire, column};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use zero_mysql_stream::constant::{CapabilityFlags, ColumnType, ServerStatusFlags};
use zero_mysql_stream::tokio::drive;
use zero_mysql_stream::{CollectHandler, CommandTask, Error, Opts, Value, ZeroDateBehavior};

const AUTOCOMMIT: ServerStatusFlags = ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT;

impl AsyncRead for ScriptedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let mut chunk = vec![0u8; buf.remaining()];
        let n = Read::read(this, &mut chunk)?;
        buf.put_slice(&chunk[..n]);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Poll::Ready(Write::write(self.get_mut(), buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Write::flush(self.get_mut()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn opts() -> Opts {
    Opts::new(ZeroDateBehavior::ConvertToNull)
}

#[tokio::test]
async fn multi_statement_query() {
    let capabilities = CapabilityFlags::CLIENT_PROTOCOL_41
        | CapabilityFlags::CLIENT_DEPRECATE_EOF
        | CapabilityFlags::CLIENT_MULTI_STATEMENTS;

    let mut wire = Wire::new();
    wire.column_count(1)
        .columns(&[column("n", ColumnType::MYSQL_TYPE_LONG, 63)])
        .text_row(&[Some("1")])
        .text_row(&[Some("2")])
        .ok(0xFE, 0, 0, AUTOCOMMIT | ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
        .column_count(1)
        .columns(&[column("d", ColumnType::MYSQL_TYPE_DATE, 63)])
        .text_row(&[Some("0000-00-00")])
        .ok(0xFE, 0, 0, AUTOCOMMIT);

    let mut stream = ScriptedStream::new(vec![wire.take()], 6);
    let mut task = CommandTask::query("SELECT 1; SELECT 2", Recorder::default(), opts(), capabilities);
    drive(&mut stream, &mut task).await.unwrap();

    let handler = task.into_handler();
    assert_eq!(
        handler.events,
        vec![
            Event::Meta {
                columns: vec!["n".to_string()],
                result_index: 0,
            },
            Event::Row(vec![Value::SignedInt(1)]),
            Event::Row(vec![Value::SignedInt(2)]),
            Event::Complete {
                affected_rows: 0,
                last_insert_id: 0,
                has_more: true,
            },
            Event::Meta {
                columns: vec!["d".to_string()],
                result_index: 1,
            },
            Event::Row(vec![Value::Null]),
            Event::Complete {
                affected_rows: 0,
                last_insert_id: 0,
                has_more: false,
            },
        ]
    );
}

#[tokio::test]
async fn closed_connection_is_fatal() {
    let mut wire = Wire::new();
    wire.column_count(1)
        .columns(&[column("n", ColumnType::MYSQL_TYPE_LONG, 63)])
        .eof(AUTOCOMMIT);

    let mut stream = ScriptedStream::new(vec![wire.take()], 64);
    let mut task = CommandTask::query(
        "SELECT n FROM t",
        Recorder::default(),
        opts(),
        CapabilityFlags::CLIENT_PROTOCOL_41,
    );
    let err = drive(&mut stream, &mut task).await.unwrap_err();
    assert!(matches!(err, Error::IoError(_)));
    assert!(err.is_fatal());
    assert!(!task.is_finished());
}

#[tokio::test]
async fn over_a_duplex_pipe() {
    let (mut client, mut server) = tokio::io::duplex(64);

    let server = tokio::spawn(async move {
        let mut header = [0u8; 4];
        server.read_exact(&mut header).await.unwrap();
        let len = usize::from(header[0])
            | (usize::from(header[1]) << 8)
            | (usize::from(header[2]) << 16);
        let mut request = vec![0u8; len];
        server.read_exact(&mut request).await.unwrap();

        let mut wire = Wire::new();
        wire.column_count(1)
            .columns(&[column("name", ColumnType::MYSQL_TYPE_VAR_STRING, 255)])
            .eof(AUTOCOMMIT);
        for i in 0..100 {
            let name = format!("row-{i}");
            wire.text_row(&[Some(name.as_str())]);
        }
        wire.eof(AUTOCOMMIT);
        server.write_all(&wire.take()).await.unwrap();
        request
    });

    let mut task = CommandTask::query(
        "SELECT name FROM t",
        CollectHandler::new(),
        opts(),
        CapabilityFlags::CLIENT_PROTOCOL_41,
    );
    drive(&mut client, &mut task).await.unwrap();

    let request = server.await.unwrap();
    assert_eq!(request[0], 0x03);
    assert_eq!(&request[1..], b"SELECT name FROM t");

    let names: Vec<String> = task
        .handler()
        .rows()
        .map(|r| r.get(0).unwrap())
        .collect();
    assert_eq!(names.len(), 100);
    assert_eq!(names[0], "row-0");
    assert_eq!(names[99], "row-99");
}
