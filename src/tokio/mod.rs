//! Async driver for a [`CommandTask`] over a tokio stream.

use ::tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::instrument;

use crate::error::{Error, Result};
use crate::handler::ResultSetHandler;
use crate::protocol::command::{Action, CommandTask};

const READ_CHUNK: usize = 64 * 1024;

/// Send the task's request and pump bytes until the response is fully decoded.
///
/// Decoding and spool writes run inline on the calling task.
#[instrument(skip_all)]
pub async fn drive<S, H>(stream: &mut S, task: &mut CommandTask<H>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: ResultSetHandler,
{
    stream.write_all(task.start()).await?;
    stream.flush().await?;

    let mut buf = vec![0u8; READ_CHUNK];
    let mut received = 0;
    loop {
        let action = task.feed(&buf[..received])?;
        received = 0;
        match action {
            Action::Write(bytes) => {
                stream.write_all(bytes).await?;
                stream.flush().await?;
            }
            Action::NeedMoreData => {
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    return Err(Error::IoError(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed before the response ended",
                    )));
                }
                received = n;
            }
            Action::Finished => return Ok(()),
        }
    }
}
