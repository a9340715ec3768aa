//! Blocking driver for a [`CommandTask`] over any `Read + Write` stream.

use std::io::{Read, Write};

use tracing::instrument;

use crate::error::{Error, Result};
use crate::handler::ResultSetHandler;
use crate::protocol::command::{Action, CommandTask};

const READ_CHUNK: usize = 64 * 1024;

/// Send the task's request and pump bytes until the response is fully decoded.
#[instrument(skip_all)]
pub fn drive<S, H>(stream: &mut S, task: &mut CommandTask<H>) -> Result<()>
where
    S: Read + Write,
    H: ResultSetHandler,
{
    stream.write_all(task.start())?;
    stream.flush()?;

    let mut buf = vec![0u8; READ_CHUNK];
    let mut received = 0;
    loop {
        let action = task.feed(&buf[..received])?;
        received = 0;
        match action {
            Action::Write(bytes) => {
                stream.write_all(bytes)?;
                stream.flush()?;
            }
            Action::NeedMoreData => {
                let n = stream.read(&mut buf)?;
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
