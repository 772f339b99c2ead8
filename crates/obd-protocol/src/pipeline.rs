//! Command Pipeline
//!
//! Owns the adapter stream and runs one request/response exchange at a
//! time. Every call takes `&mut self`, so a second request cannot be
//! written while a reply is still being read.

use crate::command::{Command, Reply};
use crate::error::{FrameError, PipelineError};
use crate::framer::{encode, scan_frame};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Sequential command executor over a duplex byte stream
pub struct CommandPipeline<S> {
    stream: S,
    /// Set once a timeout or stream fault leaves the byte position unknown
    desynchronized: bool,
    /// Exchanges completed with a full frame
    completed: u64,
}

impl<S> CommandPipeline<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            desynchronized: false,
            completed: 0,
        }
    }

    /// Run `command` and decode its reply.
    pub async fn execute<T>(&mut self, command: &Command<T>) -> Result<T, PipelineError> {
        Ok(self.transact(command).await?.into_result()?)
    }

    /// Run `command` and return the frame together with its decode result.
    ///
    /// Transport faults and timeouts are errors; decode failures are carried
    /// inside the [`Reply`] and leave the pipeline usable.
    pub async fn transact<T>(&mut self, command: &Command<T>) -> Result<Reply<T>, PipelineError> {
        if self.desynchronized {
            return Err(PipelineError::Desynchronized);
        }

        debug!("Sending {:?}", command.request());
        if let Err(e) = self.send(command.request()).await {
            self.desynchronized = true;
            return Err(e.into());
        }

        let frame = match tokio::time::timeout(command.timeout(), scan_frame(&mut self.stream)).await
        {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                warn!("Stream fault while reading reply to {:?}: {}", command.request(), e);
                self.desynchronized = true;
                return Err(e.into());
            }
            Err(_) => {
                warn!(
                    "No reply to {:?} within {:?}",
                    command.request(),
                    command.timeout()
                );
                self.desynchronized = true;
                return Err(PipelineError::Timeout {
                    command: command.request().to_string(),
                    after_ms: command.timeout().as_millis() as u64,
                });
            }
        };

        self.completed += 1;
        debug!("Reply to {:?}: {:?}", command.request(), frame.text());

        let value = command.decode(&frame);
        if let Err(e) = &value {
            debug!("Reply to {:?} did not decode: {}", command.request(), e);
        }
        Ok(Reply { frame, value })
    }

    async fn send(&mut self, request: &str) -> Result<(), FrameError> {
        self.stream.write_all(&encode(request)).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Whether an earlier failure made the stream position unknown
    pub fn is_desynchronized(&self) -> bool {
        self.desynchronized
    }

    /// Number of exchanges that received a complete frame
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Shut down the write half and hand the stream back
    pub async fn shutdown(mut self) -> S {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Stream shutdown: {}", e);
        }
        self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
