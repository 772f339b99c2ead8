//! Scripted adapter stream for tests
//!
//! [`ScriptedStream`] plays back canned replies, one per request line, and
//! records every request it sees. A request written while the previous
//! reply has not been read up to its prompt counts as a violation.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::framer::{PROMPT, REQUEST_TERMINATOR};

#[derive(Debug)]
enum Action {
    /// Reply with these bytes
    Reply(Vec<u8>),
    /// Never reply
    Silent,
    /// Send these bytes, then end the stream
    Hangup(Vec<u8>),
}

#[derive(Debug)]
struct Step {
    request: String,
    action: Action,
}

#[derive(Debug, Default)]
struct Inner {
    steps: VecDeque<Step>,
    pending_line: Vec<u8>,
    outgoing: VecDeque<u8>,
    /// A reply has been requested but its prompt has not been read yet
    awaiting_prompt: bool,
    silent: bool,
    eof: bool,
    shut_down: bool,
    requests: Vec<String>,
    violations: usize,
    mismatches: Vec<(String, String)>,
    /// Reader parked until a reply or end-of-data is available
    read_waker: Option<Waker>,
}

impl Inner {
    fn on_request(&mut self, request: String) {
        if self.awaiting_prompt {
            self.violations += 1;
        }
        self.requests.push(request.clone());

        let Some(step) = self.steps.pop_front() else {
            self.mismatches.push(("<end of script>".into(), request));
            self.eof = true;
            return;
        };
        if step.request != request {
            self.mismatches.push((step.request, request));
        }

        self.awaiting_prompt = true;
        match step.action {
            Action::Reply(bytes) => self.outgoing.extend(bytes),
            Action::Silent => self.silent = true,
            Action::Hangup(bytes) => {
                self.outgoing.extend(bytes);
                self.eof = true;
            }
        }
    }

    fn wake_reader(&mut self) {
        if !self.outgoing.is_empty() || self.eof {
            if let Some(waker) = self.read_waker.take() {
                waker.wake();
            }
        }
    }
}

/// Builder for a [`ScriptedStream`]
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    steps: VecDeque<Step>,
}

impl ScriptBuilder {
    /// Answer `request` with `response` (include the `>` prompt)
    pub fn reply(mut self, request: &str, response: &str) -> Self {
        self.steps.push_back(Step {
            request: request.to_string(),
            action: Action::Reply(response.as_bytes().to_vec()),
        });
        self
    }

    /// Accept `request` and never answer it
    pub fn silent(mut self, request: &str) -> Self {
        self.steps.push_back(Step {
            request: request.to_string(),
            action: Action::Silent,
        });
        self
    }

    /// Answer `request` with `partial` and then end the stream
    pub fn hangup(mut self, request: &str, partial: &str) -> Self {
        self.steps.push_back(Step {
            request: request.to_string(),
            action: Action::Hangup(partial.as_bytes().to_vec()),
        });
        self
    }

    pub fn build(self) -> (ScriptedStream, ScriptHandle) {
        let inner = Arc::new(Mutex::new(Inner {
            steps: self.steps,
            ..Default::default()
        }));
        (
            ScriptedStream {
                inner: Arc::clone(&inner),
            },
            ScriptHandle { inner },
        )
    }
}

/// In-memory adapter that follows a fixed script
#[derive(Debug)]
pub struct ScriptedStream {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedStream {
    pub fn builder() -> ScriptBuilder {
        ScriptBuilder::default()
    }
}

/// Inspection handle kept by the test after the stream is handed over
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptHandle {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    /// Request lines received, in order, without terminators
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    /// Requests written while an earlier reply was still unread
    pub fn violations(&self) -> usize {
        self.lock().violations
    }

    /// `(expected, received)` pairs where the request differed from the script
    pub fn mismatches(&self) -> Vec<(String, String)> {
        self.lock().mismatches.clone()
    }

    /// Script steps not yet consumed
    pub fn remaining(&self) -> usize {
        self.lock().steps.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }
}

fn lock(inner: &Arc<Mutex<Inner>>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut inner = lock(&self.inner);

        if !inner.outgoing.is_empty() {
            let n = buf.remaining().min(inner.outgoing.len());
            let chunk: Vec<u8> = inner.outgoing.drain(..n).collect();
            if chunk.contains(&PROMPT) && !inner.outgoing.contains(&PROMPT) {
                inner.awaiting_prompt = false;
            }
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }

        if inner.eof {
            // Zero bytes read signals end-of-data
            return Poll::Ready(Ok(()));
        }

        // Silent step or nothing requested yet
        inner.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut inner = lock(&self.inner);
        if inner.shut_down {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted stream shut down",
            )));
        }

        for &byte in buf {
            if byte == REQUEST_TERMINATOR {
                let line = std::mem::take(&mut inner.pending_line);
                let request = String::from_utf8_lossy(&line).into_owned();
                inner.on_request(request);
            } else {
                inner.pending_line.push(byte);
            }
        }
        inner.wake_reader();
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        lock(&self.inner).shut_down = true;
        Poll::Ready(Ok(()))
    }
}
