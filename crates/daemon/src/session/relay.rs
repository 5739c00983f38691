//! Output relay from a remote shell to the attached client.
//!
//! One relay task runs per connected session. It reads the shell's output,
//! decodes it as UTF-8 and hands `output` frames to whichever client is
//! attached. Output produced while nobody is attached is dropped.

use std::sync::Arc;

use protocol::ServerMessage;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::remote::{RemoteConnector, RemoteOutput};
use super::shell::{Delivery, Session};

/// Largest block of remote output decoded into a single frame.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Incremental UTF-8 decoder.
///
/// Multi-byte sequences split across reads are carried over to the next
/// call. Bytes that can never form valid UTF-8 become U+FFFD.
#[derive(Debug, Default)]
pub struct OutputDecoder {
    pending: Vec<u8>,
}

impl OutputDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, keeping any incomplete trailing sequence for later.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let carried = rest.len();
        let consumed = self.pending.len() - carried;
        self.pending.drain(..consumed);
        text
    }

    /// Flush whatever is left, replacing an incomplete sequence.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }

    /// Bytes held back waiting for the rest of a sequence.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayExit {
    Cancelled,
    RemoteEnded,
    ClientGone,
    Inactive,
}

/// Forward remote output to the session's client until cancelled, the
/// remote side ends, or the client channel breaks.
pub(crate) async fn forward_output<C: RemoteConnector>(
    session: Arc<Session<C>>,
    output: Arc<Mutex<Option<C::Output>>>,
    cancel: CancellationToken,
) {
    let exit = relay_loop(&session, &output, &cancel).await;

    if exit == RelayExit::RemoteEnded {
        session.remote_ended().await;
    }

    tracing::debug!(session_id = %session.id(), reason = ?exit, "Output relay stopped");
}

async fn relay_loop<C: RemoteConnector>(
    session: &Session<C>,
    output: &Mutex<Option<C::Output>>,
    cancel: &CancellationToken,
) -> RelayExit {
    let mut guard = tokio::select! {
        biased;
        _ = cancel.cancelled() => return RelayExit::Cancelled,
        guard = output.lock() => guard,
    };
    let Some(output) = guard.as_mut() else {
        return RelayExit::Inactive;
    };

    tracing::debug!(session_id = %session.id(), "Output relay started");
    let mut decoder = OutputDecoder::new();

    while session.is_connected() {
        let block = tokio::select! {
            biased;
            _ = cancel.cancelled() => return RelayExit::Cancelled,
            block = output.recv() => block,
        };
        let Some(block) = block else {
            // an incomplete trailing sequence is flushed as U+FFFD
            let tail = decoder.finish();
            if let Some(exit) = relay_text(session, cancel, tail).await {
                return exit;
            }
            return RelayExit::RemoteEnded;
        };

        for chunk in block.chunks(READ_CHUNK_SIZE) {
            let text = decoder.decode(chunk);
            if let Some(exit) = relay_text(session, cancel, text).await {
                return exit;
            }
        }
    }

    RelayExit::Inactive
}

/// Delivers one decoded block. Returns an exit reason if relaying must stop.
async fn relay_text<C: RemoteConnector>(
    session: &Session<C>,
    cancel: &CancellationToken,
    text: String,
) -> Option<RelayExit> {
    if text.is_empty() {
        return None;
    }

    let delivery = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Some(RelayExit::Cancelled),
        delivery = session.deliver(ServerMessage::output(text)) => delivery,
    };

    match delivery {
        Delivery::Delivered => session.touch(),
        Delivery::NoClient => {
            tracing::trace!(session_id = %session.id(), "No client attached, dropping output");
        }
        Delivery::Failed => return Some(RelayExit::ClientGone),
    }
    None
}
