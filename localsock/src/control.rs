//! Ancillary (control) message processing
//!
//! Control travels as a sequence of tagged payloads alongside message
//! data. On send, a caller's [`ControlRequest`]s are *internalized*:
//! handle indices become owned table references with message accounting,
//! credentials and timestamps are synthesized from the sender's context.
//! On receive they are *externalized* back into receiver-relative form.
//! Whoever abandons an internalized sequence — a failed send, a flushed
//! buffer, a receiver that never asks for it — must run [`dispose`] so
//! the accounting unwinds exactly once.

use alloc::{sync::Arc, vec::Vec};

use crate::{
    cred::CredRecord,
    error::{Result, SockError},
    handle::{self, HandleEntry, HandleSpace},
    task::Task,
    time::{self, Timestamp},
};

/// A control payload as the sender provides it
pub enum ControlRequest {
    /// Handle indices in the sender's handle space
    Rights(Vec<u32>),
    /// Ask for the sender's credentials to be attached
    Credentials,
    /// Ask for a send-time timestamp to be attached
    Timestamp,
}

/// A control payload in flight on a receive queue
pub enum ControlMessage {
    /// Owned handle references, each counted in `msg_count` and the global
    /// in-flight total
    Rights(Vec<Arc<HandleEntry>>),
    Credentials(CredRecord),
    Timestamp(Timestamp),
}

impl core::fmt::Debug for ControlMessage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Rights(handles) => f
                .debug_tuple("Rights")
                .field(&handles.iter().map(|h| h.id()).collect::<Vec<_>>())
                .finish(),
            Self::Credentials(c) => f.debug_tuple("Credentials").field(c).finish(),
            Self::Timestamp(t) => f.debug_tuple("Timestamp").field(t).finish(),
        }
    }
}

/// A control payload as delivered to the receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutput {
    /// Handle indices in the receiver's handle space
    Rights(Vec<u32>),
    Credentials(CredRecord),
    Timestamp(Timestamp),
}

/// Convert caller control into its in-flight form.
///
/// Rights validation is atomic: every index must name a live, passable
/// handle (`BadHandle` / `Unsupported` otherwise) or the whole sequence is
/// rejected with nothing internalized.
pub fn internalize(requests: Vec<ControlRequest>, task: &Task) -> Result<Vec<ControlMessage>> {
    let mut out: Vec<ControlMessage> = Vec::with_capacity(requests.len());
    for request in requests {
        let msg = match internalize_one(request, task) {
            Ok(msg) => msg,
            Err(err) => {
                dispose(out);
                return Err(err);
            }
        };
        out.push(msg);
    }
    Ok(out)
}

fn internalize_one(request: ControlRequest, task: &Task) -> Result<ControlMessage> {
    match request {
        ControlRequest::Rights(indices) => {
            let mut entries = Vec::with_capacity(indices.len());
            for idx in &indices {
                let entry = task.handles().get(*idx).ok_or(SockError::BadHandle)?;
                if !entry.object.passable() {
                    return Err(SockError::Unsupported);
                }
                entries.push(entry);
            }
            // All valid; only now take the references.
            for entry in &entries {
                handle::message_attach(entry);
            }
            Ok(ControlMessage::Rights(entries))
        }
        ControlRequest::Credentials => Ok(ControlMessage::Credentials(
            CredRecord::from_credentials(task.cred()),
        )),
        ControlRequest::Timestamp => Ok(ControlMessage::Timestamp(time::now())),
    }
}

/// Convert in-flight control into receiver-relative form, installing each
/// transferred handle at a fresh index in `space`.
///
/// All-or-nothing on the rights: when the receiver's space cannot take
/// every transferred handle, every right in the sequence is discarded and
/// the operation fails with `MessageTooBig` rather than partially deliver.
pub fn externalize(messages: Vec<ControlMessage>, space: &HandleSpace) -> Result<Vec<ControlOutput>> {
    let total_rights: usize = messages
        .iter()
        .map(|m| match m {
            ControlMessage::Rights(entries) => entries.len(),
            _ => 0,
        })
        .sum();
    if total_rights > space.available() {
        dispose(messages);
        return Err(SockError::MessageTooBig);
    }

    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        match message {
            ControlMessage::Rights(entries) => {
                let idxs = match space.insert_all(&entries) {
                    Some(idxs) => idxs,
                    None => {
                        // Lost a race against the receiver's own installs.
                        for entry in &entries {
                            handle::message_discard(entry);
                        }
                        return Err(SockError::MessageTooBig);
                    }
                };
                // The message's strong references now belong to the slots.
                for entry in &entries {
                    handle::message_deliver(entry);
                }
                out.push(ControlOutput::Rights(idxs));
            }
            ControlMessage::Credentials(rec) => out.push(ControlOutput::Credentials(rec)),
            ControlMessage::Timestamp(ts) => out.push(ControlOutput::Timestamp(ts)),
        }
    }
    Ok(out)
}

/// Release an abandoned in-flight sequence: every listed handle loses its
/// message accounting and its strong reference.
pub fn dispose(messages: Vec<ControlMessage>) {
    for message in messages {
        if let ControlMessage::Rights(entries) = message {
            for entry in &entries {
                handle::message_discard(entry);
            }
        }
    }
}

/// Handles referenced by any rights payload in `messages`, for queue scans.
pub(crate) fn rights_handles(messages: &[ControlMessage]) -> Vec<Arc<HandleEntry>> {
    let mut out = Vec::new();
    for message in messages {
        if let ControlMessage::Rights(entries) = message {
            out.extend(entries.iter().cloned());
        }
    }
    out
}
