//! Duplex log replication between two store instances.
//!
//! Each side runs [`ReplicationEndpoint::replicate`] with its own outgoing
//! sender and the peer's outgoing stream as its incoming receiver. The
//! exchange is:
//!
//! 1. send `Have` with every local entry id,
//! 2. receive the peer's `Have`,
//! 3. send every entry the peer lacks, then `End`,
//! 4. receive entries until the peer's `End` and append them.
//!
//! A side returns once the peer's end-of-stream has been received and
//! applied, so the two returns are the two directions completing.

use std::collections::HashSet;
use std::sync::mpsc::{Receiver, Sender};

use serde::Serialize;

use crate::changelog::LogEntry;
use crate::db::GeoDb;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationMessage {
    Have(Vec<String>),
    Entry(LogEntry),
    End,
}

impl ReplicationMessage {
    fn label(&self) -> &'static str {
        match self {
            ReplicationMessage::Have(_) => "have",
            ReplicationMessage::Entry(_) => "entry",
            ReplicationMessage::End => "end",
        }
    }
}

/// What one side of a session moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationStats {
    /// Entries sent to the peer.
    pub sent: usize,
    /// Entries received from the peer.
    pub received: usize,
    /// Received entries that were new to the local log.
    pub applied: usize,
}

/// One side of a duplex replication session.
pub trait ReplicationEndpoint: Send + Sync {
    fn replicate(
        &self,
        outgoing: Sender<ReplicationMessage>,
        incoming: Receiver<ReplicationMessage>,
    ) -> Result<ReplicationStats>;
}

fn send(outgoing: &Sender<ReplicationMessage>, msg: ReplicationMessage) -> Result<()> {
    outgoing
        .send(msg)
        .map_err(|e| StoreError::Replication(format!("peer hung up before {}", e.0.label())))
}

impl ReplicationEndpoint for GeoDb {
    fn replicate(
        &self,
        outgoing: Sender<ReplicationMessage>,
        incoming: Receiver<ReplicationMessage>,
    ) -> Result<ReplicationStats> {
        let mut stats = ReplicationStats::default();

        send(&outgoing, ReplicationMessage::Have(self.log.ids()?))?;

        let peer_has: HashSet<String> = match incoming.recv() {
            Ok(ReplicationMessage::Have(ids)) => ids.into_iter().collect(),
            Ok(other) => {
                return Err(StoreError::Replication(format!(
                    "expected have, got {}",
                    other.label()
                )))
            }
            Err(_) => {
                return Err(StoreError::Replication(
                    "peer hung up before its have".into(),
                ))
            }
        };

        for entry in self.log.entries_except(&peer_has)? {
            send(&outgoing, ReplicationMessage::Entry(entry))?;
            stats.sent += 1;
        }
        send(&outgoing, ReplicationMessage::End)?;

        let mut received = Vec::new();
        loop {
            match incoming.recv() {
                Ok(ReplicationMessage::Entry(entry)) => received.push(entry),
                Ok(ReplicationMessage::End) => break,
                Ok(ReplicationMessage::Have(_)) => {
                    return Err(StoreError::Replication("unexpected second have".into()))
                }
                Err(_) => {
                    return Err(StoreError::Replication(
                        "peer hung up before end of stream".into(),
                    ))
                }
            }
        }

        stats.received = received.len();
        stats.applied = self.log.append(&received)?;
        self.indexer.notify();

        log::debug!(
            "Replication side done: sent {} received {} applied {}",
            stats.sent,
            stats.received,
            stats.applied
        );
        Ok(stats)
    }
}
