// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client helper for talking to the xatm coordinator over Unix sockets
//! (CBOR-framed).
//!
//! A client introduces itself with its process id on connect; the
//! coordinator routes replies, and watches for the owner's death, by that
//! id. Requests are matched to replies by correlation id; anything else that
//! arrives in between is dropped.

use std::io;
use std::path::Path;

use anyhow::Result;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use uuid::Uuid;
use xatm_proto::{
    wire::{decode_message, encode_message, frame_len, HEADER_LEN},
    CommitReply, CommitRequest, CommitStage, Hello, InvolvedRequest, LookupRequest, Message, Pid,
    ProxyView, ResourceId, ResourceInfo, RollbackReply, RollbackRequest, ScaleRequest,
    StateReply, XaFlags, Xid,
};

/// The coordinator answered with an `error` message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct Refused {
    /// Stable error name (e.g. `E_UNKNOWN_RESOURCE`).
    pub name: String,
    /// Human-readable detail.
    pub message: String,
}

/// Minimal async client over Unix sockets.
pub struct XatmClient {
    stream: UnixStream,
    process: Pid,
}

impl XatmClient {
    /// Connect as the current OS process.
    pub async fn connect(path: &Path) -> Result<Self> {
        Self::connect_as(path, Pid(std::process::id())).await
    }

    /// Connect and introduce the connection as `process`.
    pub async fn connect_as(path: &Path, process: Pid) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        let mut client = Self { stream, process };
        client
            .send(Message::Hello(Hello { process }), Uuid::nil())
            .await?;
        Ok(client)
    }

    /// Process identity this connection speaks for.
    pub fn process(&self) -> Pid {
        self.process
    }

    /// Send one message with the given correlation.
    pub async fn send(&mut self, message: Message, correlation: Uuid) -> Result<()> {
        let pkt = encode_message(message, correlation)?;
        self.stream.write_all(&pkt).await?;
        Ok(())
    }

    /// Read a single message. Returns Ok(None) when the stream is closed before any bytes are read.
    /// Reads until a full frame header is buffered so short reads cannot desynchronize framing.
    pub async fn poll_message(&mut self) -> Result<Option<(Message, Uuid)>> {
        let mut header = [0u8; HEADER_LEN];
        let mut read = 0usize;
        while read < header.len() {
            let n = self.stream.read(&mut header[read..]).await?;
            if n == 0 {
                if read == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("truncated frame header: read {read} of {HEADER_LEN} bytes"),
                )
                .into());
            }
            read += n;
        }
        let total = frame_len(&header)?;
        let mut packet = vec![0u8; total];
        packet[..HEADER_LEN].copy_from_slice(&header);
        self.stream.read_exact(&mut packet[HEADER_LEN..]).await?;
        let (message, correlation, _) = decode_message(&packet)?;
        Ok(Some((message, correlation)))
    }

    /// Reads until a message with `correlation` arrives.
    async fn reply_to(&mut self, correlation: Uuid) -> Result<Message> {
        loop {
            let Some((message, got)) = self.poll_message().await? else {
                anyhow::bail!("coordinator closed the connection");
            };
            if got != correlation {
                continue;
            }
            if let Message::Error(err) = message {
                return Err(Refused {
                    name: err.name,
                    message: err.message,
                }
                .into());
            }
            return Ok(message);
        }
    }

    /// Send `message` and wait for the reply carrying its correlation.
    pub async fn request(&mut self, message: Message) -> Result<Message> {
        let correlation = Uuid::new_v4();
        self.send(message, correlation).await?;
        self.reply_to(correlation).await
    }

    /// Report that `resources` did work under `trid`. Returns the resources
    /// that were already enlisted under that branch.
    pub async fn involve(&mut self, trid: &Xid, resources: &[ResourceId]) -> Result<Vec<ResourceId>> {
        let request = Message::Involved(InvolvedRequest {
            trid: trid.clone(),
            process: self.process,
            involved: resources.to_vec(),
        });
        match self.request(request).await? {
            Message::InvolvedReply(reply) => Ok(reply.involved_already),
            other => unexpected(&other),
        }
    }

    /// Commit `trid` and wait for the final outcome; the intermediate
    /// prepare-stage reply is skipped.
    pub async fn commit(&mut self, trid: &Xid, flags: XaFlags) -> Result<CommitReply> {
        let correlation = Uuid::new_v4();
        let request = Message::Commit(CommitRequest {
            trid: trid.clone(),
            process: self.process,
            flags,
            involved: Vec::new(),
        });
        self.send(request, correlation).await?;
        loop {
            match self.reply_to(correlation).await? {
                Message::CommitReply(reply) if reply.stage == CommitStage::Prepare => {}
                Message::CommitReply(reply) => return Ok(reply),
                other => return unexpected(&other),
            }
        }
    }

    /// Roll `trid` back.
    pub async fn rollback(&mut self, trid: &Xid) -> Result<RollbackReply> {
        let request = Message::Rollback(RollbackRequest {
            trid: trid.clone(),
            process: self.process,
            involved: Vec::new(),
        });
        match self.request(request).await? {
            Message::RollbackReply(reply) => Ok(reply),
            other => unexpected(&other),
        }
    }

    /// Configured resources named `names`, or all of them when empty.
    pub async fn lookup(&mut self, names: &[&str]) -> Result<Vec<ResourceInfo>> {
        let request = Message::Lookup(LookupRequest {
            names: names.iter().map(ToString::to_string).collect(),
        });
        match self.request(request).await? {
            Message::LookupReply(reply) => Ok(reply.resources),
            other => unexpected(&other),
        }
    }

    /// Admin snapshot.
    pub async fn state(&mut self) -> Result<StateReply> {
        match self.request(Message::State).await? {
            Message::StateReply(state) => Ok(*state),
            other => unexpected(&other),
        }
    }

    /// Resize a resource proxy.
    pub async fn scale(&mut self, resource: ResourceId, instances: usize) -> Result<Vec<ProxyView>> {
        match self
            .request(Message::Scale(ScaleRequest {
                resource,
                instances,
            }))
            .await?
        {
            Message::ScaleReply(views) => Ok(views),
            other => unexpected(&other),
        }
    }

    /// Ask the coordinator to shut down. There is no reply.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.send(Message::Shutdown, Uuid::new_v4()).await
    }
}

fn unexpected<T>(message: &Message) -> Result<T> {
    anyhow::bail!("unexpected reply: {}", message.op_name())
}
