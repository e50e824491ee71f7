// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Connection hub: socket clients, in-process resource instances and the
//! routes from coordinator output to either.
//!
//! A socket client becomes addressable once it sends `hello` with its
//! process id. When its connection closes the coordinator is told the
//! process exited.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;
use xatm_core::{Inbound, Outbound};
use xatm_proto::{
    wire::{decode_message, encode_message, frame_len, HEADER_LEN},
    ExitReason, Message, Pid, ProcessExit,
};

pub(crate) struct ConnState {
    process: Option<Pid>,
    tx: mpsc::Sender<Vec<u8>>,
}

#[derive(Default)]
pub(crate) struct HubState {
    next_conn_id: u64,
    conns: HashMap<u64, ConnState>,
    processes: HashMap<Pid, u64>,
    instances: HashMap<Pid, mpsc::Sender<Outbound>>,
}

pub(crate) type Hub = Arc<Mutex<HubState>>;

impl HubState {
    pub(crate) fn add_conn(&mut self, tx: mpsc::Sender<Vec<u8>>) -> u64 {
        let id = self.next_conn_id;
        self.next_conn_id += 1;
        self.conns.insert(id, ConnState { process: None, tx });
        id
    }

    /// Forgets a connection; returns the process it spoke for, if that
    /// process is not served by a newer connection.
    fn remove_conn(&mut self, conn_id: u64) -> Option<Pid> {
        let pid = self.conns.remove(&conn_id)?.process?;
        if self.processes.get(&pid) != Some(&conn_id) {
            return None;
        }
        self.processes.remove(&pid);
        Some(pid)
    }

    pub(crate) fn add_instance(&mut self, pid: Pid, tx: mpsc::Sender<Outbound>) {
        self.instances.insert(pid, tx);
    }

    pub(crate) fn remove_instance(&mut self, pid: Pid) {
        self.instances.remove(&pid);
    }

    pub(crate) fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

enum Route {
    Instance(mpsc::Sender<Outbound>),
    Conn(mpsc::Sender<Vec<u8>>),
    Nowhere,
}

/// Delivers coordinator output. Returns the processes that could not be
/// reached.
pub(crate) async fn deliver(hub: &Hub, out: Vec<Outbound>) -> Vec<Pid> {
    let mut unreachable = Vec::new();
    for outbound in out {
        let route = {
            let h = hub.lock().await;
            if let Some(tx) = h.instances.get(&outbound.to) {
                Route::Instance(tx.clone())
            } else if let Some(conn) = h
                .processes
                .get(&outbound.to)
                .and_then(|id| h.conns.get(id))
            {
                Route::Conn(conn.tx.clone())
            } else {
                Route::Nowhere
            }
        };
        let to = outbound.to;
        match route {
            Route::Instance(tx) => {
                if tx.send(outbound).await.is_err() {
                    debug!(instance = %to, "instance already stopped");
                }
            }
            Route::Conn(tx) => {
                let op = outbound.message.op_name();
                match encode_message(outbound.message, outbound.correlation) {
                    Ok(pkt) => {
                        if tx.send(pkt).await.is_err() {
                            unreachable.push(to);
                        }
                    }
                    Err(err) => warn!(%to, op, %err, "could not encode message"),
                }
            }
            Route::Nowhere => {
                warn!(%to, op = outbound.message.op_name(), "no route to process");
                unreachable.push(to);
            }
        }
    }
    unreachable.sort_unstable();
    unreachable.dedup();
    unreachable
}

/// Serves one socket connection until it closes.
pub(crate) async fn handle_client<S>(
    stream: S,
    hub: Hub,
    coordinator: mpsc::Sender<Inbound>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
    let conn_id = hub.lock().await.add_conn(tx);

    tokio::spawn(async move {
        let mut ws = writer;
        while let Some(buf) = rx.recv().await {
            if ws.write_all(&buf).await.is_err() {
                break;
            }
        }
    });

    let result = read_frames(&mut reader, conn_id, &hub, &coordinator).await;

    let gone = hub.lock().await.remove_conn(conn_id);
    if let Some(pid) = gone {
        info!(process = %pid, "client disconnected");
        let exit = Message::ProcessExit(ProcessExit {
            pid,
            reason: ExitReason::Disconnected,
        });
        if coordinator
            .send(Inbound::new(pid, Uuid::nil(), exit))
            .await
            .is_err()
        {
            debug!(process = %pid, "coordinator stopped; exit not reported");
        }
    }
    result
}

async fn read_frames<R>(
    reader: &mut R,
    conn_id: u64,
    hub: &Hub,
    coordinator: &mpsc::Sender<Inbound>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut read_buf: Vec<u8> = vec![0u8; 16 * 1024];
    let mut acc: Vec<u8> = Vec::with_capacity(32 * 1024);
    loop {
        let n = reader.read(&mut read_buf).await?;
        if n == 0 {
            return Ok(());
        }
        acc.extend_from_slice(&read_buf[..n]);

        while acc.len() >= HEADER_LEN {
            let total = match frame_len(&acc) {
                Ok(total) => total,
                Err(err) => {
                    warn!(conn = conn_id, %err, "bad frame header; dropping connection");
                    return Ok(());
                }
            };
            if acc.len() < total {
                break;
            }
            let packet: Vec<u8> = acc.drain(..total).collect();
            match decode_message(&packet) {
                Ok((message, correlation, _)) => {
                    handle_message(message, correlation, conn_id, hub, coordinator).await?;
                }
                Err(err) => {
                    warn!(conn = conn_id, %err, "failed to decode packet; dropping connection");
                    return Ok(());
                }
            }
        }
    }
}

async fn reply(hub: &Hub, conn_id: u64, correlation: Uuid, message: Message) -> Result<()> {
    let tx = hub.lock().await.conns.get(&conn_id).map(|c| c.tx.clone());
    if let Some(tx) = tx {
        let pkt = encode_message(message, correlation)?;
        if tx.send(pkt).await.is_err() {
            debug!(conn = conn_id, "writer gone");
        }
    }
    Ok(())
}

/// Handles one inbound message from a connection.
pub(crate) async fn handle_message(
    message: Message,
    correlation: Uuid,
    conn_id: u64,
    hub: &Hub,
    coordinator: &mpsc::Sender<Inbound>,
) -> Result<()> {
    if let Message::Hello(hello) = &message {
        let mut h = hub.lock().await;
        if let Some(previous) = h.processes.insert(hello.process, conn_id) {
            if previous != conn_id {
                warn!(process = %hello.process, "process reconnected; newer connection wins");
            }
        }
        if let Some(conn) = h.conns.get_mut(&conn_id) {
            conn.process = Some(hello.process);
        }
        debug!(conn = conn_id, process = %hello.process, "hello");
        return Ok(());
    }
    if matches!(
        message,
        Message::ProcessExit(_) | Message::ResourceConnect(_)
    ) {
        let refusal = Message::error(
            "E_NOT_ALLOWED",
            format!("{} is reserved to the coordinator host", message.op_name()),
        );
        return reply(hub, conn_id, correlation, refusal).await;
    }
    let process = hub
        .lock()
        .await
        .conns
        .get(&conn_id)
        .and_then(|c| c.process);
    let Some(process) = process else {
        let refusal = Message::error("E_NO_HELLO", "send hello before any request");
        return reply(hub, conn_id, correlation, refusal).await;
    };
    coordinator
        .send(Inbound::new(process, correlation, message))
        .await
        .map_err(|_| anyhow::anyhow!("coordinator stopped"))
}
