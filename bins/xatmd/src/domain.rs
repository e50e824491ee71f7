// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The coordinator task: owns the state machine, starts resource instances
//! and routes everything the coordinator emits through the hub.

use std::collections::{BTreeMap, VecDeque};

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;
use xatm_config::ResolvedResource;
use xatm_core::{Coordinator, Inbound, TransactionLog};
use xatm_proto::{ExitReason, Message, Pid, ProcessExit, ResourceId};
use xatm_resource::{instance, InstanceSettings, SwitchRegistry};

use crate::hub::{self, Hub};

/// Instance pids are allocated above the OS pid range.
const FIRST_INSTANCE: u32 = 0x4000_0000;

/// Instances are serial; a request and a shutdown fit.
const INSTANCE_QUEUE: usize = 16;

pub(crate) struct Domain<L> {
    coordinator: Coordinator<L>,
    resources: BTreeMap<ResourceId, ResolvedResource>,
    switches: SwitchRegistry,
    hub: Hub,
    inbox_tx: mpsc::Sender<Inbound>,
    next_instance: u32,
}

impl<L> Domain<L>
where
    L: TransactionLog + Send + 'static,
{
    pub(crate) fn new(
        coordinator: Coordinator<L>,
        resources: &[ResolvedResource],
        switches: SwitchRegistry,
        hub: Hub,
        inbox_tx: mpsc::Sender<Inbound>,
    ) -> Self {
        Self {
            coordinator,
            resources: resources.iter().map(|r| (r.id, r.clone())).collect(),
            switches,
            hub,
            inbox_tx,
            next_instance: FIRST_INSTANCE,
        }
    }

    /// Runs until shutdown was requested and every instance has stopped.
    pub(crate) async fn run(mut self, mut inbox: mpsc::Receiver<Inbound>) -> Result<()> {
        self.start_spawns().await;
        while let Some(inbound) = inbox.recv().await {
            self.process(inbound).await;
            self.start_spawns().await;
            if self.coordinator.stopping() && self.hub.lock().await.instance_count() == 0 {
                info!(open = self.coordinator.registry().len(), "all instances stopped");
                break;
            }
        }
        Ok(())
    }

    async fn process(&mut self, first: Inbound) {
        let mut queue = VecDeque::from([first]);
        while let Some(inbound) = queue.pop_front() {
            let out = self.coordinator.handle(inbound);
            for pid in hub::deliver(&self.hub, out).await {
                let exit = Message::ProcessExit(ProcessExit {
                    pid,
                    reason: ExitReason::Unreachable,
                });
                queue.push_back(Inbound::new(pid, Uuid::nil(), exit));
            }
        }
    }

    async fn start_spawns(&mut self) {
        for resource in self.coordinator.take_spawns() {
            if let Err(err) = self.start_instance(resource).await {
                error!(%resource, %err, "could not start instance");
            }
        }
    }

    async fn start_instance(&mut self, resource: ResourceId) -> Result<()> {
        let resolved = self
            .resources
            .get(&resource)
            .ok_or_else(|| anyhow!("no configuration for {resource}"))?;
        let property = resolved
            .property
            .as_ref()
            .ok_or_else(|| anyhow!("{resource} has no resource property"))?;
        let switch = self.switches.create(&property.switch)?;
        let settings = InstanceSettings {
            resource,
            process: Pid(self.next_instance),
            openinfo: resolved.config.openinfo.clone(),
            closeinfo: resolved.config.closeinfo.clone(),
        };
        let pid = settings.process;
        self.next_instance += 1;
        self.coordinator.instance_started(resource, pid)?;

        let (tx, rx) = mpsc::channel(INSTANCE_QUEUE);
        self.hub.lock().await.add_instance(pid, tx);
        let hub = self.hub.clone();
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let code = match instance::run(settings, switch, rx, inbox.clone()).await {
                Ok(()) => 0,
                Err(err) => {
                    error!(instance = %pid, %err, "instance failed");
                    1
                }
            };
            hub.lock().await.remove_instance(pid);
            let exit = Message::ProcessExit(ProcessExit {
                pid,
                reason: ExitReason::Exited(code),
            });
            if inbox.send(Inbound::new(pid, Uuid::nil(), exit)).await.is_err() {
                debug!(instance = %pid, "coordinator gone before exit was reported");
            }
        });
        debug!(%resource, instance = %pid, "instance started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::hub::handle_client;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;
    use tokio::time::{timeout, Duration};
    use xatm_core::MemoryLog;
    use xatm_dry_tests::{fixtures, OWNER, TM};
    use xatm_proto::{
        wire::{decode_message, encode_message, frame_len, HEADER_LEN},
        CommitRequest, CommitStage, Hello, InvolvedRequest, XaCode, XaFlags, Xid,
    };

    const WAIT: Duration = Duration::from_secs(5);

    async fn read_frame(stream: &mut UnixStream) -> Message {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).await.unwrap();
        let mut packet = vec![0u8; frame_len(&header).unwrap()];
        packet[..HEADER_LEN].copy_from_slice(&header);
        stream.read_exact(&mut packet[HEADER_LEN..]).await.unwrap();
        decode_message(&packet).unwrap().0
    }

    async fn write_frame(stream: &mut UnixStream, message: Message) {
        let pkt = encode_message(message, Uuid::new_v4()).unwrap();
        stream.write_all(&pkt).await.unwrap();
    }

    type Runner = tokio::task::JoinHandle<Result<()>>;

    fn start(resources: &[ResolvedResource]) -> (Hub, mpsc::Sender<Inbound>, Runner) {
        let hub = Hub::default();
        let (inbox_tx, inbox) = mpsc::channel(64);
        let coordinator = Coordinator::new(TM, resources, MemoryLog::default());
        let domain = Domain::new(
            coordinator,
            resources,
            SwitchRegistry::builtin(),
            hub.clone(),
            inbox_tx.clone(),
        );
        (hub, inbox_tx, tokio::spawn(domain.run(inbox)))
    }

    async fn owner(hub: &Hub, inbox_tx: &mpsc::Sender<Inbound>) -> UnixStream {
        let (mut client, server) = UnixStream::pair().unwrap();
        tokio::spawn(handle_client(server, hub.clone(), inbox_tx.clone()));
        write_frame(&mut client, Message::Hello(Hello { process: OWNER })).await;
        client
    }

    #[tokio::test]
    async fn commits_across_mockup_instances_then_shuts_down() {
        let resources = fixtures::resolved(&[("rm-a", 1), ("rm-b", 2)]);
        let (hub, inbox_tx, runner) = start(&resources);
        let mut client = owner(&hub, &inbox_tx).await;

        let trid = Xid::create();
        write_frame(
            &mut client,
            Message::Involved(InvolvedRequest {
                trid: trid.clone(),
                process: OWNER,
                involved: vec![ResourceId::Local(1), ResourceId::Local(2)],
            }),
        )
        .await;
        let reply = timeout(WAIT, read_frame(&mut client)).await.unwrap();
        assert!(matches!(reply, Message::InvolvedReply(_)));

        write_frame(
            &mut client,
            Message::Commit(CommitRequest {
                trid: trid.clone(),
                process: OWNER,
                flags: XaFlags::NO_FLAGS,
                involved: vec![],
            }),
        )
        .await;
        let mut stages = Vec::new();
        while stages.last() != Some(&CommitStage::Commit) {
            match timeout(WAIT, read_frame(&mut client)).await.unwrap() {
                Message::CommitReply(reply) => {
                    assert_eq!(reply.state, XaCode::Ok);
                    stages.push(reply.stage);
                }
                other => panic!("unexpected {}", other.op_name()),
            }
        }
        assert_eq!(stages, vec![CommitStage::Prepare, CommitStage::Commit]);
        assert_eq!(hub.lock().await.instance_count(), 3);

        write_frame(&mut client, Message::Shutdown).await;
        timeout(WAIT, runner).await.unwrap().unwrap().unwrap();
        assert_eq!(hub.lock().await.instance_count(), 0);
    }

    #[tokio::test]
    async fn failed_open_keeps_the_instance_out_of_rotation() {
        let mut resources = fixtures::resolved(&[("broken", 1)]);
        resources[0].config.openinfo = "--open XAER_RMERR".into();
        let (hub, inbox_tx, runner) = start(&resources);
        let mut client = owner(&hub, &inbox_tx).await;

        write_frame(&mut client, Message::State).await;
        let reply = timeout(WAIT, read_frame(&mut client)).await.unwrap();
        let Message::StateReply(state) = reply else {
            panic!("expected state reply");
        };
        assert_eq!(state.resources.len(), 1);

        inbox_tx
            .send(Inbound::new(TM, Uuid::nil(), Message::Shutdown))
            .await
            .unwrap();
        timeout(WAIT, runner).await.unwrap().unwrap().unwrap();
    }
}
