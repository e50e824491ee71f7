// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resource proxy instance worker.
//!
//! One worker owns one switch session and serves one request at a time:
//! `xa_open` on start (reported to the coordinator as `ResourceConnect`),
//! then prepare/commit/rollback requests in arrival order until `Shutdown`,
//! then `xa_close`. Switch calls run on the blocking pool.

use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use xatm_core::{Inbound, Outbound};
use xatm_proto::{
    Message, Pid, RequestKind, ResourceConnect, ResourceId, ResourceReply, ResourceRequest,
    XaCode, XaFlags,
};

use crate::{Operation, Outcome, Switch};

/// Identity and configuration of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSettings {
    /// Resource the instance serves.
    pub resource: ResourceId,
    /// Process identity of the instance.
    pub process: Pid,
    /// Expanded `xa_open` info.
    pub openinfo: String,
    /// Expanded `xa_close` info.
    pub closeinfo: String,
}

/// Worker failures.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// A switch call panicked.
    #[error("switch call failed: {0}")]
    Switch(#[from] tokio::task::JoinError),
    /// The coordinator's inbox is closed.
    #[error("coordinator is gone")]
    Disconnected,
}

type Session = Box<dyn Switch>;

async fn call(switch: Session, operation: Operation) -> Result<(Session, Outcome), InstanceError> {
    let joined = tokio::task::spawn_blocking(move || {
        let mut switch = switch;
        let outcome = switch.dispatch(operation);
        (switch, outcome)
    })
    .await?;
    Ok(joined)
}

/// Runs `request` against the switch. A prepare answered with `XAER_PROTO`
/// is re-checked with `xa_recover`: a branch the resource already holds
/// prepared is reported read-only.
async fn serve(
    switch: Session,
    kind: RequestKind,
    request: &ResourceRequest,
) -> Result<(Session, XaCode), InstanceError> {
    let xid = request.trid.clone();
    let flags = request.flags;
    let operation = match kind {
        RequestKind::Prepare => Operation::Prepare { xid, flags },
        RequestKind::Commit => Operation::Commit { xid, flags },
        RequestKind::Rollback => Operation::Rollback { xid, flags },
    };
    let (switch, outcome) = call(switch, operation).await?;
    if kind != RequestKind::Prepare || outcome.code != XaCode::Protocol {
        return Ok((switch, outcome.code));
    }
    let (switch, recovered) = call(
        switch,
        Operation::Recover {
            flags: XaFlags::START_SCAN | XaFlags::END_SCAN,
        },
    )
    .await?;
    if recovered.code == XaCode::Ok && recovered.xids.contains(&request.trid) {
        info!(trid = %request.trid, "branch already prepared at the resource; read-only");
        return Ok((switch, XaCode::ReadOnly));
    }
    Ok((switch, outcome.code))
}

/// Drives one instance until it receives `Shutdown` or its inbox closes.
///
/// Messages for the coordinator are posted on `coordinator` as if they came
/// from `settings.process`. An instance whose `xa_open` fails stays idle
/// (the coordinator never hands it work) until it is shut down.
pub async fn run(
    settings: InstanceSettings,
    switch: Session,
    mut inbox: mpsc::Receiver<Outbound>,
    coordinator: mpsc::Sender<Inbound>,
) -> Result<(), InstanceError> {
    let me = settings.process;
    let (mut switch, opened) = call(
        switch,
        Operation::Open {
            info: settings.openinfo.clone(),
            flags: XaFlags::NO_FLAGS,
        },
    )
    .await?;
    let connect = Message::ResourceConnect(ResourceConnect {
        resource: settings.resource,
        process: me,
        state: opened.code,
    });
    coordinator
        .send(Inbound::new(me, uuid::Uuid::nil(), connect))
        .await
        .map_err(|_| InstanceError::Disconnected)?;

    if opened.code != XaCode::Ok {
        error!(resource = %settings.resource, instance = %me, state = %opened.code, "xa_open failed");
        while let Some(delivery) = inbox.recv().await {
            if delivery.message == Message::Shutdown {
                break;
            }
            warn!(instance = %me, op = delivery.message.op_name(), "instance is not open; ignored");
        }
        return Ok(());
    }
    debug!(resource = %settings.resource, instance = %me, "open");

    while let Some(delivery) = inbox.recv().await {
        let Some((kind, request)) = delivery.message.as_resource_request() else {
            if delivery.message == Message::Shutdown {
                break;
            }
            warn!(instance = %me, op = delivery.message.op_name(), "unexpected message; ignored");
            continue;
        };
        let request = request.clone();
        let started = Instant::now();
        let state;
        (switch, state) = serve(switch, kind, &request).await?;
        let elapsed = started.elapsed();
        debug!(trid = %request.trid, kind = %kind, %state, ?elapsed, "served");
        let reply = Message::resource_reply(
            kind,
            ResourceReply {
                trid: request.trid,
                process: me,
                resource: settings.resource,
                state,
                elapsed,
            },
        );
        coordinator
            .send(Inbound::new(me, delivery.correlation, reply))
            .await
            .map_err(|_| InstanceError::Disconnected)?;
    }

    let (_, closed) = call(
        switch,
        Operation::Close {
            info: settings.closeinfo,
            flags: XaFlags::NO_FLAGS,
        },
    )
    .await?;
    if closed.code == XaCode::Ok {
        info!(resource = %settings.resource, instance = %me, "closed");
    } else {
        warn!(resource = %settings.resource, instance = %me, state = %closed.code, "xa_close failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{MockupResults, MockupSwitch};
    use std::time::Duration;
    use tokio::time::timeout;
    use uuid::Uuid;
    use xatm_proto::Xid;

    const RM: ResourceId = ResourceId::Local(1);
    const TM: Pid = Pid(1);
    const ME: Pid = Pid(10);
    const WAIT: Duration = Duration::from_secs(2);

    fn settings(openinfo: &str) -> InstanceSettings {
        InstanceSettings {
            resource: RM,
            process: ME,
            openinfo: openinfo.into(),
            closeinfo: String::new(),
        }
    }

    fn request(kind: RequestKind, trid: &Xid) -> Outbound {
        Outbound {
            to: ME,
            correlation: Uuid::new_v4(),
            message: Message::resource_request(
                kind,
                ResourceRequest {
                    trid: trid.clone(),
                    process: TM,
                    resource: RM,
                    flags: XaFlags::NO_FLAGS,
                },
            ),
        }
    }

    async fn next(rx: &mut mpsc::Receiver<Inbound>) -> Inbound {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn connects_serves_and_closes() {
        let (to_instance, inbox) = mpsc::channel(8);
        let (outbox, mut from_instance) = mpsc::channel(8);
        let worker = tokio::spawn(run(
            settings("--commit XAER_RMERR"),
            Box::new(MockupSwitch::default()),
            inbox,
            outbox,
        ));

        let connect = next(&mut from_instance).await;
        assert_eq!(
            connect.message,
            Message::ResourceConnect(ResourceConnect {
                resource: RM,
                process: ME,
                state: XaCode::Ok
            })
        );

        let trid = Xid::create();
        let prepare = request(RequestKind::Prepare, &trid);
        let correlation = prepare.correlation;
        to_instance.send(prepare).await.unwrap();
        let reply = next(&mut from_instance).await;
        assert_eq!(reply.from, ME);
        assert_eq!(reply.correlation, correlation);
        assert!(matches!(
            reply.message,
            Message::ResourcePrepareReply(ref r) if r.state == XaCode::Ok && r.trid == trid
        ));

        to_instance.send(request(RequestKind::Commit, &trid)).await.unwrap();
        let reply = next(&mut from_instance).await;
        assert!(matches!(
            reply.message,
            Message::ResourceCommitReply(ref r) if r.state == XaCode::ResourceError
        ));

        to_instance
            .send(Outbound {
                to: ME,
                correlation: Uuid::nil(),
                message: Message::Shutdown,
            })
            .await
            .unwrap();
        timeout(WAIT, worker).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn already_prepared_branch_reads_as_read_only() {
        let (to_instance, inbox) = mpsc::channel(8);
        let (outbox, mut from_instance) = mpsc::channel(8);
        tokio::spawn(run(
            settings(""),
            Box::new(MockupSwitch::with_results(MockupResults::default())),
            inbox,
            outbox,
        ));
        next(&mut from_instance).await;

        let trid = Xid::create();
        for expected in [XaCode::Ok, XaCode::ReadOnly] {
            to_instance.send(request(RequestKind::Prepare, &trid)).await.unwrap();
            let reply = next(&mut from_instance).await;
            assert!(matches!(
                reply.message,
                Message::ResourcePrepareReply(ref r) if r.state == expected
            ));
        }
    }

    #[tokio::test]
    async fn failed_open_takes_no_work() {
        let (to_instance, inbox) = mpsc::channel(8);
        let (outbox, mut from_instance) = mpsc::channel(8);
        let worker = tokio::spawn(run(
            settings("--open XAER_RMERR"),
            Box::new(MockupSwitch::default()),
            inbox,
            outbox,
        ));
        let connect = next(&mut from_instance).await;
        assert!(matches!(
            connect.message,
            Message::ResourceConnect(ref c) if c.state == XaCode::ResourceError
        ));
        to_instance
            .send(request(RequestKind::Prepare, &Xid::create()))
            .await
            .unwrap();
        drop(to_instance);
        timeout(WAIT, worker).await.unwrap().unwrap().unwrap();
        assert!(from_instance.try_recv().is_err());
    }
}
