// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Client against a scripted coordinator socket.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use uuid::Uuid;
use xatm_client::{Refused, XatmClient};
use xatm_proto::{
    wire::{decode_message, encode_message, frame_len, HEADER_LEN},
    CommitReply, CommitStage, ErrorPayload, Hello, Message, Pid, ResourceId, XaCode, XaFlags, Xid,
};

const WAIT: Duration = Duration::from_secs(5);

async fn read_frame(stream: &mut UnixStream) -> (Message, Uuid) {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await.unwrap();
    let mut packet = vec![0u8; frame_len(&header).unwrap()];
    packet[..HEADER_LEN].copy_from_slice(&header);
    stream.read_exact(&mut packet[HEADER_LEN..]).await.unwrap();
    let (message, correlation, _) = decode_message(&packet).unwrap();
    (message, correlation)
}

async fn write_frame(stream: &mut UnixStream, message: Message, correlation: Uuid) {
    let pkt = encode_message(message, correlation).unwrap();
    stream.write_all(&pkt).await.unwrap();
}

#[tokio::test]
async fn hello_then_commit_skips_prepare_stage_and_strangers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("xatm.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (hello, _) = read_frame(&mut stream).await;
        assert_eq!(hello, Message::Hello(Hello { process: Pid(77) }));

        let (commit, correlation) = read_frame(&mut stream).await;
        let Message::Commit(request) = commit else {
            panic!("expected commit, got {}", commit.op_name());
        };
        assert_eq!(request.process, Pid(77));
        for (stage, who) in [
            (CommitStage::Prepare, correlation),
            (CommitStage::Commit, Uuid::new_v4()),
            (CommitStage::Commit, correlation),
        ] {
            let reply = Message::CommitReply(CommitReply {
                trid: request.trid.clone(),
                state: XaCode::Ok,
                stage,
            });
            write_frame(&mut stream, reply, who).await;
        }
    });

    let mut client = XatmClient::connect_as(&path, Pid(77)).await.unwrap();
    assert_eq!(client.process(), Pid(77));
    let trid = Xid::create();
    let reply = timeout(WAIT, client.commit(&trid, XaFlags::NO_FLAGS))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.trid, trid);
    assert_eq!(reply.stage, CommitStage::Commit);
    server.await.unwrap();
}

#[tokio::test]
async fn error_reply_surfaces_as_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("xatm.sock");
    let listener = UnixListener::bind(&path).unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_frame(&mut stream).await;
        let (_, correlation) = read_frame(&mut stream).await;
        write_frame(
            &mut stream,
            Message::Error(ErrorPayload {
                name: "E_UNKNOWN_RESOURCE".into(),
                message: "unknown resource 9".into(),
            }),
            correlation,
        )
        .await;
    });

    let mut client = XatmClient::connect_as(&path, Pid(78)).await.unwrap();
    let err = timeout(WAIT, client.involve(&Xid::create(), &[ResourceId::Local(9)]))
        .await
        .unwrap()
        .unwrap_err();
    let refused = err.downcast_ref::<Refused>().expect("refused");
    assert_eq!(refused.name, "E_UNKNOWN_RESOURCE");
}

#[tokio::test]
async fn closed_connection_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("xatm.sock");
    let listener = UnixListener::bind(&path).unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_frame(&mut stream).await;
        read_frame(&mut stream).await;
    });

    let mut client = XatmClient::connect_as(&path, Pid(79)).await.unwrap();
    let result = timeout(WAIT, client.state()).await.unwrap();
    assert!(result.is_err());
}
