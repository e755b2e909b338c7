use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use bytes::BytesMut;
use sqlwire::{
    Config, ErrorKind, SessionWire,
    frame::{RequestInfo, ResponseFrame, ResponseInfo},
    transport::StreamTransport,
    value::varint,
};

mod common;

use common::{StreamServer, ipc_wire, reply, request};

#[tokio::test]
async fn seventeenth_request_queues() {
    let (wire, mut endpoint) = ipc_wire(Config::default());

    let mut responses = vec![];
    for i in 0..16u64 {
        responses.push(wire.send(i, b"").unwrap());
    }
    let mut slots = vec![];
    for _ in 0..16 {
        slots.push(endpoint.recv().await.unwrap().slot);
    }
    slots.sort();
    slots.dedup();
    assert_eq!(slots.len(), 16);

    let last = wire.send(16, b"late").unwrap();
    assert_eq!(wire.in_flight(), (16, 1));
    assert!(tokio::time::timeout(Duration::from_millis(50), endpoint.recv()).await.is_err());

    endpoint.send(reply(slots[3], b"done")).await.unwrap();

    let frame = endpoint.recv().await.unwrap();
    assert_eq!(frame.slot, slots[3]);
    let (service_id, _, body) = request(&frame);
    assert_eq!(service_id, 16);
    assert_eq!(&body[..], b"late");

    endpoint.send(reply(frame.slot, b"late done")).await.unwrap();
    assert_eq!(&last.wait_for_main_response().await.unwrap()[..], b"late done");
}

#[tokio::test]
async fn seventeenth_request_backpressure() {
    let (wire, _endpoint) = ipc_wire(Config::default().pending_limit(0));

    let mut responses = vec![];
    for i in 0..16u64 {
        responses.push(wire.send(i, b"").unwrap());
    }

    let err = wire.send(16, b"").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Backpressure(_)));
    assert_eq!(err.kind().to_string(), "pending requests exceeded response boxes");
    assert_eq!(wire.in_flight(), (16, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_senders_never_share_a_box() {
    const SENDERS: u64 = 64;
    let (wire, mut endpoint) = ipc_wire(Config::default());

    let server = tokio::spawn(async move {
        let mut in_flight = HashSet::new();
        let mut held = VecDeque::new();
        let mut served = 0;
        while served < SENDERS {
            match tokio::time::timeout(Duration::from_millis(20), endpoint.recv()).await {
                Ok(frame) => {
                    let frame = frame.unwrap();
                    assert!(in_flight.insert(frame.slot), "box {} owned twice", frame.slot);
                    assert!(in_flight.len() <= 16);
                    held.push_back(frame);
                    if held.len() < 16 {
                        continue;
                    }
                }
                Err(_) if held.is_empty() => continue,
                Err(_) => {}
            }

            let Some(frame) = held.pop_front() else { continue };
            in_flight.remove(&frame.slot);
            let (service_id, _, _) = request(&frame);
            endpoint
                .send(ResponseFrame::new(ResponseInfo::SessionPayload, frame.slot, service_id.to_string()))
                .await
                .unwrap();
            served += 1;
        }
        endpoint
    });

    let tasks: Vec<_> = (0..SENDERS)
        .map(|i| {
            let wire = wire.clone();
            tokio::spawn(async move {
                let response = wire.send(i, b"x").unwrap();
                let payload = response.wait_for_main_response().await.unwrap();
                assert_eq!(&payload[..], i.to_string().as_bytes());
            })
        })
        .collect();

    for task in tasks {
        tokio::time::timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert_eq!(wire.in_flight(), (0, 0));
}

#[tokio::test]
async fn replies_out_of_order() {
    let (wire, mut endpoint) = ipc_wire(Config::default());

    let first = wire.send(1, b"first").unwrap();
    let second = wire.send(1, b"second").unwrap();
    let a = endpoint.recv().await.unwrap();
    let b = endpoint.recv().await.unwrap();

    endpoint.send(reply(b.slot, b"2")).await.unwrap();
    endpoint.send(reply(a.slot, b"1")).await.unwrap();

    assert_eq!(&second.wait_for_main_response().await.unwrap()[..], b"2");
    assert_eq!(&first.wait_for_main_response().await.unwrap()[..], b"1");
    assert_eq!(wire.in_flight(), (0, 0));
}

#[tokio::test]
async fn distilled_response() {
    let (wire, mut endpoint) = ipc_wire(Config::default());

    let response = wire
        .send_with(2, b"count", |payload: bytes::Bytes| -> sqlwire::Result<u64> {
            Ok(varint::read_unsigned(&mut &payload[..])?)
        })
        .unwrap();

    let frame = endpoint.recv().await.unwrap();
    endpoint.send(ResponseFrame::new(ResponseInfo::SessionPayload, frame.slot, &[0x96u8, 0x01][..])).await.unwrap();

    assert_eq!(response.get().await.unwrap(), 150);
}

#[tokio::test(flavor = "multi_thread")]
async fn close_before_ready_unblocks_waiter() {
    let (wire, _endpoint) = ipc_wire(Config::default());
    let response = Arc::new(wire.send_with(1, b"", |p: bytes::Bytes| -> sqlwire::Result<_> { Ok(p) }).unwrap());

    let waiter = tokio::spawn({
        let response = response.clone();
        async move { response.get().await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    response.close();

    let result = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
    assert!(result.unwrap_err().is_closed());
}

#[tokio::test]
async fn get_timeout_on_pending_response() {
    let (wire, _endpoint) = ipc_wire(Config::default());
    let (head, _body) = wire.send_query(1, b"SELECT 1").unwrap();

    let err = head.get_timeout(Duration::from_millis(100)).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(!head.is_done());
}

#[tokio::test]
async fn close_fails_outstanding() {
    let (wire, mut endpoint) = ipc_wire(Config::default());

    let (head, body) = wire.send_query(1, b"SELECT 1").unwrap();
    endpoint.recv().await.unwrap();

    let mut result_set = wire.create_result_set_wire();
    result_set.connect("rs").unwrap();

    wire.close().await.unwrap();

    assert!(head.get().await.unwrap_err().is_closed());
    assert!(body.get().await.unwrap_err().is_closed());
    assert!(result_set.next_record().await.unwrap_err().is_closed());
    assert!(wire.create_result_set_wire().connect("rs").unwrap_err().is_closed());
}

#[tokio::test]
async fn query_failed_before_result_set() {
    let (wire, mut endpoint) = ipc_wire(Config::default());

    let (head, body) = wire.send_query(1, b"SELECT nope").unwrap();
    let frame = endpoint.recv().await.unwrap();
    endpoint.send(reply(frame.slot, b"syntax error")).await.unwrap();

    assert_eq!(&head.get().await.unwrap()[..], b"syntax error");
    assert_eq!(&body.get().await.unwrap()[..], b"syntax error");
    assert_eq!(wire.in_flight(), (0, 0));
}

#[tokio::test]
async fn handshake_over_stream() {
    let (client, server) = tokio::io::duplex(4096);
    let mut server = StreamServer::new(server);

    let serve = tokio::spawn(async move {
        let hello = server.recv().await.unwrap();
        assert_eq!(hello.info, RequestInfo::SessionHello);
        assert_eq!(&hello.payload[..], b"sqlwire");

        let mut id = BytesMut::new();
        varint::write_unsigned(&mut id, 7);
        server.send(ResponseFrame::new(ResponseInfo::HelloOk, 0, id.freeze())).await;

        let frame = server.recv().await.unwrap();
        let (service_id, session_id, body) = request(&frame);
        assert_eq!((service_id, session_id), (5, 7));
        assert_eq!(&body[..], b"ping");
        server.send(reply(frame.slot, b"pong")).await;

        // client shutdown
        assert!(server.recv().await.is_none());
    });

    let wire = SessionWire::handshake(StreamTransport::new(client), Config::default()).await.unwrap();
    assert_eq!(wire.session_id(), 7);

    let response = wire.send(5, b"ping").unwrap();
    assert_eq!(&response.wait_for_main_response().await.unwrap()[..], b"pong");

    wire.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), serve).await.unwrap().unwrap();
}

#[tokio::test]
async fn handshake_refused_over_stream() {
    let (client, server) = tokio::io::duplex(1024);
    let mut server = StreamServer::new(server);

    tokio::spawn(async move {
        server.recv().await.unwrap();
        server.send(ResponseFrame::new(ResponseInfo::HelloNg, 0, &b"too many sessions"[..])).await;
    });

    let err = SessionWire::handshake(StreamTransport::new(client), Config::default()).await.unwrap_err();
    assert_eq!(err.kind().to_string(), "session refused: too many sessions");
}

#[tokio::test]
async fn stream_eof_crashes_session() {
    let (client, server) = tokio::io::duplex(1024);
    let wire = SessionWire::open(StreamTransport::new(client), Config::default());

    let response = wire.send(1, b"").unwrap();
    drop(server);

    let err = response.wait_for_main_response().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ServerCrashed(_)));
    assert!(wire.send(1, b"").unwrap_err().is_closed());
}
