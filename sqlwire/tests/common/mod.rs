#![allow(dead_code)]
use bytes::{Buf, Bytes, BytesMut};
use sqlwire::{
    Config, SessionWire,
    frame::{RequestFrame, RequestInfo, ResponseFrame, ResponseInfo},
    transport::ipc::{self, IpcEndpoint},
    value::varint,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub fn ipc_wire(config: Config) -> (SessionWire, IpcEndpoint) {
    let (transport, endpoint) = ipc::channel(16);
    (SessionWire::open(transport, config), endpoint)
}

/// Split a session payload into service id, session id and request bytes.
pub fn request(frame: &RequestFrame) -> (u64, u64, Bytes) {
    assert_eq!(frame.info, RequestInfo::SessionPayload);
    let mut payload = frame.payload.clone();
    let service_id = varint::read_unsigned(&mut payload).unwrap();
    let session_id = varint::read_unsigned(&mut payload).unwrap();
    (service_id, session_id, payload.copy_to_bytes(payload.remaining()))
}

pub fn reply(slot: u16, payload: &'static [u8]) -> ResponseFrame {
    ResponseFrame::new(ResponseInfo::SessionPayload, slot, payload)
}

/// Serve one query on `endpoint`, streaming `records` into the result set `name`.
///
/// Every record is sent as chunks of at most `chunk` bytes followed by the
/// end of record marker. Returns once the client acknowledged the bye.
pub async fn serve_query(endpoint: &mut IpcEndpoint, name: &'static str, records: Vec<Bytes>, chunk: usize) {
    let frame = endpoint.recv().await.unwrap();
    let slot = frame.slot;

    endpoint.send(ResponseFrame::new(ResponseInfo::SessionBodyHead, slot, name.as_bytes())).await.unwrap();
    endpoint.send(ResponseFrame::new(ResponseInfo::ResultSetHello, 9, name.as_bytes())).await.unwrap();

    for record in records {
        for part in record.chunks(chunk) {
            endpoint
                .send(ResponseFrame::result_set_payload(9, 0, Bytes::copy_from_slice(part)))
                .await
                .unwrap();
        }
        endpoint.send(ResponseFrame::result_set_payload(9, 0, Bytes::new())).await.unwrap();
    }

    endpoint.send(ResponseFrame::new(ResponseInfo::ResultSetBye, 9, Bytes::new())).await.unwrap();

    let ack = endpoint.recv().await.unwrap();
    assert_eq!(ack.info, RequestInfo::ResultSetByeOk);
    assert_eq!(ack.slot, 9);

    endpoint.send(reply(slot, b"ok")).await.unwrap();
}

/// Server side of a stream transport.
pub struct StreamServer {
    pub io: DuplexStream,
    buf: BytesMut,
}

impl StreamServer {
    pub fn new(io: DuplexStream) -> Self {
        Self { io, buf: BytesMut::new() }
    }

    pub async fn recv(&mut self) -> Option<RequestFrame> {
        loop {
            if let Some(frame) = RequestFrame::decode(&mut self.buf).unwrap() {
                return Some(frame);
            }
            if self.io.read_buf(&mut self.buf).await.unwrap() == 0 {
                return None;
            }
        }
    }

    pub async fn send(&mut self, frame: ResponseFrame) {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        self.io.write_all(&buf).await.unwrap();
    }
}
