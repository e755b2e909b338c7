//! Multiplexed session wire.
//!
//! One transport carries many concurrent requests. Each request claims a
//! response box, the box number travels with the request frame and comes back
//! with the reply. Requests that find every box owned wait in a bounded
//! pending queue, one is dispatched each time a box is freed.
//!
//! The transport is owned by a spawned worker, callers talk to it through a
//! channel, which also serializes frame writes.
use bytes::{BufMut, Bytes, BytesMut};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::Waker,
};
use tokio::sync::{
    mpsc::{self, UnboundedSender},
    oneshot,
};

use crate::{
    Result,
    common::{span, verbose},
    error::{AlreadyClosed, InvalidArgument, ServerCrashed},
    frame::{MAX_PAYLOAD_LEN, ProtocolError, RequestFrame, RequestInfo, ResponseInfo},
    response::{Cell, Distiller, Failure, FutureResponse, Response},
    result_set::{ResultSetRegistry, ResultSetWire},
    transport::{StreamTransport, Transport, TransportExt},
    value::varint,
};

mod config;
mod pending;
mod slot;
mod worker;

pub use config::{Config, ParseError};

use pending::{PendingQueue, PendingRequest};
use slot::{Receivers, ResponseBox};
use worker::{WorkerFuture, WorkerMessage};

/// State shared by callers and the worker, guarded by one lock.
#[derive(Debug)]
pub(crate) struct Dispatch {
    pub(crate) slots: ResponseBox,
    pub(crate) pending: PendingQueue,
    pub(crate) result_sets: ResultSetRegistry,
    /// Worker paused on a full result set backlog.
    pub(crate) reader: Option<Waker>,
    pub(crate) closed: bool,
}

impl Dispatch {
    pub(crate) fn wake_reader(&mut self) {
        if let Some(waker) = self.reader.take() {
            waker.wake();
        }
    }

    /// Mark closed and fail everything in flight.
    pub(crate) fn shutdown(&mut self, failure: Failure) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.slots.fail_all(failure);
        self.pending.fail_all(failure);
        self.result_sets.terminate(failure == Failure::Crashed);
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    dispatch: Mutex<Dispatch>,
    session_id: u64,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Dispatch> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Multiplexed session over one [`Transport`].
///
/// `SessionWire` is a cheap handle, clones share the same session. The
/// session is closed by [`close`][SessionWire::close], or when every handle
/// and every [`ResultSetWire`] is dropped.
///
/// # Examples
///
/// ```no_run
/// # async fn app() -> sqlwire::Result<()> {
/// use sqlwire::SessionWire;
///
/// let wire = SessionWire::connect("tcp://localhost:12345").await?;
///
/// let response = wire.send(3, b"request")?;
/// let payload = response.wait_for_main_response().await?;
/// # let _ = payload;
///
/// wire.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SessionWire {
    pub(crate) shared: Arc<Shared>,
    send: UnboundedSender<WorkerMessage>,
}

impl SessionWire {
    /// Connect to the server at `url` and perform the session handshake.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(Config::parse(url)?).await
    }

    /// Connect with configuration from environment variables.
    ///
    /// See [`Config::from_env`] for more details on env.
    pub async fn connect_env() -> Result<Self> {
        Self::connect_with(Config::from_env()).await
    }

    /// Connect with the given configuration.
    pub async fn connect_with(config: Config) -> Result<Self> {
        let transport = StreamTransport::connect(&config.host, config.port).await?;
        Self::handshake(transport, config).await
    }

    /// Perform the session handshake over `transport`, then start the session.
    pub async fn handshake<T>(mut transport: T, config: Config) -> Result<Self>
    where
        T: Transport + Send + 'static,
    {
        span!("handshake");

        transport.send(RequestFrame::new(
            RequestInfo::SessionHello,
            0,
            config.label.as_bytes().clone(),
        ));
        transport.flush().await?;

        let Some(frame) = transport.recv().await? else {
            return Err(ServerCrashed.into());
        };

        match frame.info {
            ResponseInfo::HelloOk => {
                let session_id = varint::read_unsigned(&mut frame.payload.clone())?;
                verbose!(session_id, "session established");
                Ok(Self::start(transport, config, session_id))
            }
            ResponseInfo::HelloNg => Err(ProtocolError::refused(&frame.payload).into()),
            found => Err(ProtocolError::Unexpected { found, phase: "handshake" }.into()),
        }
    }

    /// Start the session over an already established `transport`.
    ///
    /// Must be called within tokio runtime.
    pub fn open<T>(transport: T, config: Config) -> Self
    where
        T: Transport + Send + 'static,
    {
        Self::start(transport, config, 0)
    }

    fn start<T>(transport: T, config: Config, session_id: u64) -> Self
    where
        T: Transport + Send + 'static,
    {
        let dispatch = Dispatch {
            slots: ResponseBox::new(config.response_boxes),
            pending: PendingQueue::new(config.pending_limit),
            result_sets: ResultSetRegistry::new(config.result_set_buffer),
            reader: None,
            closed: false,
        };
        let shared = Arc::new(Shared { dispatch: Mutex::new(dispatch), session_id });
        let (send, recv) = mpsc::unbounded_channel();

        tokio::spawn(WorkerFuture::new(transport, shared.clone(), recv));

        Self { shared, send }
    }

    /// Returns the id assigned by the server in the handshake.
    pub fn session_id(&self) -> u64 {
        self.shared.session_id
    }

    /// Send a request to `service_id`.
    ///
    /// Fails with [`Backpressure`][1] if every response box is owned and the
    /// pending queue is full, see [`Config::pending_limit`]. A request larger
    /// than [`MAX_PAYLOAD_LEN`] fails with [`InvalidArgument`][2].
    ///
    /// [1]: crate::ErrorKind::Backpressure
    /// [2]: crate::ErrorKind::InvalidArgument
    pub fn send(&self, service_id: u64, payload: &[u8]) -> Result<Response> {
        let cell = Cell::new();
        self.submit(self.request(service_id, payload)?, Receivers::Single(cell.clone()))?;
        Ok(Response::attached(cell, self.clone()))
    }

    /// Send a request to `service_id`, the reply is decoded by `distiller`.
    pub fn send_with<V: 'static>(
        &self,
        service_id: u64,
        payload: &[u8],
        distiller: impl Distiller<V>,
    ) -> Result<FutureResponse<V>> {
        let cell = Cell::new();
        self.submit(self.request(service_id, payload)?, Receivers::Single(cell.clone()))?;
        Ok(FutureResponse::new(Response::attached(cell, self.clone()), distiller))
    }

    /// Send a query to `service_id`, returns the head and the body response.
    ///
    /// The head response names the result set to [`connect`][1] to, the body
    /// response reports the outcome of the whole query. If the server fails
    /// the query before producing a result set, both receive the same payload.
    ///
    /// [1]: ResultSetWire::connect
    pub fn send_query(&self, service_id: u64, payload: &[u8]) -> Result<(FutureResponse, FutureResponse)> {
        let (head, body) = (Cell::new(), Cell::new());
        self.submit(
            self.request(service_id, payload)?,
            Receivers::Query { head: head.clone(), body: body.clone() },
        )?;
        Ok((
            FutureResponse::raw(Response::attached(head, self.clone())),
            FutureResponse::raw(Response::attached(body, self.clone())),
        ))
    }

    /// Create an unbound result set consumer.
    pub fn create_result_set_wire(&self) -> ResultSetWire {
        ResultSetWire::new(self.clone())
    }

    /// Returns `true` if the session is closed or the server went away.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Returns the number of in flight and queued requests.
    pub fn in_flight(&self) -> (usize, usize) {
        let dispatch = self.shared.lock();
        (dispatch.slots.in_use(), dispatch.pending.len())
    }

    /// Close the session.
    ///
    /// Pending responses and result sets fail with [`AlreadyClosed`], as do
    /// subsequent operations. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        {
            let mut dispatch = self.shared.lock();
            if dispatch.closed {
                return Ok(());
            }
            dispatch.shutdown(Failure::Closed);
        }

        let (tx, rx) = oneshot::channel();
        if self.send.send(WorkerMessage::Close(tx)).is_err() {
            return Ok(());
        }
        match rx.await {
            Ok(result) => Ok(result?),
            Err(_) => Ok(()),
        }
    }

    /// `uvarint(service_id) ++ uvarint(session_id) ++ payload`
    fn request(&self, service_id: u64, payload: &[u8]) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(varint::MAX_LEN * 2 + payload.len());
        varint::write_unsigned(&mut buf, service_id);
        varint::write_unsigned(&mut buf, self.shared.session_id);
        if buf.len() + payload.len() > MAX_PAYLOAD_LEN {
            return Err(InvalidArgument("request payload too large").into());
        }
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    fn submit(&self, payload: Bytes, receivers: Receivers) -> Result<()> {
        let mut dispatch = self.shared.lock();
        if dispatch.closed {
            return Err(AlreadyClosed.into());
        }

        match dispatch.slots.allocate(receivers) {
            Ok(slot) => {
                let frame = RequestFrame::new(RequestInfo::SessionPayload, slot, payload);
                if self.send.send(WorkerMessage::Frame(frame)).is_err() {
                    dispatch.shutdown(Failure::Closed);
                    return Err(AlreadyClosed.into());
                }
            }
            Err(receivers) => {
                dispatch.pending.push(PendingRequest { payload, receivers })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        frame::ResponseFrame,
        transport::ipc::{self, IpcEndpoint},
    };
    use std::time::Duration;

    fn wire(config: Config) -> (SessionWire, IpcEndpoint) {
        let (transport, endpoint) = ipc::channel(16);
        (SessionWire::open(transport, config), endpoint)
    }

    #[tokio::test]
    async fn request_header() {
        let (wire, mut endpoint) = wire(Config::default());
        let response = wire.send(300, b"body").unwrap();

        let frame = endpoint.recv().await.unwrap();
        assert_eq!(frame.info, RequestInfo::SessionPayload);
        assert_eq!(&frame.payload[..], [0xac, 0x02, 0x00, b'b', b'o', b'd', b'y']);

        endpoint.send(ResponseFrame::new(ResponseInfo::SessionPayload, frame.slot, &b"done"[..])).await.unwrap();
        assert_eq!(&response.wait_for_main_response().await.unwrap()[..], b"done");
    }

    #[tokio::test]
    async fn handshake_ok() {
        let (transport, mut endpoint) = ipc::channel(4);
        let server = tokio::spawn(async move {
            let hello = endpoint.recv().await.unwrap();
            assert_eq!(hello.info, RequestInfo::SessionHello);
            assert_eq!(&hello.payload[..], b"tester");
            endpoint.send(ResponseFrame::new(ResponseInfo::HelloOk, 0, &[0x2au8][..])).await.unwrap();
            endpoint
        });

        let wire = SessionWire::handshake(transport, Config::default().label("tester")).await.unwrap();
        assert_eq!(wire.session_id(), 42);
        let _endpoint = server.await.unwrap();

        let mut expected = BytesMut::new();
        varint::write_unsigned(&mut expected, 1);
        varint::write_unsigned(&mut expected, 42);
        assert_eq!(&wire.request(1, b"").unwrap()[..], &expected[..]);
    }

    #[tokio::test]
    async fn handshake_refused() {
        let (transport, mut endpoint) = ipc::channel(4);
        tokio::spawn(async move {
            endpoint.recv().await.unwrap();
            endpoint.send(ResponseFrame::new(ResponseInfo::HelloNg, 0, &b"no session"[..])).await.unwrap();
        });

        let err = SessionWire::handshake(transport, Config::default()).await.unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::Protocol(ProtocolError::HandshakeRefused(r)) if r == "no session"));
    }

    #[tokio::test]
    async fn close_fails_everything() {
        let (wire, mut endpoint) = wire(Config::default());
        let response = wire.send(1, b"").unwrap();
        endpoint.recv().await.unwrap();

        wire.close().await.unwrap();
        assert!(wire.is_closed());
        assert!(response.wait_for_main_response().await.unwrap_err().is_closed());
        assert!(wire.send(1, b"").unwrap_err().is_closed());
        wire.close().await.unwrap();

        // worker shutdown the link
        assert!(tokio::time::timeout(Duration::from_secs(5), endpoint.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_request_rejected() {
        let (wire, mut endpoint) = wire(Config::default());
        let payload = vec![0u8; MAX_PAYLOAD_LEN];

        let err = wire.send(1, &payload).unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::InvalidArgument(_)));
        assert_eq!(wire.in_flight(), (0, 0));
        assert!(!wire.is_closed());

        let fits = &payload[..MAX_PAYLOAD_LEN - 2];
        let response = wire.send(1, fits).unwrap();
        let frame = endpoint.recv().await.unwrap();
        assert_eq!(frame.payload.len(), MAX_PAYLOAD_LEN);

        endpoint.send(ResponseFrame::new(ResponseInfo::SessionPayload, frame.slot, &b"ok"[..])).await.unwrap();
        assert_eq!(&response.wait_for_main_response().await.unwrap()[..], b"ok");
    }

    #[tokio::test]
    async fn response_outlives_handle() {
        let (wire, mut endpoint) = wire(Config::default());
        let response = wire.send(1, b"slow").unwrap();
        drop(wire);

        let frame = endpoint.recv().await.unwrap();
        endpoint.send(ResponseFrame::new(ResponseInfo::SessionPayload, frame.slot, &b"late"[..])).await.unwrap();
        assert_eq!(&response.wait_for_main_response().await.unwrap()[..], b"late");

        // last handle gone, worker shutdown the link
        drop(response);
        assert!(tokio::time::timeout(Duration::from_secs(5), endpoint.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_gone() {
        let (wire, endpoint) = wire(Config::default());
        let response = wire.send(1, b"").unwrap();
        drop(endpoint);

        let err = response.wait_for_main_response().await.unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::ServerCrashed(_)));
        assert!(wire.is_closed());
    }
}
