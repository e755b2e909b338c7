//! Task that owns the transport.
use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::{mpsc::UnboundedReceiver, oneshot};

use super::{Dispatch, Shared, slot::Push};
use crate::{
    Result,
    common::{ByteStr, verbose},
    frame::{ProtocolError, RequestFrame, RequestInfo, ResponseFrame, ResponseInfo},
    response::Failure,
    transport::Transport,
};

type CloseAck = oneshot::Sender<io::Result<()>>;

pub(crate) enum WorkerMessage {
    /// Request frame whose response box is already owned.
    Frame(RequestFrame),
    Close(CloseAck),
}

impl std::fmt::Debug for WorkerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Frame(frame) => f.debug_tuple("Frame").field(frame).finish(),
            Self::Close(_) => f.write_str("Close"),
        }
    }
}

pub(crate) struct WorkerFuture<T> {
    transport: T,
    shared: Arc<Shared>,
    recv: UnboundedReceiver<WorkerMessage>,
    /// `Some` once closing, holds the ack of an explicit close.
    closing: Option<Option<CloseAck>>,
}

impl<T> WorkerFuture<T> {
    pub(crate) fn new(transport: T, shared: Arc<Shared>, recv: UnboundedReceiver<WorkerMessage>) -> Self {
        Self { transport, shared, recv, closing: None }
    }
}

impl<T> Future for WorkerFuture<T>
where
    T: Transport,
{
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let WorkerFuture { transport, shared, recv, closing } = self.as_mut().get_mut();

        // 1. Write every queued request
        // 2. Dispatch received frames, which may write pending requests,
        //    unless a result set consumer is behind
        // 3. Flush

        while closing.is_none() {
            let Poll::Ready(msg) = recv.poll_recv(cx) else {
                break;
            };
            match msg {
                Some(WorkerMessage::Frame(frame)) => {
                    verbose!(slot = frame.slot, len = frame.payload.len(), "request");
                    transport.send(frame);
                }
                Some(WorkerMessage::Close(ack)) => *closing = Some(Some(ack)),
                // every handle dropped
                None => *closing = Some(None),
            }
        }

        if let Some(ack) = closing {
            let Poll::Ready(result) = transport.poll_shutdown(cx) else {
                return Poll::Pending;
            };

            shared.lock().shutdown(Failure::Closed);
            verbose!("session closed");

            match ack.take() {
                Some(ack) => {
                    let _ = ack.send(result);
                }
                None => {
                    if let Err(_err) = result {
                        #[cfg(feature = "log")]
                        log::error!("failed to shutdown transport: {_err}");
                    }
                }
            }
            return Poll::Ready(());
        }

        loop {
            {
                let mut dispatch = shared.lock();
                if dispatch.result_sets.is_saturated() {
                    verbose!("result set backlog full, reading paused");
                    dispatch.reader = Some(cx.waker().clone());
                    break;
                }
            }
            match transport.poll_recv(cx) {
                Poll::Ready(Ok(Some(frame))) => {
                    if let Err(_err) = handle(&mut shared.lock(), transport, frame) {
                        #[cfg(feature = "log")]
                        log::error!("frame ignored: {_err}");
                    }
                }
                Poll::Ready(Ok(None)) => {
                    return crashed(shared, "server closed the link");
                }
                Poll::Ready(Err(_err)) => {
                    #[cfg(feature = "log")]
                    log::error!("failed to receive: {_err}");
                    return crashed(shared, "receive error");
                }
                Poll::Pending => break,
            }
        }

        if let Poll::Ready(Err(_err)) = transport.poll_flush(cx) {
            #[cfg(feature = "log")]
            log::error!("failed to send: {_err}");
            return crashed(shared, "send error");
        }

        Poll::Pending
    }
}

fn crashed(shared: &Shared, _reason: &'static str) -> Poll<()> {
    verbose!(reason = _reason, "session crashed");
    shared.lock().shutdown(Failure::Crashed);
    Poll::Ready(())
}

/// Route one response frame.
fn handle(dispatch: &mut Dispatch, transport: &mut impl Transport, frame: ResponseFrame) -> Result<()> {
    if dispatch.closed {
        return Ok(());
    }

    verbose!(info = frame.info.name(), slot = frame.slot, len = frame.payload.len(), "response");

    match frame.info {
        ResponseInfo::SessionPayload | ResponseInfo::SessionBodyHead => {
            let is_head = frame.info == ResponseInfo::SessionBodyHead;
            if dispatch.slots.push(frame.slot, frame.payload, is_head)? == Push::Freed {
                dispatch_pending(dispatch, transport);
            }
        }
        ResponseInfo::ResultSetHello => {
            let name = ByteStr::from_utf8(frame.payload)?;
            dispatch.result_sets.hello(frame.slot, name);
        }
        ResponseInfo::ResultSetPayload => {
            dispatch.result_sets.payload(frame.slot, frame.writer, frame.payload);
        }
        ResponseInfo::ResultSetBye => {
            dispatch.result_sets.bye(frame.slot);
            transport.send(RequestFrame::new(RequestInfo::ResultSetByeOk, frame.slot, bytes::Bytes::new()));
        }
        found @ (ResponseInfo::HelloOk | ResponseInfo::HelloNg) => {
            return Err(ProtocolError::Unexpected { found, phase: "session" }.into());
        }
    }

    Ok(())
}

/// Hand the freed response box to the oldest pending request.
fn dispatch_pending(dispatch: &mut Dispatch, transport: &mut impl Transport) {
    let Some(request) = dispatch.pending.pop() else {
        return;
    };
    match dispatch.slots.allocate(request.receivers) {
        Ok(slot) => {
            verbose!(slot, pending = dispatch.pending.len(), "dispatch pending request");
            transport.send(RequestFrame::new(RequestInfo::SessionPayload, slot, request.payload));
        }
        Err(receivers) => {
            dispatch.pending.push_front(super::pending::PendingRequest { payload: request.payload, receivers });
        }
    }
}
