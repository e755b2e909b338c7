//! In process link.
//!
//! Frames travel as whole buffer handles, there is no length prefix to parse.
//! The response direction is bounded by the channel capacity, a server side
//! producer waits while the client worker is behind.
//!
//! ```no_run
//! # async fn app() -> sqlwire::Result<()> {
//! use sqlwire::{Config, SessionWire, transport::ipc};
//!
//! let (transport, mut endpoint) = ipc::channel(64);
//! let wire = SessionWire::open(transport, Config::default());
//!
//! tokio::spawn(async move {
//!     while let Some(request) = endpoint.recv().await {
//!         // serve request
//! #       let _ = request;
//!     }
//! });
//! # Ok(())
//! # }
//! ```
use std::{
    io,
    task::{Context, Poll},
};
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};

use super::Transport;
use crate::{
    Result,
    common::verbose,
    frame::{RequestFrame, ResponseFrame},
};

/// Create a connected pair of client [`IpcTransport`] and server [`IpcEndpoint`].
///
/// `capacity` is the number of response frames the server can queue ahead of the client.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn channel(capacity: usize) -> (IpcTransport, IpcEndpoint) {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (res_tx, res_rx) = mpsc::channel(capacity);
    (
        IpcTransport { buffer: Vec::new(), send: Some(req_tx), recv: res_rx },
        IpcEndpoint { recv: req_rx, responder: IpcResponder { send: res_tx } },
    )
}

/// Client side of an in process link.
#[derive(Debug)]
pub struct IpcTransport {
    buffer: Vec<RequestFrame>,
    send: Option<UnboundedSender<RequestFrame>>,
    recv: Receiver<ResponseFrame>,
}

impl Transport for IpcTransport {
    fn send(&mut self, frame: RequestFrame) {
        verbose!(info = ?frame.info, slot = frame.slot, len = frame.payload.len(), "ipc out");
        self.buffer.push(frame);
    }

    fn poll_flush(&mut self, _: &mut Context) -> Poll<io::Result<()>> {
        if self.buffer.is_empty() {
            return Poll::Ready(Ok(()));
        }
        let Some(send) = self.send.as_ref() else {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        };
        for frame in self.buffer.drain(..) {
            if send.send(frame).is_err() {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }
        }
        Poll::Ready(Ok(()))
    }

    fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<Option<ResponseFrame>>> {
        self.recv.poll_recv(cx).map(Ok)
    }

    fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        let result = self.poll_flush(cx);
        self.send.take();
        result
    }
}

/// Server side of an in process link.
#[derive(Debug)]
pub struct IpcEndpoint {
    recv: UnboundedReceiver<RequestFrame>,
    responder: IpcResponder,
}

impl IpcEndpoint {
    /// Receive the next request frame.
    ///
    /// Returns [`None`] when the client shutdown or dropped the link.
    pub async fn recv(&mut self) -> Option<RequestFrame> {
        self.recv.recv().await
    }

    /// Send a response frame, waits while the response channel is full.
    pub async fn send(&self, frame: ResponseFrame) -> io::Result<()> {
        self.responder.send(frame).await
    }

    /// Returns a cloneable handle to send responses from other tasks.
    pub fn responder(&self) -> IpcResponder {
        self.responder.clone()
    }
}

/// Cloneable response half of [`IpcEndpoint`].
#[derive(Debug, Clone)]
pub struct IpcResponder {
    send: Sender<ResponseFrame>,
}

impl IpcResponder {
    /// Send a response frame, waits while the response channel is full.
    pub async fn send(&self, frame: ResponseFrame) -> io::Result<()> {
        self.send.send(frame).await.map_err(|_| io::ErrorKind::BrokenPipe.into())
    }
}
