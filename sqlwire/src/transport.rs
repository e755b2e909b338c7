//! The [`Transport`] trait.
use std::{
    io,
    task::{Context, Poll},
};

use crate::{
    Result,
    frame::{RequestFrame, ResponseFrame},
};

pub mod ipc;
mod stream;

pub use stream::StreamTransport;

/// A link which can send request frames and receive response frames.
pub trait Transport: Unpin {
    /// Send frame to the server.
    ///
    /// Note that this send is buffered, caller must also call
    /// [`poll_flush`][1] or [`flush`][2] afterwards.
    ///
    /// [1]: Transport::poll_flush
    /// [2]: TransportExt::flush
    fn send(&mut self, frame: RequestFrame);

    /// Poll to flush buffered frames.
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>>;

    /// Poll to receive a frame.
    ///
    /// Returns [`None`] when the server closed the link cleanly.
    fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<Option<ResponseFrame>>>;

    /// Poll to close the link.
    fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>>;
}

impl<T> Transport for &mut T where T: Transport {
    fn send(&mut self, frame: RequestFrame) {
        T::send(self, frame);
    }

    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        T::poll_flush(self, cx)
    }

    fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<Option<ResponseFrame>>> {
        T::poll_recv(self, cx)
    }

    fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        T::poll_shutdown(self, cx)
    }
}

/// An extension trait to provide `Future` API for [`Transport`].
pub trait TransportExt: Transport {
    /// Flush buffered frames.
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        std::future::poll_fn(|cx|self.poll_flush(cx))
    }

    /// Receive a frame.
    fn recv(&mut self) -> impl Future<Output = Result<Option<ResponseFrame>>> {
        std::future::poll_fn(|cx|self.poll_recv(cx))
    }

    /// Close the link.
    fn shutdown(&mut self) -> impl Future<Output = io::Result<()>> {
        std::future::poll_fn(|cx|self.poll_shutdown(cx))
    }
}

impl<T> TransportExt for T where T: Transport { }
