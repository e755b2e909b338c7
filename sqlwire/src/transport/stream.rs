use bytes::BytesMut;
use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use super::Transport;
use crate::{
    Result,
    common::verbose,
    frame::{RequestFrame, ResponseFrame},
    io::{poll_read, poll_write_all},
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Buffered, length prefixed framing over a byte stream.
#[derive(Debug)]
pub struct StreamTransport<IO> {
    io: IO,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl StreamTransport<TcpStream> {
    /// Open tcp connection.
    pub async fn connect(host: &str, port: u16) -> io::Result<Self> {
        let socket = TcpStream::connect((host, port)).await?;
        socket.set_nodelay(true)?;
        Ok(Self::new(socket))
    }
}

impl<IO> StreamTransport<IO> {
    pub fn new(io: IO) -> Self {
        Self {
            io,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
        }
    }

    pub fn get_ref(&self) -> &IO {
        &self.io
    }

    pub fn into_inner(self) -> IO {
        self.io
    }
}

impl<IO> Transport for StreamTransport<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn send(&mut self, frame: RequestFrame) {
        verbose!(info = ?frame.info, slot = frame.slot, len = frame.payload.len(), "frame out");
        frame.encode(&mut self.write_buf);
    }

    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        ready!(poll_write_all(&mut self.io, &mut self.write_buf, cx))?;
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<Option<ResponseFrame>>> {
        loop {
            if let Some(frame) = ResponseFrame::decode(&mut self.read_buf)? {
                verbose!(info = ?frame.info, slot = frame.slot, len = frame.payload.len(), "frame in");
                return Poll::Ready(Ok(Some(frame)));
            }

            self.read_buf.reserve(DEFAULT_BUF_CAPACITY);
            let n = ready!(poll_read(&mut self.io, &mut self.read_buf, cx))?;
            if n == 0 {
                if self.read_buf.is_empty() {
                    return Poll::Ready(Ok(None));
                }
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()));
            }
        }
    }

    fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        ready!(self.poll_flush(cx))?;
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}
