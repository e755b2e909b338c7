//! Result set side channel.
//!
//! The server announces a result set with a hello frame carrying its name and
//! an index, then streams chunks tagged with a writer id. An empty chunk ends
//! the current record of that writer. A bye frame ends the whole result set,
//! which the client always acknowledges, even after the consumer went away.
use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll, ready},
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::{
    Result, SessionWire,
    common::{ByteStr, verbose},
    error::{AlreadyClosed, InvalidArgument, ServerCrashed},
};

/// Finished result sets kept for a consumer that has not connected yet.
const MAX_UNCLAIMED: usize = 16;

/// Event delivered from the worker to a [`ResultSetWire`].
#[derive(Debug)]
pub(crate) enum Event {
    Record(Bytes),
    EndOfRecord,
    Crashed,
    Closed,
}

/// Records delivered to a consumer but not yet taken by it.
#[derive(Debug, Clone)]
pub(crate) struct Backlog {
    count: Arc<AtomicUsize>,
    limit: usize,
}

impl Backlog {
    fn new(limit: usize) -> Self {
        Self { count: Arc::new(AtomicUsize::new(0)), limit }
    }

    fn push(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn is_full(&self) -> bool {
        self.count.load(Ordering::Acquire) >= self.limit
    }

    /// Returns `true` if the backlog was full before this record was taken.
    pub(crate) fn take(&self) -> bool {
        self.count.fetch_sub(1, Ordering::AcqRel) >= self.limit
    }
}

#[derive(Debug)]
struct Entry {
    send: UnboundedSender<Event>,
    /// Taken by the consumer on connect.
    recv: Option<UnboundedReceiver<Event>>,
    backlog: Backlog,
    index: Option<u16>,
    writers: HashMap<u8, BytesMut>,
    finished: bool,
}

impl Entry {
    fn new(limit: usize) -> Self {
        let (send, recv) = mpsc::unbounded_channel();
        Self {
            send,
            recv: Some(recv),
            backlog: Backlog::new(limit),
            index: None,
            writers: HashMap::new(),
            finished: false,
        }
    }

    fn deliver(&self, event: Event) {
        if let Event::Record(_) = event {
            self.backlog.push();
        }
        // consumer may already closed
        let _ = self.send.send(event);
    }
}

/// Result sets of one session wire, keyed by name and by server index.
///
/// Each result set buffers at most `limit` undelivered records before
/// [`is_saturated`][1] asks the worker to stop reading the transport.
///
/// [1]: ResultSetRegistry::is_saturated
#[derive(Debug)]
pub(crate) struct ResultSetRegistry {
    entries: HashMap<ByteStr, Entry>,
    by_index: HashMap<u16, ByteStr>,
    /// Closed by the consumer before the server announced them.
    discarded: HashSet<ByteStr>,
    /// Finished and never connected, oldest first.
    unclaimed: VecDeque<ByteStr>,
    limit: usize,
}

impl ResultSetRegistry {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_index: HashMap::new(),
            discarded: HashSet::new(),
            unclaimed: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Bind the consumer of `name`.
    ///
    /// Frames may arrive before the consumer connects, they are buffered.
    pub(crate) fn connect(&mut self, name: ByteStr) -> Result<(UnboundedReceiver<Event>, Backlog), InvalidArgument> {
        let limit = self.limit;
        let entry = self.entries.entry(name.clone()).or_insert_with(|| Entry::new(limit));
        let recv = entry.recv.take().ok_or(InvalidArgument("result set already connected"))?;
        let backlog = entry.backlog.clone();
        if entry.finished {
            self.entries.remove(&name);
            self.unclaimed.retain(|e| e != &name);
        }
        self.discarded.remove(&name);
        Ok((recv, backlog))
    }

    /// Unbind the consumer of `name`, chunks arriving afterwards are discarded.
    pub(crate) fn disconnect(&mut self, name: &str) {
        let Some(entry) = self.entries.remove(name) else {
            return;
        };
        match entry.index {
            Some(index) => {
                self.by_index.remove(&index);
            }
            None if !entry.finished => {
                self.discarded.insert(ByteStr::copy_from_str(name));
            }
            None => {}
        }
    }

    pub(crate) fn hello(&mut self, index: u16, name: ByteStr) {
        if self.discarded.remove(&name) {
            verbose!(index, name = name.as_str(), "result set hello after close");
            return;
        }
        verbose!(index, name = name.as_str(), "result set hello");
        let limit = self.limit;
        let entry = self.entries.entry(name.clone()).or_insert_with(|| Entry::new(limit));
        entry.index = Some(index);
        self.by_index.insert(index, name);
    }

    pub(crate) fn payload(&mut self, index: u16, writer: u8, chunk: Bytes) {
        let Some(entry) = self.by_index.get(&index).and_then(|name| self.entries.get_mut(name)) else {
            verbose!(index, writer, len = chunk.len(), "result set chunk discarded");
            return;
        };

        if entry.send.is_closed() {
            return;
        }

        if chunk.is_empty() {
            if let Some(record) = entry.writers.remove(&writer) {
                entry.deliver(Event::Record(record.freeze()));
            }
        } else {
            entry.writers.entry(writer).or_default().extend_from_slice(&chunk);
        }
    }

    /// No more records for `index`, partial records are flushed.
    pub(crate) fn bye(&mut self, index: u16) {
        let Some(name) = self.by_index.remove(&index) else {
            return;
        };
        let Some(entry) = self.entries.get_mut(&name) else {
            return;
        };

        let mut writers: Vec<_> = entry.writers.drain().collect();
        writers.sort_by_key(|(writer, _)| *writer);
        for (_, record) in writers {
            if !record.is_empty() {
                entry.deliver(Event::Record(record.freeze()));
            }
        }
        entry.deliver(Event::EndOfRecord);
        entry.index = None;
        entry.finished = true;

        if entry.recv.is_none() {
            self.entries.remove(&name);
            return;
        }

        self.unclaimed.push_back(name);
        while self.unclaimed.len() > MAX_UNCLAIMED {
            let Some(oldest) = self.unclaimed.pop_front() else {
                break;
            };
            verbose!(name = oldest.as_str(), "unclaimed result set dropped");
            self.entries.remove(&oldest);
        }
    }

    /// Returns `true` if a result set still being streamed holds a full backlog.
    pub(crate) fn is_saturated(&self) -> bool {
        self.entries.values().any(|entry| !entry.finished && entry.backlog.is_full())
    }

    /// Deliver a terminal event to every result set and forget them.
    pub(crate) fn terminate(&mut self, crashed: bool) {
        for (_, entry) in self.entries.drain() {
            if !entry.finished {
                entry.deliver(if crashed { Event::Crashed } else { Event::Closed });
            }
        }
        self.by_index.clear();
        self.discarded.clear();
        self.unclaimed.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Connecting,
    Streaming,
    EndOfRecord,
    Closed,
    Crashed,
}

/// Consumer of one result set.
///
/// Created with [`SessionWire::create_result_set_wire`], then bound with
/// [`connect`][1] using the name from the head response of a query.
///
/// Records can be consumed as a [`Stream`], by [`next_record`][2], or as a
/// byte cursor with [`read`][3]. Closing or dropping the wire discards the
/// remaining records without stalling the server.
///
/// At most [`Config::result_set_buffer`][4] records are buffered for a
/// consumer, the session stops reading from the server until the consumer
/// takes records or closes.
///
/// [1]: ResultSetWire::connect
/// [2]: ResultSetWire::next_record
/// [3]: ResultSetWire::read
/// [4]: crate::Config::result_set_buffer
pub struct ResultSetWire {
    wire: SessionWire,
    state: State,
    name: Option<ByteStr>,
    recv: Option<UnboundedReceiver<Event>>,
    backlog: Option<Backlog>,
    current: Bytes,
}

impl ResultSetWire {
    pub(crate) fn new(wire: SessionWire) -> Self {
        Self { wire, state: State::Created, name: None, recv: None, backlog: None, current: Bytes::new() }
    }

    /// Bind to the result set called `name`.
    pub fn connect(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(InvalidArgument("result set name is empty").into());
        }
        match self.state {
            State::Created => {}
            State::Closed => return Err(AlreadyClosed.into()),
            _ => return Err(InvalidArgument("result set wire already connected").into()),
        }

        let name = ByteStr::copy_from_str(name);
        let (recv, backlog) = {
            let mut dispatch = self.wire.shared.lock();
            if dispatch.closed {
                return Err(AlreadyClosed.into());
            }
            dispatch.result_sets.connect(name.clone())?
        };

        self.recv = Some(recv);
        self.backlog = Some(backlog);
        self.name = Some(name);
        self.state = State::Connecting;
        Ok(())
    }

    /// Returns the name this wire is bound to.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Poll for the next record.
    ///
    /// Returns [`None`] once the server ended the result set.
    pub fn poll_next_record(&mut self, cx: &mut Context) -> Poll<Result<Option<Bytes>>> {
        if !self.current.is_empty() {
            return Poll::Ready(Ok(Some(std::mem::take(&mut self.current))));
        }

        match self.state {
            State::Connecting | State::Streaming => {}
            State::EndOfRecord => return Poll::Ready(Ok(None)),
            State::Crashed => return Poll::Ready(Err(ServerCrashed.into())),
            State::Created => return Poll::Ready(Err(InvalidArgument("result set wire not connected").into())),
            State::Closed => return Poll::Ready(Err(AlreadyClosed.into())),
        }

        let Some(recv) = self.recv.as_mut() else {
            return Poll::Ready(Err(AlreadyClosed.into()));
        };

        let event = ready!(recv.poll_recv(cx));
        self.state = State::Streaming;

        match event {
            Some(Event::Record(record)) => {
                if self.backlog.as_ref().is_some_and(Backlog::take) {
                    self.wire.shared.lock().wake_reader();
                }
                Poll::Ready(Ok(Some(record)))
            }
            Some(Event::EndOfRecord) => {
                self.state = State::EndOfRecord;
                Poll::Ready(Ok(None))
            }
            Some(Event::Crashed) => {
                self.state = State::Crashed;
                Poll::Ready(Err(ServerCrashed.into()))
            }
            Some(Event::Closed) | None => {
                self.state = State::Closed;
                Poll::Ready(Err(AlreadyClosed.into()))
            }
        }
    }

    /// Returns the next record.
    ///
    /// Returns [`None`] once the server ended the result set.
    pub async fn next_record(&mut self) -> Result<Option<Bytes>> {
        std::future::poll_fn(|cx|self.poll_next_record(cx)).await
    }

    /// Read bytes of the result set into `buf`, records are read back to back.
    ///
    /// Returns `0` once the server ended the result set.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.current.is_empty() {
            match self.next_record().await? {
                Some(record) => self.current = record,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current.split_to(n));
        Ok(n)
    }

    /// Read every remaining byte of the result set into `buf`.
    pub async fn read_to_end(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let mut total = 0;
        while let Some(record) = self.next_record().await? {
            total += record.len();
            buf.extend_from_slice(&record);
        }
        Ok(total)
    }

    /// Close the result set.
    ///
    /// Remaining records are discarded, the server is not waited for. A
    /// result set closed before the server announced it is discarded on
    /// arrival.
    pub fn close(&mut self) {
        if let State::Closed = self.state {
            return;
        }
        self.state = State::Closed;
        self.current = Bytes::new();
        self.recv.take();
        self.backlog.take();
        if let Some(name) = self.name.as_ref() {
            let mut dispatch = self.wire.shared.lock();
            dispatch.result_sets.disconnect(name);
            dispatch.wake_reader();
        }
    }
}

impl Stream for ResultSetWire {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();
        match me.state {
            State::EndOfRecord | State::Closed | State::Crashed if me.current.is_empty() => {
                return Poll::Ready(None);
            }
            _ => {}
        }
        me.poll_next_record(cx).map(Result::transpose)
    }
}

impl Drop for ResultSetWire {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ResultSetWire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSetWire")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}
