//! Requests waiting for a free response box.
use bytes::Bytes;
use std::collections::VecDeque;

use super::slot::Receivers;
use crate::{common::verbose, error::Backpressure, response::Failure};

/// Request that arrived while every response box was owned.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) payload: Bytes,
    pub(crate) receivers: Receivers,
}

/// Bounded FIFO of [`PendingRequest`].
///
/// Requests abandoned by their caller while queued are dropped instead of sent.
#[derive(Debug)]
pub(crate) struct PendingQueue {
    queue: VecDeque<PendingRequest>,
    limit: usize,
}

impl PendingQueue {
    pub(crate) fn new(limit: usize) -> Self {
        Self { queue: VecDeque::new(), limit }
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn push(&mut self, request: PendingRequest) -> Result<(), Backpressure> {
        if self.queue.len() >= self.limit {
            self.queue.retain(|req| !req.receivers.is_abandoned());
        }
        if self.queue.len() >= self.limit {
            return Err(Backpressure);
        }
        self.queue.push_back(request);
        verbose!(pending = self.queue.len(), "request queued");
        Ok(())
    }

    /// Put back a request that could not be dispatched.
    pub(crate) fn push_front(&mut self, request: PendingRequest) {
        self.queue.push_front(request);
    }

    /// Take the oldest request that still has a caller.
    pub(crate) fn pop(&mut self) -> Option<PendingRequest> {
        while let Some(request) = self.queue.pop_front() {
            if !request.receivers.is_abandoned() {
                return Some(request);
            }
            verbose!(pending = self.queue.len(), "abandoned request dropped");
        }
        None
    }

    pub(crate) fn fail_all(&mut self, failure: Failure) {
        for request in self.queue.drain(..) {
            request.receivers.fail(failure);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::response::{Cell, Response};

    fn request(tag: &'static [u8]) -> (PendingRequest, Response) {
        let cell = Cell::new();
        let req = PendingRequest { payload: Bytes::from_static(tag), receivers: Receivers::Single(cell.clone()) };
        (req, Response::new(cell))
    }

    #[test]
    fn fifo_and_limit() {
        let mut queue = PendingQueue::new(2);
        let (a, _ra) = request(b"a");
        let (b, _rb) = request(b"b");
        let (c, _rc) = request(b"c");

        queue.push(a).unwrap();
        queue.push(b).unwrap();
        assert_eq!(queue.push(c), Err(Backpressure));

        assert_eq!(&queue.pop().unwrap().payload[..], b"a");
        assert_eq!(&queue.pop().unwrap().payload[..], b"b");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn zero_limit_never_queues() {
        let mut queue = PendingQueue::new(0);
        let (a, _ra) = request(b"a");
        assert_eq!(queue.push(a), Err(Backpressure));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn abandoned_requests_are_skipped() {
        let mut queue = PendingQueue::new(2);
        let (a, ra) = request(b"a");
        let (b, _rb) = request(b"b");
        queue.push(a).unwrap();
        queue.push(b).unwrap();

        drop(ra);
        let (c, _rc) = request(b"c");
        queue.push(c).unwrap();

        assert_eq!(&queue.pop().unwrap().payload[..], b"b");
        assert_eq!(&queue.pop().unwrap().payload[..], b"c");
    }
}
