//! Response box table.
use bytes::Bytes;
use std::collections::VecDeque;

use crate::{
    common::verbose,
    ext::UsizeExt,
    frame::ProtocolError,
    response::{Cell, Failure},
};

/// Completion cells of one in flight request.
#[derive(Debug)]
pub(crate) enum Receivers {
    /// Statement, one reply.
    Single(Cell),
    /// Query, a head reply naming the result set, then the body reply.
    Query { head: Cell, body: Cell },
}

impl Receivers {
    /// Returns `true` if every cell was closed by the caller.
    pub(crate) fn is_abandoned(&self) -> bool {
        match self {
            Receivers::Single(cell) => cell.is_abandoned(),
            Receivers::Query { head, body } => head.is_abandoned() && body.is_abandoned(),
        }
    }

    pub(crate) fn fail(&self, failure: Failure) {
        match self {
            Receivers::Single(cell) => cell.fail(failure),
            Receivers::Query { head, body } => {
                head.fail(failure);
                body.fail(failure);
            }
        }
    }
}

/// State of an owned response box.
#[derive(Debug)]
struct ResponseState {
    expected: u8,
    received: u8,
    receivers: Receivers,
}

/// Outcome of [`ResponseBox::push`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Push {
    /// Every expected reply arrived, the box is free again.
    Freed,
    /// More replies expected.
    Owned,
}

/// Fixed capacity table of response boxes.
///
/// A box is either free, listed in the free list, or owned by exactly one
/// in flight request.
#[derive(Debug)]
pub(crate) struct ResponseBox {
    states: Box<[Option<ResponseState>]>,
    free: VecDeque<u16>,
}

impl ResponseBox {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            states: (0..capacity).map(|_| None).collect(),
            free: (0..capacity).map(UsizeExt::to_u16).collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.states.len()
    }

    pub(crate) fn in_use(&self) -> usize {
        self.states.len() - self.free.len()
    }

    /// Claim a free box, returns the receivers back if every box is owned.
    ///
    /// Every request starts expecting one reply, a head reply raises it to two.
    pub(crate) fn allocate(&mut self, receivers: Receivers) -> Result<u16, Receivers> {
        let Some(slot) = self.free.pop_front() else {
            return Err(receivers);
        };
        let state = &mut self.states[slot as usize];
        assert!(state.is_none(), "response box {slot} in free list is owned");
        *state = Some(ResponseState { expected: 1, received: 0, receivers });
        verbose!(slot, in_use = self.in_use(), "allocate response box");
        Ok(slot)
    }

    /// Deliver a reply to the owner of `slot`.
    ///
    /// The first reply of a query completes the head, with `is_head` the body
    /// is expected as a second reply, otherwise the same payload completes
    /// both.
    pub(crate) fn push(&mut self, slot: u16, payload: Bytes, is_head: bool) -> Result<Push, ProtocolError> {
        let state = self
            .states
            .get_mut(slot as usize)
            .and_then(Option::as_mut)
            .ok_or(ProtocolError::UnknownSlot(slot))?;

        match (&state.receivers, state.received) {
            (Receivers::Single(cell), 0) => cell.complete(payload),
            (Receivers::Query { head, body }, 0) => {
                if is_head {
                    state.expected = 2;
                    head.complete(payload);
                } else {
                    head.complete(payload.clone());
                    body.complete(payload);
                }
            }
            (Receivers::Query { body, .. }, 1) => body.complete(payload),
            _ => return Err(ProtocolError::UnknownSlot(slot)),
        }
        state.received += 1;

        match self.release_if_done(slot) {
            true => Ok(Push::Freed),
            false => Ok(Push::Owned),
        }
    }

    /// Free `slot` once every expected reply has arrived.
    pub(crate) fn release_if_done(&mut self, slot: u16) -> bool {
        let Some(state) = self.states.get_mut(slot as usize) else {
            return false;
        };
        if !matches!(state, Some(s) if s.received >= s.expected) {
            return false;
        }
        *state = None;
        self.free.push_back(slot);
        verbose!(slot, in_use = self.in_use(), "release response box");
        true
    }

    /// Fail every owner and free every box.
    pub(crate) fn fail_all(&mut self, failure: Failure) {
        for (slot, state) in self.states.iter_mut().enumerate() {
            if let Some(state) = state.take() {
                state.receivers.fail(failure);
                self.free.push_back(slot.to_u16());
            }
        }
    }
}
