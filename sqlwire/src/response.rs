//! Response handles.
//!
//! Every request owns one or two completion cells. The worker completes a
//! cell exactly once, the caller consumes it exactly once. Closing a cell
//! before completion wakes every waiter with [`AlreadyClosed`].
use bytes::Bytes;
use std::{
    fmt,
    mem,
    pin::pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::Notify;

use crate::{
    Error, Result, SessionWire,
    error::{AlreadyClosed, ServerCrashed},
};

/// Reason a cell was failed by the session wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Failure {
    Closed,
    Crashed,
}

impl Failure {
    pub(crate) fn error(self) -> Error {
        match self {
            Failure::Closed => AlreadyClosed.into(),
            Failure::Crashed => ServerCrashed.into(),
        }
    }
}

#[derive(Debug)]
enum CellState {
    Pending,
    Ready(Bytes),
    Consumed,
    Failed(Failure),
    Closed,
}

struct CellInner {
    state: Mutex<CellState>,
    notify: Notify,
}

/// Single assignment completion shared by the worker and the caller.
#[derive(Clone)]
pub(crate) struct Cell {
    inner: Arc<CellInner>,
}

impl Cell {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(CellInner {
                state: Mutex::new(CellState::Pending),
                notify: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CellState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, f: impl FnOnce(CellState) -> CellState) {
        {
            let mut state = self.lock();
            let old = mem::replace(&mut *state, CellState::Closed);
            *state = f(old);
        }
        self.inner.notify.notify_waiters();
    }

    /// Deliver payload, discarded if the caller already closed the cell.
    pub(crate) fn complete(&self, payload: Bytes) {
        self.transition(|state| match state {
            CellState::Pending => CellState::Ready(payload),
            state => state,
        });
    }

    /// Fail the cell unless it is already completed.
    pub(crate) fn fail(&self, failure: Failure) {
        self.transition(|state| match state {
            CellState::Pending => CellState::Failed(failure),
            state => state,
        });
    }

    pub(crate) fn close(&self) {
        self.transition(|state| match state {
            CellState::Failed(failure) => CellState::Failed(failure),
            _ => CellState::Closed,
        });
    }

    /// Returns `true` if nobody will ever consume the payload.
    pub(crate) fn is_abandoned(&self) -> bool {
        matches!(*self.lock(), CellState::Closed | CellState::Consumed)
    }

    pub(crate) fn is_done(&self) -> bool {
        !matches!(*self.lock(), CellState::Pending)
    }

    fn try_take(&self) -> Result<Option<Bytes>> {
        let mut state = self.lock();
        match mem::replace(&mut *state, CellState::Consumed) {
            CellState::Ready(payload) => Ok(Some(payload)),
            CellState::Pending => {
                *state = CellState::Pending;
                Ok(None)
            }
            CellState::Failed(failure) => {
                *state = CellState::Failed(failure);
                Err(failure.error())
            }
            old @ (CellState::Consumed | CellState::Closed) => {
                *state = old;
                Err(AlreadyClosed.into())
            }
        }
    }

    /// Wait until the cell is completed, failed or closed.
    ///
    /// This is cancel safe, the payload is only taken on the final poll.
    pub(crate) async fn wait(&self) -> Result<Bytes> {
        loop {
            let mut notified = pin!(self.inner.notify.notified());
            notified.as_mut().enable();

            if let Some(payload) = self.try_take()? {
                return Ok(payload);
            }

            notified.await;
        }
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cell").field(&*self.lock()).finish()
    }
}

/// Handle to the main response of a request.
///
/// Dropping the handle closes it, a payload arriving afterwards is discarded.
///
/// The session stays open while a response is held, even after every
/// [`SessionWire`] handle is dropped.
#[derive(Debug)]
pub struct Response {
    cell: Cell,
    _session: Option<SessionWire>,
}

impl Response {
    pub(crate) fn new(cell: Cell) -> Self {
        Self { cell, _session: None }
    }

    pub(crate) fn attached(cell: Cell, session: SessionWire) -> Self {
        Self { cell, _session: Some(session) }
    }

    /// Wait for the response payload.
    ///
    /// Without a deadline this waits as long as the session wire is open.
    /// The payload can only be taken once, calling this again afterwards
    /// returns [`AlreadyClosed`].
    pub async fn wait_for_main_response(&self) -> Result<Bytes> {
        self.cell.wait().await
    }

    /// Wait for the response payload with a deadline.
    ///
    /// On timeout, the response is still pending and can be waited again.
    pub async fn wait_for_main_response_timeout(&self, timeout: Duration) -> Result<Bytes> {
        tokio::time::timeout(timeout, self.cell.wait()).await?
    }

    /// Returns `true` if the response is completed, failed or closed.
    pub fn is_done(&self) -> bool {
        self.cell.is_done()
    }

    /// Close the response.
    ///
    /// Concurrent waiters wake with [`AlreadyClosed`] if the payload was not
    /// yet delivered.
    pub fn close(&self) {
        self.cell.close();
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        self.cell.close();
    }
}

/// Strategy to decode a response payload.
pub trait Distiller<V>: Send + Sync + 'static {
    fn distill(&self, payload: Bytes) -> Result<V>;
}

impl<V, F> Distiller<V> for F
where
    F: Fn(Bytes) -> Result<V> + Send + Sync + 'static,
{
    fn distill(&self, payload: Bytes) -> Result<V> {
        self(payload)
    }
}

/// Handle to a response decoded by a [`Distiller`].
pub struct FutureResponse<V = Bytes> {
    response: Response,
    distiller: Box<dyn Distiller<V>>,
}

impl FutureResponse<Bytes> {
    pub(crate) fn raw(response: Response) -> Self {
        Self::new(response, Ok::<Bytes, Error>)
    }
}

impl<V: 'static> FutureResponse<V> {
    pub(crate) fn new(response: Response, distiller: impl Distiller<V>) -> Self {
        Self { response, distiller: Box::new(distiller) }
    }

    /// Wait for the response and decode it.
    pub async fn get(&self) -> Result<V> {
        let payload = self.response.wait_for_main_response().await?;
        self.distiller.distill(payload)
    }

    /// Wait for the response with a deadline and decode it.
    ///
    /// On timeout, the response is still pending and can be waited again.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<V> {
        let payload = self.response.wait_for_main_response_timeout(timeout).await?;
        self.distiller.distill(payload)
    }

    /// Returns `true` if the response is completed, failed or closed.
    pub fn is_done(&self) -> bool {
        self.response.is_done()
    }

    /// Close the response, see [`Response::close`].
    pub fn close(&self) {
        self.response.close();
    }
}

impl<V: 'static> fmt::Debug for FutureResponse<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureResponse").field("response", &self.response).finish_non_exhaustive()
    }
}
