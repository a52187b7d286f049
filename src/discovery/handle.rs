//! Cancellable handle over an asynchronous search.

use core::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::discovery::session::SessionControl;
use crate::discovery::Discovered;
use crate::error::{KnxError, Result};
use crate::protocol::SearchResponse;

/// What a finished search hands back
pub type SearchResult = Result<Vec<Discovered<SearchResponse>>>;

#[derive(Debug, Default)]
struct Slot {
    completion: Option<SearchResult>,
    waker: Option<Waker>,
}

/// Completion cell shared between a handle and its session
#[derive(Debug, Default)]
pub(crate) struct HandleState {
    slot: Mutex<Slot>,
    done: Condvar,
}

impl HandleState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store the result unless one is already there; `true` if this call completed it
    pub(crate) fn complete(&self, result: SearchResult) -> bool {
        let waker = {
            let mut slot = self.slot.lock();
            if slot.completion.is_some() {
                return false;
            }
            slot.completion = Some(result);
            slot.waker.take()
        };
        self.done.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    fn peek<R>(&self, f: impl FnOnce(Option<&SearchResult>) -> R) -> R {
        f(self.slot.lock().completion.as_ref())
    }
}

/// Handle to a search started with [`Discoverer::search_async`](crate::Discoverer::search_async)
///
/// The handle completes once, when the session ends:
///
/// - with the discoverer's responses when the window elapses
/// - with [`KnxError::Cancelled`] when [`cancel`](Self::cancel) or
///   [`stop_search`](crate::Discoverer::stop_search) ends it early
/// - with the transport error if the socket failed
///
/// Waiting with a timeout never affects the search itself. The handle is also
/// a [`Future`] resolving to the same result.
///
/// # Examples
///
/// ```rust,no_run
/// use knx_discover::Discoverer;
/// use std::time::Duration;
///
/// # fn main() -> knx_discover::Result<()> {
/// let discoverer = Discoverer::new(0, true)?;
/// let handle = discoverer.search_async(Duration::from_secs(3))?;
///
/// match handle.get_timeout(Duration::from_secs(1)) {
///     Err(e) if e.is_timeout() => println!("still searching"),
///     other => println!("{other:?}"),
/// }
/// for server in handle.get()? {
///     println!("{server}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct SearchHandle {
    state: Arc<HandleState>,
    control: Arc<SessionControl>,
}

impl SearchHandle {
    pub(crate) fn new(state: Arc<HandleState>, control: Arc<SessionControl>) -> Self {
        Self { state, control }
    }

    /// Block until the search completes
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the search was cancelled or stopped, or the
    /// transport error that ended it
    pub fn get(&self) -> SearchResult {
        let mut slot = self.state.slot.lock();
        loop {
            if let Some(result) = slot.completion.as_ref() {
                return result.clone();
            }
            self.state.done.wait(&mut slot);
        }
    }

    /// Block until the search completes or `timeout` passes
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the search is still running after `timeout`, and
    /// otherwise the same errors as [`get`](Self::get)
    pub fn get_timeout(&self, timeout: Duration) -> SearchResult {
        let mut slot = self.state.slot.lock();
        self.state
            .done
            .wait_while_for(&mut slot, |s| s.completion.is_none(), timeout);
        slot.completion.clone().unwrap_or(Err(KnxError::Timeout))
    }

    /// Cancel the search
    ///
    /// Returns once the session has left the discoverer's active set. Returns
    /// `false` if the search had already completed.
    pub fn cancel(&self) -> bool {
        let cancelled = self.state.complete(Err(KnxError::Cancelled));
        self.control.stop();
        self.control.wait_finished();
        cancelled
    }

    /// Check if the search has completed in any way
    pub fn is_done(&self) -> bool {
        self.state.peek(|c| c.is_some())
    }

    /// Check if the search completed with `Cancelled`
    pub fn is_cancelled(&self) -> bool {
        self.state
            .peek(|c| matches!(c, Some(Err(e)) if e.is_cancelled()))
    }

    /// Check if the search completed with any error, cancellation included
    pub fn is_completed_exceptionally(&self) -> bool {
        self.state.peek(|c| matches!(c, Some(Err(_))))
    }
}

impl fmt::Debug for SearchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchHandle")
            .field("session", &self.control.id())
            .field("done", &self.is_done())
            .finish()
    }
}

impl Future for SearchHandle {
    type Output = SearchResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.state.slot.lock();
        match slot.completion.as_ref() {
            Some(result) => Poll::Ready(result.clone()),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn handle() -> (SearchHandle, Arc<HandleState>) {
        let state = HandleState::new();
        let control = Arc::new(SessionControl::new(1));
        (SearchHandle::new(Arc::clone(&state), control), state)
    }

    #[test]
    fn test_first_completion_wins() {
        let (handle, state) = handle();
        assert!(!handle.is_done());
        assert!(state.complete(Ok(Vec::new())));
        assert!(!state.complete(Err(KnxError::Cancelled)));

        assert!(handle.is_done());
        assert!(!handle.is_completed_exceptionally());
        assert_eq!(handle.get().unwrap().len(), 0);
    }

    #[test]
    fn test_get_timeout_leaves_handle_pending() {
        let (handle, _state) = handle();
        let err = handle.get_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_timeout());
        assert!(!handle.is_done());
    }

    #[test]
    fn test_get_wakes_on_completion() {
        let (handle, state) = handle();
        let completer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            state.complete(Err(KnxError::Cancelled));
        });
        let err = handle.get().unwrap_err();
        assert!(err.is_cancelled());
        assert!(handle.is_cancelled());
        assert!(handle.is_completed_exceptionally());
        completer.join().unwrap();
    }
}
