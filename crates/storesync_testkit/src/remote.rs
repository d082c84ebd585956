//! Scripted remote source for tests.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use storesync_core::{RemoteError, RemoteSource};
use tokio::sync::Semaphore;

/// A remote source whose responses are scripted by the test.
///
/// Each call takes the next queued response; once the queue is empty the
/// fallback response (if any) is repeated. A paused remote holds every call
/// until [`MockRemote::release`] lets it through, which lets tests overlap
/// two operations deterministically.
pub struct MockRemote<T> {
    connected: AtomicBool,
    responses: Mutex<VecDeque<Result<T, RemoteError>>>,
    fallback: Mutex<Option<Result<T, RemoteError>>>,
    requests: Mutex<Vec<String>>,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl<T: Clone + Send + Sync> MockRemote<T> {
    /// Creates a connected remote with no scripted responses.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            responses: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    /// Queues a successful response.
    pub fn push_ok(&self, value: T) {
        self.responses.lock().push_back(Ok(value));
    }

    /// Queues a failure.
    pub fn push_err(&self, error: RemoteError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Sets the response returned once the queue is exhausted.
    pub fn set_fallback(&self, response: Result<T, RemoteError>) {
        *self.fallback.lock() = Some(response);
    }

    /// Sets the connected state. A disconnected remote fails every call
    /// with [`RemoteError::NotConnected`] without consuming a response.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns the connected state.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns the number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the label of every call, in call order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// Returns the number of responses still queued.
    pub fn pending_responses(&self) -> usize {
        self.responses.lock().len()
    }

    /// Holds subsequent calls until released.
    pub fn pause(&self) {
        let mut gate = self.gate.lock();
        if gate.is_none() {
            *gate = Some(Arc::new(Semaphore::new(0)));
        }
    }

    /// Lets `n` held calls through, in the order they arrived.
    pub fn release(&self, n: usize) {
        if let Some(gate) = self.gate.lock().as_ref() {
            gate.add_permits(n);
        }
    }

    /// Lets every held and future call through.
    pub fn resume(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.close();
        }
    }

    /// Performs one call labelled `label`.
    ///
    /// The response is chosen when the call arrives, so the script is
    /// consumed in call order even while the remote is paused.
    pub async fn call(&self, label: &str) -> Result<T, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(label.to_string());

        let response = if self.is_connected() {
            self.next_response()
        } else {
            Err(RemoteError::NotConnected)
        };

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            // A closed gate means resume() was called.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        tracing::trace!(label, ok = response.is_ok(), "mock remote call");
        response
    }

    fn next_response(&self) -> Result<T, RemoteError> {
        if let Some(response) = self.responses.lock().pop_front() {
            return response;
        }
        self.fallback
            .lock()
            .clone()
            .unwrap_or_else(|| Err(RemoteError::Rejected("no mock response scripted".into())))
    }
}

impl<T: Clone + Send + Sync> Default for MockRemote<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> RemoteSource<T> for MockRemote<T> {
    fn fetch(&self) -> impl std::future::Future<Output = Result<T, RemoteError>> + Send {
        self.call("fetch")
    }
}

impl<T> std::fmt::Debug for MockRemote<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRemote")
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .field("calls", &self.calls.load(Ordering::SeqCst))
            .field("pending", &self.responses.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn responses_consumed_in_order() {
        let remote = MockRemote::new();
        remote.push_ok(1);
        remote.push_err(RemoteError::Timeout);
        remote.push_ok(3);

        assert_eq!(remote.call("a").await, Ok(1));
        assert_eq!(remote.call("b").await, Err(RemoteError::Timeout));
        assert_eq!(remote.call("c").await, Ok(3));
        assert_eq!(remote.requests(), vec!["a", "b", "c"]);
        assert_eq!(remote.call_count(), 3);
    }

    #[tokio::test]
    async fn fallback_repeats_after_queue() {
        let remote = MockRemote::new();
        remote.set_fallback(Ok(9));
        remote.push_ok(1);

        assert_eq!(remote.call("x").await, Ok(1));
        assert_eq!(remote.call("x").await, Ok(9));
        assert_eq!(remote.call("x").await, Ok(9));
    }

    #[tokio::test]
    async fn unscripted_call_is_rejected() {
        let remote: MockRemote<u32> = MockRemote::new();
        let err = remote.call("x").await.unwrap_err();
        assert_eq!(err.code(), "REJECTED");
    }

    #[tokio::test]
    async fn disconnected_remote_keeps_script() {
        let remote = MockRemote::new();
        remote.push_ok(1);
        remote.set_connected(false);

        assert_eq!(remote.call("x").await, Err(RemoteError::NotConnected));
        assert_eq!(remote.pending_responses(), 1);

        remote.set_connected(true);
        assert_eq!(remote.call("x").await, Ok(1));
    }

    #[tokio::test]
    async fn paused_calls_wait_for_release() {
        let remote = Arc::new(MockRemote::new());
        remote.push_ok(1);
        remote.pause();

        let held = tokio::spawn({
            let remote = Arc::clone(&remote);
            async move { remote.call("held").await }
        });
        tokio::task::yield_now().await;
        assert!(!held.is_finished());

        remote.release(1);
        assert_eq!(held.await.unwrap(), Ok(1));
    }

    #[tokio::test]
    async fn resume_opens_gate() {
        let remote = Arc::new(MockRemote::new());
        remote.set_fallback(Ok(2));
        remote.pause();

        let held = tokio::spawn({
            let remote = Arc::clone(&remote);
            async move { remote.call("held").await }
        });
        remote.resume();
        assert_eq!(held.await.unwrap(), Ok(2));
        assert_eq!(remote.call("free").await, Ok(2));
    }

    #[tokio::test]
    async fn fetch_goes_through_script() {
        let remote = MockRemote::new();
        remote.push_ok(vec![1, 2]);
        assert_eq!(remote.fetch().await, Ok(vec![1, 2]));
        assert_eq!(remote.requests(), vec!["fetch"]);
    }
}
