// twsmux/src/channel.rs

//! Per-request output stream.
//!
//! A [`RequestChannel`] is the consumer's handle on one in-flight request. The
//! owning manager pushes messages and errors into it from the dispatcher
//! thread; the consumer pulls them through [`RequestChannel::events`] (or one
//! of the convenience helpers) and blocks until the next event, completion,
//! error or cancellation.
//!
//! Lifecycle: `Idle -> Active -> Completed | Cancelled | Errored`. Terminal
//! states are sticky: once reached, further pushes are ignored.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use twsmux::channel::{ChannelEvent, RequestChannel};
//! use twsmux::contract::Bar;
//!
//! fn drain(channel: RequestChannel<Bar>) {
//!   for event in channel.events().with_timeout(Duration::from_secs(30)) {
//!     match event {
//!       ChannelEvent::Message(bar) => println!("{} close={}", bar.time, bar.close),
//!       ChannelEvent::Error(e) => eprintln!("warning: {}", e),
//!     }
//!   }
//!   println!("finished in state {:?}", channel.state());
//! }
//! ```

use crate::base::{MuxError, RequestId};
use crate::error_correlator::ErrorRecord;

use log::{debug, error, trace};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
  /// Allocated, outbound call not issued yet.
  Idle,
  /// Outbound call issued, awaiting replies.
  Active,
  /// End-of-data received.
  Completed,
  /// Caller asked for early termination.
  Cancelled,
  /// A terminal error tagged with this request arrived.
  Errored,
}

impl ChannelState {
  pub fn is_terminal(self) -> bool {
    matches!(self, ChannelState::Completed | ChannelState::Cancelled | ChannelState::Errored)
  }
}

/// Item yielded to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent<T> {
  Message(T),
  /// An error tagged with this request. Non-terminal errors (warnings) may be
  /// followed by more messages.
  Error(ErrorRecord),
}

/// Implemented by the manager that owns a channel, so the consumer side can
/// cancel without holding the manager itself.
pub(crate) trait ChannelOwner: Send + Sync {
  fn cancel_request(&self, req_id: RequestId) -> Result<(), MuxError>;
}

#[derive(Debug)]
struct Core<T> {
  state: ChannelState,
  queue: VecDeque<ChannelEvent<T>>,
}

/// State shared between the producing manager and the consuming handle.
pub(crate) struct ChannelShared<T> {
  req_id: RequestId,
  core: Mutex<Core<T>>,
  condvar: Condvar,
  last_error: Mutex<Option<ErrorRecord>>,
  owner: Weak<dyn ChannelOwner>,
}

impl<T: Send + 'static> ChannelShared<T> {
  pub(crate) fn new(req_id: RequestId, owner: Weak<dyn ChannelOwner>) -> Arc<Self> {
    Arc::new(ChannelShared {
      req_id,
      core: Mutex::new(Core { state: ChannelState::Idle, queue: VecDeque::new() }),
      condvar: Condvar::new(),
      last_error: Mutex::new(None),
      owner,
    })
  }

  pub(crate) fn req_id(&self) -> RequestId {
    self.req_id
  }

  pub(crate) fn state(&self) -> ChannelState {
    self.core.lock().state
  }

  /// Idle -> Active. Returns false if the channel already left Idle.
  pub(crate) fn activate(&self) -> bool {
    let mut core = self.core.lock();
    if core.state != ChannelState::Idle {
      return false;
    }
    core.state = ChannelState::Active;
    true
  }

  /// Queue a message for the consumer. Ignored once terminal.
  pub(crate) fn push_message(&self, msg: T) -> bool {
    let mut core = self.core.lock();
    if core.state.is_terminal() {
      trace!("Request {} is {:?}, dropping message", self.req_id, core.state);
      return false;
    }
    core.queue.push_back(ChannelEvent::Message(msg));
    self.condvar.notify_one();
    true
  }

  /// Record an error and queue it for the consumer. When `terminal` the
  /// channel moves to `Errored`.
  pub(crate) fn push_error(&self, record: ErrorRecord, terminal: bool) -> bool {
    let mut core = self.core.lock();
    if core.state.is_terminal() {
      trace!("Request {} is {:?}, dropping error {}", self.req_id, core.state, record);
      return false;
    }
    *self.last_error.lock() = Some(record.clone());
    core.queue.push_back(ChannelEvent::Error(record));
    if terminal {
      core.state = ChannelState::Errored;
      self.condvar.notify_all();
    } else {
      self.condvar.notify_one();
    }
    true
  }

  /// Move to a terminal state. Returns true only for the call that performed
  /// the transition, so callers can dispose exactly once.
  pub(crate) fn finish(&self, terminal: ChannelState) -> bool {
    debug_assert!(terminal.is_terminal());
    let mut core = self.core.lock();
    if core.state.is_terminal() {
      return false;
    }
    core.state = terminal;
    if terminal == ChannelState::Cancelled {
      // Consumer sees end-of-stream right away.
      core.queue.clear();
    }
    self.condvar.notify_all();
    debug!("Request {} -> {:?}", self.req_id, terminal);
    true
  }

  fn pop(&self, deadline: Option<Instant>) -> Option<ChannelEvent<T>> {
    let mut core = self.core.lock();
    loop {
      if let Some(event) = core.queue.pop_front() {
        return Some(event);
      }
      if core.state.is_terminal() {
        return None;
      }
      match deadline {
        Some(d) => {
          if self.condvar.wait_until(&mut core, d).timed_out() {
            return core.queue.pop_front();
          }
        }
        None => self.condvar.wait(&mut core),
      }
    }
  }

  fn drain(&self) -> Vec<ChannelEvent<T>> {
    self.core.lock().queue.drain(..).collect()
  }

  /// Queued events and the state they were queued under, read together.
  fn drain_with_state(&self) -> (Vec<ChannelEvent<T>>, ChannelState) {
    let mut core = self.core.lock();
    let events = core.queue.drain(..).collect();
    (events, core.state)
  }
}

/// Consumer handle on one in-flight request.
///
/// Dropping a handle whose request is still running cancels it.
pub struct RequestChannel<T: Send + 'static> {
  shared: Arc<ChannelShared<T>>,
}

impl<T: Send + 'static> RequestChannel<T> {
  pub(crate) fn new(shared: Arc<ChannelShared<T>>) -> Self {
    RequestChannel { shared }
  }

  pub(crate) fn shared(&self) -> &Arc<ChannelShared<T>> {
    &self.shared
  }

  pub fn request_id(&self) -> RequestId {
    self.shared.req_id
  }

  pub fn state(&self) -> ChannelState {
    self.shared.state()
  }

  pub fn is_terminal(&self) -> bool {
    self.state().is_terminal()
  }

  /// Last error tagged with this request, terminal or not.
  pub fn last_error(&self) -> Option<ErrorRecord> {
    self.shared.last_error.lock().clone()
  }

  /// Blocking iterator over events. Ends when the request is terminal and
  /// every queued event was consumed.
  pub fn events(&self) -> ChannelIter<'_, T> {
    ChannelIter { channel: self, timeout: None }
  }

  /// Waits up to `timeout` for the next event.
  pub fn try_next(&self, timeout: Duration) -> Option<ChannelEvent<T>> {
    self.shared.pop(Some(Instant::now() + timeout))
  }

  /// Events already queued, without blocking.
  pub fn collect_available(&self) -> Vec<ChannelEvent<T>> {
    self.shared.drain()
  }

  /// Gathers every message until the request ends.
  ///
  /// Returns the messages on `Completed`. On `Errored` returns the terminal
  /// error, on `Cancelled` returns [`MuxError::Cancelled`]. If `timeout`
  /// elapses first, returns [`MuxError::Timeout`]; the request keeps running
  /// and the caller must cancel it to release its slot.
  pub fn collect_until_done(&self, timeout: Duration) -> Result<Vec<T>, MuxError> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    loop {
      match self.shared.pop(Some(deadline)) {
        Some(ChannelEvent::Message(m)) => out.push(m),
        Some(ChannelEvent::Error(e)) => debug!("Request {}: {}", self.request_id(), e),
        None => break,
      }
    }
    // A producer may push and finish between the last pop and here.
    let (rest, state) = self.shared.drain_with_state();
    for event in rest {
      match event {
        ChannelEvent::Message(m) => out.push(m),
        ChannelEvent::Error(e) => debug!("Request {}: {}", self.request_id(), e),
      }
    }
    match state {
      ChannelState::Completed => Ok(out),
      ChannelState::Cancelled => Err(MuxError::Cancelled(self.request_id())),
      ChannelState::Errored => Err(self.last_error().map(MuxError::from).unwrap_or_else(|| {
        MuxError::InternalError(format!("Request {} errored without an error record", self.request_id()))
      })),
      ChannelState::Idle | ChannelState::Active => Err(MuxError::Timeout(format!(
        "Request {} not finished after {:?}", self.request_id(), timeout))),
    }
  }

  /// Ask the owning manager to cancel this request.
  pub fn cancel(&self) -> Result<(), MuxError> {
    if self.is_terminal() {
      return Ok(());
    }
    match self.shared.owner.upgrade() {
      Some(owner) => owner.cancel_request(self.request_id()),
      None => {
        // Manager gone: nothing can deliver to us any more.
        self.shared.finish(ChannelState::Cancelled);
        Err(MuxError::InternalError("Manager unavailable for cancel".to_string()))
      }
    }
  }
}

impl<T: Send + 'static> std::fmt::Debug for RequestChannel<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RequestChannel")
      .field("req_id", &self.request_id())
      .field("state", &self.state())
      .finish()
  }
}

impl<T: Send + 'static> Drop for RequestChannel<T> {
  fn drop(&mut self) {
    if !self.is_terminal() {
      if let Err(e) = self.cancel() {
        error!("Drop: Error cancelling request {}: {:?}", self.request_id(), e);
      }
    }
  }
}

/// Blocking iterator returned by [`RequestChannel::events`].
pub struct ChannelIter<'a, T: Send + 'static> {
  channel: &'a RequestChannel<T>,
  timeout: Option<Duration>,
}

impl<'a, T: Send + 'static> ChannelIter<'a, T> {
  /// Stop iterating if no event arrives within `timeout`.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  /// Yield only messages, skipping non-terminal errors.
  pub fn messages(self) -> impl Iterator<Item = T> + 'a {
    self.filter_map(|e| match e {
      ChannelEvent::Message(m) => Some(m),
      ChannelEvent::Error(_) => None,
    })
  }
}

impl<'a, T: Send + 'static> Iterator for ChannelIter<'a, T> {
  type Item = ChannelEvent<T>;

  fn next(&mut self) -> Option<Self::Item> {
    self.channel.shared.pop(self.timeout.map(|t| Instant::now() + t))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::thread;

  struct CountingOwner {
    cancels: AtomicUsize,
    shared: Mutex<Option<Arc<ChannelShared<u32>>>>,
  }

  impl ChannelOwner for CountingOwner {
    fn cancel_request(&self, _req_id: RequestId) -> Result<(), MuxError> {
      self.cancels.fetch_add(1, Ordering::SeqCst);
      if let Some(s) = self.shared.lock().as_ref() {
        s.finish(ChannelState::Cancelled);
      }
      Ok(())
    }
  }

  fn make() -> (Arc<CountingOwner>, Arc<ChannelShared<u32>>, RequestChannel<u32>) {
    let owner = Arc::new(CountingOwner { cancels: AtomicUsize::new(0), shared: Mutex::new(None) });
    let weak: Weak<dyn ChannelOwner> = Arc::downgrade(&(owner.clone() as Arc<dyn ChannelOwner>));
    let shared = ChannelShared::new(7, weak);
    *owner.shared.lock() = Some(shared.clone());
    let channel = RequestChannel::new(shared.clone());
    (owner, shared, channel)
  }

  fn warning(code: i32) -> ErrorRecord {
    ErrorRecord::new(Some(7), code, "warn")
  }

  #[test]
  fn test_messages_then_completion() {
    let (_owner, shared, channel) = make();
    assert_eq!(channel.state(), ChannelState::Idle);
    assert!(shared.activate());
    assert!(!shared.activate());
    shared.push_message(1);
    shared.push_message(2);
    assert!(shared.finish(ChannelState::Completed));
    assert!(!shared.finish(ChannelState::Errored));
    assert!(!shared.push_message(3));
    assert_eq!(channel.collect_until_done(Duration::from_millis(10)), Ok(vec![1, 2]));
    assert_eq!(channel.state(), ChannelState::Completed);
  }

  #[test]
  fn test_collect_keeps_messages_queued_before_completion() {
    let (_owner, shared, channel) = make();
    shared.activate();
    shared.push_message(10);
    shared.push_error(warning(2176), false);
    shared.push_message(11);
    shared.finish(ChannelState::Completed);
    assert_eq!(channel.collect_until_done(Duration::ZERO), Ok(vec![10, 11]));

    let (_owner, shared, _channel) = make();
    shared.activate();
    shared.push_message(12);
    shared.finish(ChannelState::Completed);
    assert_eq!(shared.drain_with_state(), (vec![ChannelEvent::Message(12)], ChannelState::Completed));
  }

  #[test]
  fn test_warning_does_not_terminate() {
    let (_owner, shared, channel) = make();
    shared.activate();
    shared.push_error(warning(2176), false);
    shared.push_message(5);
    assert_eq!(channel.state(), ChannelState::Active);
    let events = channel.collect_available();
    assert_eq!(events, vec![ChannelEvent::Error(warning(2176)), ChannelEvent::Message(5)]);
    assert_eq!(channel.last_error().map(|e| e.code), Some(2176));
    shared.finish(ChannelState::Completed);
  }

  #[test]
  fn test_terminal_error() {
    let (_owner, shared, channel) = make();
    shared.activate();
    shared.push_error(ErrorRecord::new(Some(7), 162, "no data"), true);
    assert_eq!(channel.state(), ChannelState::Errored);
    assert_eq!(channel.collect_until_done(Duration::from_millis(10)), Err(MuxError::ApiError(162, "no data".to_string())));
  }

  #[test]
  fn test_consumer_blocks_until_push() {
    let (_owner, shared, channel) = make();
    shared.activate();
    let producer = {
      let shared = shared.clone();
      thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        shared.push_message(42);
        shared.finish(ChannelState::Completed);
      })
    };
    let got: Vec<u32> = channel.events().messages().collect();
    producer.join().unwrap();
    assert_eq!(got, vec![42]);
  }

  #[test]
  fn test_timeout_leaves_request_running() {
    let (owner, shared, channel) = make();
    shared.activate();
    assert!(channel.try_next(Duration::from_millis(5)).is_none());
    assert!(matches!(channel.collect_until_done(Duration::from_millis(5)), Err(MuxError::Timeout(_))));
    assert_eq!(channel.state(), ChannelState::Active);
    drop(channel);
    assert_eq!(owner.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(shared.state(), ChannelState::Cancelled);
  }

  #[test]
  fn test_cancel_clears_queue_and_is_idempotent() {
    let (owner, shared, channel) = make();
    shared.activate();
    shared.push_message(1);
    channel.cancel().unwrap();
    channel.cancel().unwrap();
    assert_eq!(owner.cancels.load(Ordering::SeqCst), 1);
    assert!(channel.events().next().is_none());
    assert_eq!(channel.collect_until_done(Duration::from_millis(5)), Err(MuxError::Cancelled(7)));
  }
}
