//! Session state and single-flight session renewal.
//!
//! When the server reports an expired session, every request that saw the
//! signal goes through [`SessionCoordinator::renew`]. The first one becomes
//! the leader and performs the renewal call; the rest queue up as waiters and
//! receive the leader's outcome in registration order. The renewal call runs
//! on a spawned task, so a caller dropping its request never cancels it. The
//! waiter queue belongs to a single round and is drained before the
//! coordinator goes back to idle.

use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};

use super::types::User;
use crate::error::RenewalError;

/// Receives the session-cleared notification when renewal fails.
pub trait SessionStore: Send + Sync {
  fn clear(&self);
}

/// In-process session state, observable by any component holding a clone.
#[derive(Clone)]
pub struct SessionState {
  tx: Arc<watch::Sender<Option<User>>>,
}

impl SessionState {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(None);
    Self { tx: Arc::new(tx) }
  }

  pub fn set_user(&self, user: Option<User>) {
    self.tx.send_replace(user);
  }

  pub fn current(&self) -> Option<User> {
    self.tx.borrow().clone()
  }

  pub fn is_authenticated(&self) -> bool {
    self.tx.borrow().is_some()
  }

  /// Watch for login/logout transitions.
  pub fn subscribe(&self) -> watch::Receiver<Option<User>> {
    self.tx.subscribe()
  }
}

impl Default for SessionState {
  fn default() -> Self {
    Self::new()
  }
}

impl SessionStore for SessionState {
  fn clear(&self) {
    if self.tx.send_replace(None).is_some() {
      tracing::info!("session cleared");
    }
  }
}

/// Performs the actual renewal call.
pub trait Renewer: Send + Sync {
  fn renew(&self) -> BoxFuture<'_, Result<(), RenewalError>>;
}

type Waiter = oneshot::Sender<Result<(), RenewalError>>;

enum Phase {
  Idle,
  Renewing { waiters: VecDeque<Waiter> },
}

/// State shared between callers and the renewal task.
struct Shared {
  phase: Mutex<Phase>,
  store: Arc<dyn SessionStore>,
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, Phase> {
    self
      .phase
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Return to idle and hand back the waiters of the finished round.
  fn take_waiters(&self) -> VecDeque<Waiter> {
    match std::mem::replace(&mut *self.lock(), Phase::Idle) {
      Phase::Renewing { waiters } => waiters,
      Phase::Idle => VecDeque::new(),
    }
  }
}

pub struct SessionCoordinator {
  shared: Arc<Shared>,
  renewer: Arc<dyn Renewer>,
}

impl SessionCoordinator {
  pub fn new(renewer: Arc<dyn Renewer>, store: Arc<dyn SessionStore>) -> Self {
    Self {
      shared: Arc::new(Shared {
        phase: Mutex::new(Phase::Idle),
        store,
      }),
      renewer,
    }
  }

  pub fn is_renewing(&self) -> bool {
    matches!(*self.shared.lock(), Phase::Renewing { .. })
  }

  /// Number of callers, the one that started the round included, parked
  /// behind the in-flight renewal.
  pub fn waiting(&self) -> usize {
    match &*self.shared.lock() {
      Phase::Renewing { waiters } => waiters.len(),
      Phase::Idle => 0,
    }
  }

  /// Renew the session, or wait for the renewal already in flight.
  ///
  /// The renewal call runs on its own task, so it completes and reaches every
  /// waiter even if the caller that started it goes away.
  pub async fn renew(&self) -> Result<(), RenewalError> {
    let (tx, rx) = oneshot::channel();
    let starts_round = {
      let mut phase = self.shared.lock();
      match &mut *phase {
        Phase::Idle => {
          *phase = Phase::Renewing {
            waiters: VecDeque::from([tx]),
          };
          true
        }
        Phase::Renewing { waiters } => {
          waiters.push_back(tx);
          false
        }
      }
    };

    if starts_round {
      tracing::info!("session expired, renewing");
      let mut round = Round {
        shared: Arc::clone(&self.shared),
        settled: false,
      };
      let renewer = Arc::clone(&self.renewer);
      tokio::spawn(async move {
        let outcome = renewer.renew().await;
        round.settle(&outcome);
      });
    } else {
      tracing::debug!("session renewal in flight, waiting");
    }

    rx.await
      .unwrap_or_else(|_| Err(RenewalError::new(None, "session renewal was abandoned")))
  }
}

/// One renewal round, owned by the renewal task. Dropping it unsettled (the
/// renewer panicked or the runtime shut down) resets the coordinator and
/// fails the waiters.
struct Round {
  shared: Arc<Shared>,
  settled: bool,
}

impl Round {
  fn settle(&mut self, outcome: &Result<(), RenewalError>) {
    self.settled = true;
    let waiters = self.shared.take_waiters();

    match outcome {
      Ok(()) => tracing::info!(waiters = waiters.len(), "session renewed"),
      Err(e) => {
        tracing::warn!(waiters = waiters.len(), error = %e, "session renewal failed");
        self.shared.store.clear();
      }
    }

    for waiter in waiters {
      // A waiter whose caller went away has nothing to replay
      let _ = waiter.send(outcome.clone());
    }
  }
}

impl Drop for Round {
  fn drop(&mut self) {
    if !self.settled {
      let abandoned = self.shared.take_waiters();
      tracing::error!(waiters = abandoned.len(), "session renewal abandoned");
    }
  }
}
