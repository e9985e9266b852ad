//! Per-request execution context.
//!
//! Carries the request clock, an optional deadline, an optional cancellation
//! signal and the id of the transaction the request is running under. Every
//! collaborator call receives one and checks it before touching state.

use crate::core::error::{StoreError, StoreResult};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Identifier of an open store transaction.
pub type TxId = u64;

#[derive(Debug, Clone)]
pub struct RequestContext {
    now: DateTime<Utc>,
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
    transaction: Option<TxId>,
}

/// Cancels every context cloned from the one it was created with.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace never fails, even with no live receivers
        self.tx.send_replace(true);
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}

impl RequestContext {
    /// No deadline, not cancellable, clock set to now.
    pub fn background() -> Self {
        Self {
            now: Utc::now(),
            deadline: None,
            cancel: None,
            transaction: None,
        }
    }

    /// Pin the request clock (tests, replays).
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attach a fresh cancellation signal.
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancel = Some(rx);
        (self, CancelHandle { tx })
    }

    pub(crate) fn in_transaction(&self, tx: TxId) -> Self {
        let mut scoped = self.clone();
        scoped.transaction = Some(tx);
        scoped
    }

    pub fn transaction(&self) -> Option<TxId> {
        self.transaction
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// UTC calendar date of the request clock.
    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Fail fast if the caller cancelled or the deadline passed.
    pub fn check(&self) -> StoreResult<()> {
        if self.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(StoreError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Run `fut` until it completes, the deadline passes or the context is
    /// cancelled, whichever comes first.
    pub async fn guard<F: Future>(&self, fut: F) -> StoreResult<F::Output> {
        self.check()?;

        let mut cancel = self.cancel.clone();
        let cancelled = async move {
            match cancel.as_mut() {
                Some(rx) => loop {
                    if *rx.borrow_and_update() {
                        break;
                    }
                    if rx.changed().await.is_err() {
                        // handle dropped without cancelling
                        std::future::pending::<()>().await;
                    }
                },
                None => std::future::pending::<()>().await,
            }
        };

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            out = fut => Ok(out),
            _ = cancelled => Err(StoreError::Cancelled),
            _ = expired => Err(StoreError::DeadlineExceeded),
        }
    }
}

/// Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - ChronoDuration::days(date.weekday().num_days_from_monday() as i64)
}
