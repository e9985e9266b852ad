use crate::core::context::{RequestContext, TxId};
use crate::core::error::StoreResult;
use crate::store::TransactionalStore;
use log::{debug, error, warn};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

static PAYOUT_LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();

/// Which mutual-exclusion discipline an executor applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    Transaction,
    ProcessLock,
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discipline::Transaction => f.write_str("transaction"),
            Discipline::ProcessLock => f.write_str("process-lock"),
        }
    }
}

/// An open transaction, abandoned on drop unless it settled first.
struct OpenTransaction<'a> {
    store: &'a dyn TransactionalStore,
    tx: TxId,
    settled: bool,
}

impl Drop for OpenTransaction<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("transaction {} dropped before it settled", self.tx);
            self.store.abandon(self.tx);
        }
    }
}

/// Runs a critical section atomically.
///
/// The discipline is fixed when the executor is built: a native store
/// transaction when the store supports one, otherwise a process-wide lock
/// held for the whole section. A single call never mixes the two.
#[derive(Clone)]
pub enum AtomicExecutor {
    Transaction(Arc<dyn TransactionalStore>),
    ProcessLock(Arc<Mutex<()>>),
}

impl AtomicExecutor {
    pub fn for_store(store: Arc<dyn TransactionalStore>) -> Self {
        if store.supports_transactions() {
            AtomicExecutor::Transaction(store)
        } else {
            AtomicExecutor::ProcessLock(Self::process_lock())
        }
    }

    /// The lock shared by every lock-mode executor in this process.
    pub fn process_lock() -> Arc<Mutex<()>> {
        PAYOUT_LOCK
            .get_or_init(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn discipline(&self) -> Discipline {
        match self {
            AtomicExecutor::Transaction(_) => Discipline::Transaction,
            AtomicExecutor::ProcessLock(_) => Discipline::ProcessLock,
        }
    }

    /// Run `f` as one unit.
    ///
    /// In transaction mode `f` receives a context scoped to the transaction;
    /// an error from `f` (or from commit) rolls everything back, and so does
    /// dropping the returned future before it completes. In lock mode `f`
    /// runs with the lock held and receives the caller's context.
    pub async fn run<T, F, Fut>(&self, ctx: &RequestContext, f: F) -> StoreResult<T>
    where
        F: FnOnce(RequestContext) -> Fut + Send,
        Fut: Future<Output = StoreResult<T>> + Send,
        T: Send,
    {
        match self {
            AtomicExecutor::Transaction(store) => {
                let tx = store.begin(ctx).await?;
                let mut open = OpenTransaction {
                    store: store.as_ref(),
                    tx,
                    settled: false,
                };
                let scoped = ctx.in_transaction(tx);
                debug!("transaction {} opened", tx);

                let outcome = match f(scoped.clone()).await {
                    Ok(value) => store.commit(&scoped, tx).await.map(|_| value),
                    Err(e) => Err(e),
                };

                if let Err(e) = &outcome {
                    debug!("transaction {} failed: {}", tx, e);
                    if let Err(rb) = store.rollback(&scoped, tx).await {
                        error!("rollback of transaction {} failed: {}", tx, rb);
                    }
                }
                open.settled = true;
                outcome
            }
            AtomicExecutor::ProcessLock(lock) => {
                let _held = ctx.guard(lock.lock()).await?;
                f(ctx.clone()).await
            }
        }
    }
}

impl fmt::Debug for AtomicExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicExecutor")
            .field(&self.discipline())
            .finish()
    }
}
