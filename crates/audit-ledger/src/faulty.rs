//! Fault-injecting ledger wrapper for tests: scripted per-call failures and delays.

use audit_types::{Fields, Ledger, LedgerError, LedgerQuery, Row, TxId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What the next call does instead of (or around) delegating to the inner ledger.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail without touching the inner ledger.
    Fail(LedgerError),
    /// Sleep, then delegate. A caller that gives up during the sleep leaves no trace.
    DelayBefore(Duration),
    /// Delegate, then sleep before returning. A caller that gives up during the sleep has
    /// nevertheless committed.
    DelayAfter(Duration),
}

/// Wraps a ledger and replays a queue of faults, one per call. Calls with an empty queue delegate.
pub struct FaultyLedger<L> {
    inner: L,
    append_faults: Mutex<VecDeque<Fault>>,
    query_faults: Mutex<VecDeque<Fault>>,
    append_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl<L: Ledger> FaultyLedger<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            append_faults: Mutex::new(VecDeque::new()),
            query_faults: Mutex::new(VecDeque::new()),
            append_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    pub fn push_append_fault(&self, fault: Fault) -> &Self {
        if let Ok(mut q) = self.append_faults.lock() {
            q.push_back(fault);
        }
        self
    }

    pub fn push_query_fault(&self, fault: Fault) -> &Self {
        if let Ok(mut q) = self.query_faults.lock() {
            q.push_back(fault);
        }
        self
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    fn next(queue: &Mutex<VecDeque<Fault>>) -> Option<Fault> {
        queue.lock().ok().and_then(|mut q| q.pop_front())
    }
}

#[async_trait::async_trait]
impl<L: Ledger> Ledger for FaultyLedger<L> {
    async fn connect(&self) -> Result<(), LedgerError> {
        self.inner.connect().await
    }

    async fn select_namespace(&self, name: &str) -> Result<(), LedgerError> {
        self.inner.select_namespace(name).await
    }

    async fn append(&self, table: &str, fields: &Fields) -> Result<TxId, LedgerError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        match Self::next(&self.append_faults) {
            None => self.inner.append(table, fields).await,
            Some(Fault::Fail(e)) => Err(e),
            Some(Fault::DelayBefore(d)) => {
                tokio::time::sleep(d).await;
                self.inner.append(table, fields).await
            }
            Some(Fault::DelayAfter(d)) => {
                let res = self.inner.append(table, fields).await;
                tokio::time::sleep(d).await;
                res
            }
        }
    }

    async fn query(&self, query: &LedgerQuery) -> Result<Vec<Row>, LedgerError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        match Self::next(&self.query_faults) {
            None => self.inner.query(query).await,
            Some(Fault::Fail(e)) => Err(e),
            Some(Fault::DelayBefore(d)) => {
                tokio::time::sleep(d).await;
                self.inner.query(query).await
            }
            Some(Fault::DelayAfter(d)) => {
                let res = self.inner.query(query).await;
                tokio::time::sleep(d).await;
                res
            }
        }
    }
}
