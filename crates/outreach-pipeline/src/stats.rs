use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running counters. Relaxed ordering: lost or reordered updates are acceptable.
#[derive(Debug, Default)]
pub struct PipelineStats {
    observed: AtomicU64,
    admitted: AtomicU64,
    duplicates: AtomicU64,
    filtered_out: AtomicU64,
    persisted: AtomicU64,
    persist_failed: AtomicU64,
    dispatch_attempted: AtomicU64,
    messages_sent: AtomicU64,
    dry_run_messages: AtomicU64,
    send_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub observed: u64,
    pub admitted: u64,
    pub duplicates: u64,
    pub filtered_out: u64,
    pub persisted: u64,
    pub persist_failed: u64,
    pub dispatch_attempted: u64,
    pub messages_sent: u64,
    pub dry_run_messages: u64,
    pub send_failures: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Counter {
    Observed,
    Admitted,
    Duplicate,
    FilteredOut,
    Persisted,
    PersistFailed,
    DispatchAttempted,
    MessageSent,
    DryRunMessage,
    SendFailure,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(&self, counter: Counter) {
        let cell = match counter {
            Counter::Observed => &self.observed,
            Counter::Admitted => &self.admitted,
            Counter::Duplicate => &self.duplicates,
            Counter::FilteredOut => &self.filtered_out,
            Counter::Persisted => &self.persisted,
            Counter::PersistFailed => &self.persist_failed,
            Counter::DispatchAttempted => &self.dispatch_attempted,
            Counter::MessageSent => &self.messages_sent,
            Counter::DryRunMessage => &self.dry_run_messages,
            Counter::SendFailure => &self.send_failures,
        };
        cell.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |cell: &AtomicU64| cell.load(Ordering::Relaxed);
        StatsSnapshot {
            observed: load(&self.observed),
            admitted: load(&self.admitted),
            duplicates: load(&self.duplicates),
            filtered_out: load(&self.filtered_out),
            persisted: load(&self.persisted),
            persist_failed: load(&self.persist_failed),
            dispatch_attempted: load(&self.dispatch_attempted),
            messages_sent: load(&self.messages_sent),
            dry_run_messages: load(&self.dry_run_messages),
            send_failures: load(&self.send_failures),
        }
    }
}
