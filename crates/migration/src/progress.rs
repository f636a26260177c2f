//! Explicit progress accumulator for the streaming passes.
//!
//! Each pass owns one of these and reports through it; there is no
//! shared global counter state. Progress lines are emitted as
//! structured `tracing` events so they stay machine parseable.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use serde::Serialize;
use tracing::info;

use crate::schema::RecordClass;

/// Emit a progress line every this many scanned records.
pub const REPORT_INTERVAL: u64 = 100_000;

#[derive(Debug)]
pub struct Progress {
    pass: &'static str,
    started: Instant,
    scanned: u64,
    written: u64,
    rejected_unknown: u64,
    rejected_malformed: u64,
    per_class: BTreeMap<RecordClass, u64>,
    estimated_total: Option<u64>,
    next_report_at: u64,
}

impl Progress {
    pub fn new(pass: &'static str, estimated_total: Option<u64>) -> Self {
        Self {
            pass,
            started: Instant::now(),
            scanned: 0,
            written: 0,
            rejected_unknown: 0,
            rejected_malformed: 0,
            per_class: BTreeMap::new(),
            estimated_total,
            next_report_at: REPORT_INTERVAL,
        }
    }

    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn rejected(&self) -> u64 {
        self.rejected_unknown + self.rejected_malformed
    }

    pub fn record_scanned(&mut self) {
        self.scanned += 1;
        if self.scanned >= self.next_report_at {
            self.next_report_at += REPORT_INTERVAL;
            self.report();
        }
    }

    pub fn record_written(&mut self, class: RecordClass) {
        self.written += 1;
        *self.per_class.entry(class).or_insert(0) += 1;
    }

    pub fn record_unknown(&mut self) {
        self.rejected_unknown += 1;
    }

    pub fn record_malformed(&mut self) {
        self.rejected_malformed += 1;
    }

    /// Fraction of scanned records that could not be classified.
    pub fn rejected_fraction(&self) -> f64 {
        if self.scanned == 0 {
            0.0
        } else {
            self.rejected() as f64 / self.scanned as f64
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Records per second since the pass started.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 { self.scanned as f64 / secs } else { 0.0 }
    }

    /// Remaining time estimate, when a total is known and we are moving.
    pub fn eta(&self) -> Option<Duration> {
        let total = self.estimated_total?;
        let remaining = total.saturating_sub(self.scanned);
        let rate = self.rate();
        if rate > 0.0 {
            Some(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            None
        }
    }

    fn report(&self) {
        info!(
            pass = self.pass,
            scanned = self.scanned,
            written = self.written,
            rejected = self.rejected(),
            elapsed_ms = self.elapsed().as_millis() as u64,
            rate_per_sec = self.rate() as u64,
            eta_secs = ?self.eta().map(|eta| eta.as_secs()),
            "progress"
        );
    }

    pub fn into_summary(self, last_committed_key: Option<Vec<u8>>, interrupted: bool) -> RunSummary {
        let per_class = self
            .per_class
            .iter()
            .map(|(class, count)| (class.as_str().to_owned(), *count))
            .collect();
        RunSummary {
            pass: self.pass,
            scanned: self.scanned,
            written: self.written,
            rejected_unknown: self.rejected_unknown,
            rejected_malformed: self.rejected_malformed,
            per_class,
            elapsed_ms: self.elapsed().as_millis() as u64,
            last_committed_key: last_committed_key.map(hex::encode),
            interrupted,
        }
    }
}

/// Final accounting for one pass, fit for human or JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub pass: &'static str,
    pub scanned: u64,
    pub written: u64,
    pub rejected_unknown: u64,
    pub rejected_malformed: u64,
    pub per_class: BTreeMap<String, u64>,
    pub elapsed_ms: u64,
    pub last_committed_key: Option<String>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn rejected(&self) -> u64 {
        self.rejected_unknown + self.rejected_malformed
    }
}
