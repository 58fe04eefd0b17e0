use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{fetcher::FetchError, range::DateRange, report::MediaStatReport};

/// A successfully fetched report together with the inputs that produced it.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub range: DateRange,
    pub media_key: String,
    pub report: MediaStatReport,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(range: DateRange, media_key: impl Into<String>, report: MediaStatReport) -> Self {
        Self {
            range,
            media_key: media_key.into(),
            report,
            fetched_at: Utc::now(),
        }
    }
}

/// Handle for one in-flight fetch. Only the newest ticket may update the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug, Clone, Default)]
pub struct View {
    pub snapshot: Option<Arc<Snapshot>>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    generation: u64,
    current: Option<Arc<Snapshot>>,
    error: Option<String>,
}

/// What the dashboard currently shows: the last good report plus the most
/// recent failure, if any.
#[derive(Debug, Default)]
pub struct DisplayState {
    inner: Mutex<Inner>,
}

impl DisplayState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a fetch, superseding any that are still outstanding.
    pub fn begin(&self) -> Ticket {
        let mut g = self.lock();
        g.generation += 1;
        Ticket(g.generation)
    }

    /// Installs `snapshot` and clears the error. Returns `false` if a newer
    /// fetch has started since `ticket` was issued.
    pub fn commit(&self, ticket: Ticket, snapshot: Snapshot) -> bool {
        let mut g = self.lock();
        if g.generation != ticket.0 {
            debug!(ticket = ticket.0, latest = g.generation, "dropping superseded report");
            return false;
        }
        info!(
            range = %snapshot.range,
            media_key = %snapshot.media_key,
            rows = snapshot.report.len(),
            "display updated"
        );
        g.current = Some(Arc::new(snapshot));
        g.error = None;
        true
    }

    /// Records a failed fetch. The last good snapshot stays on display.
    pub fn fail(&self, ticket: Ticket, err: &FetchError) -> bool {
        let mut g = self.lock();
        if g.generation != ticket.0 {
            debug!(ticket = ticket.0, latest = g.generation, "dropping superseded error");
            return false;
        }
        g.error = Some(err.to_string());
        true
    }

    pub fn view(&self) -> View {
        let g = self.lock();
        View {
            snapshot: g.current.clone(),
            error: g.error.clone(),
        }
    }
}
