//! Fire-and-forget exposure reporting to an analytics collaborator.
//!
//! Reporters never block resolution and never retry. Delivery is best effort.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::experiments::token;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureReport {
    /// Analytics property the report belongs to.
    pub tracking_id: String,
    /// The experiment's external tracking id.
    pub experiment_id: String,
    pub experiment_name: String,
    pub variant_indexes: Vec<usize>,
    /// `{experimentId}.{i-j-...}`, the form analytics expects.
    pub exp: String,
}

impl ExposureReport {
    pub fn new(
        tracking_id: impl Into<String>,
        experiment_id: impl Into<String>,
        experiment_name: impl Into<String>,
        variant_indexes: Vec<usize>,
    ) -> Self {
        let experiment_id = experiment_id.into();
        let exp = token::encode(&experiment_id, &variant_indexes);
        Self {
            tracking_id: tracking_id.into(),
            experiment_id,
            experiment_name: experiment_name.into(),
            variant_indexes,
            exp,
        }
    }
}

pub trait Reporter: Send + Sync {
    fn report(&self, report: ExposureReport);
}

pub type SurfaceCallback = Arc<dyn Fn(&ExposureReport) + Send + Sync>;

#[derive(Default)]
struct DeferredState {
    ready: bool,
    pending: Vec<ExposureReport>,
    callbacks: Vec<SurfaceCallback>,
}

/// Holds reports until the rendering surface says it is ready and a callback
/// is registered, then hands them to the callbacks. Once both hold, reports go
/// out at once.
///
/// Callbacks run synchronously on the thread calling [`Reporter::report`],
/// which is the resolving request. They must return quickly; hand slow work to
/// a channel or task, or use [`ChannelReporter`] instead.
#[derive(Default)]
pub struct DeferredReporter {
    state: Mutex<DeferredState>,
}

impl DeferredReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeferredState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a callback. If the surface is already ready, anything still
    /// queued is delivered to it immediately.
    pub fn on_report<F>(&self, callback: F)
    where
        F: Fn(&ExposureReport) + Send + Sync + 'static,
    {
        let mut state = self.lock();
        state.callbacks.push(Arc::new(callback));
        Self::flush(state);
    }

    /// Mark the surface ready and flush everything queued so far. Reports stay
    /// queued while no callback is registered.
    pub fn surface_ready(&self) {
        let mut state = self.lock();
        state.ready = true;
        Self::flush(state);
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Deliver the queue if it can be delivered. Callbacks run after the lock
    /// is released.
    fn flush(mut state: MutexGuard<'_, DeferredState>) {
        if !state.ready || state.callbacks.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut state.pending);
        let callbacks = state.callbacks.clone();
        drop(state);
        for report in &pending {
            for callback in &callbacks {
                callback(report);
            }
        }
    }
}

impl Reporter for DeferredReporter {
    fn report(&self, report: ExposureReport) {
        let callbacks = {
            let mut state = self.lock();
            if !state.ready || state.callbacks.is_empty() {
                state.pending.push(report);
                return;
            }
            state.callbacks.clone()
        };
        for callback in &callbacks {
            callback(&report);
        }
    }
}

/// Pushes reports onto a bounded channel without waiting. Full or closed
/// channels drop the report.
#[derive(Clone)]
pub struct ChannelReporter {
    tx: mpsc::Sender<ExposureReport>,
}

impl ChannelReporter {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ExposureReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Reporter for ChannelReporter {
    fn report(&self, report: ExposureReport) {
        match self.tx.try_send(report) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(r)) => {
                tracing::debug!(experiment = %r.experiment_name, "report channel full, dropping exposure");
            }
            Err(mpsc::error::TrySendError::Closed(r)) => {
                tracing::debug!(experiment = %r.experiment_name, "report channel closed, dropping exposure");
            }
        }
    }
}
