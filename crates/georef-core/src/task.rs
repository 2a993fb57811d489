//! Background execution of [`resample`] with progress and cooperative
//! cancellation.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use log::{debug, warn};

use crate::error::{GeorefError, Result};
use crate::image::RasterImage;
use crate::resample::{resample, ResampleOutcome, ResampleParams};
use crate::{ControlPoint, GeoTransform};

/// Lifecycle of a resample task. Only `Running` emits progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResampleState {
    Idle = 0,
    Running = 1,
    Completed = 2,
    Cancelled = 3,
    Failed = 4,
}

impl ResampleState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Cancelled,
            4 => Self::Failed,
            _ => Self::Idle,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Shared cancellation flag, checked between chunks.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Inputs owned by a background resample. The transform is a snapshot; a
/// later refit does not affect a job already in flight.
#[derive(Clone)]
pub struct ResampleJob {
    pub source: RasterImage,
    pub transform: Arc<dyn GeoTransform>,
    pub gcps: Vec<ControlPoint>,
    pub params: ResampleParams,
}

/// Finite, non-restartable sequence of progress percentages. Ends when the
/// worker finishes.
#[derive(Debug)]
pub struct Progress {
    rx: Option<mpsc::Receiver<f64>>,
}

impl Iterator for Progress {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        let rx = self.rx.as_ref()?;
        match rx.recv() {
            Ok(p) => Some(p),
            Err(_) => {
                self.rx = None;
                None
            }
        }
    }
}

/// Handle to a resample running on its own thread.
#[derive(Debug)]
pub struct ResampleTask {
    state: Arc<AtomicU8>,
    cancel: CancelToken,
    progress: Option<mpsc::Receiver<f64>>,
    worker: thread::JoinHandle<Result<ResampleOutcome>>,
}

impl ResampleTask {
    pub fn spawn(job: ResampleJob) -> Self {
        Self::spawn_with_token(job, CancelToken::new())
    }

    /// Spawn with an existing token, e.g. one the caller may already have
    /// cancelled.
    pub fn spawn_with_token(job: ResampleJob, cancel: CancelToken) -> Self {
        let state = Arc::new(AtomicU8::new(ResampleState::Idle as u8));
        let (tx, rx) = mpsc::channel();

        let worker = {
            let state = Arc::clone(&state);
            let cancel = cancel.clone();
            thread::spawn(move || {
                state.store(ResampleState::Running as u8, Ordering::Release);
                let ResampleJob {
                    source,
                    transform,
                    gcps,
                    params,
                } = job;
                let mut emit = |p: f64| {
                    let _ = tx.send(p);
                };
                let is_cancelled = || cancel.is_cancelled();
                let res = resample(
                    &source.view(),
                    transform.as_ref(),
                    &gcps,
                    &params,
                    &mut emit,
                    &is_cancelled,
                );
                let terminal = match &res {
                    Ok(ResampleOutcome::Completed(_)) => ResampleState::Completed,
                    Ok(ResampleOutcome::Cancelled) => ResampleState::Cancelled,
                    Err(e) => {
                        warn!("resample failed: {e}");
                        ResampleState::Failed
                    }
                };
                debug!("resample worker finished: {terminal:?}");
                state.store(terminal as u8, Ordering::Release);
                res
            })
        };

        Self {
            state,
            cancel,
            progress: Some(rx),
            worker,
        }
    }

    /// Request cancellation; takes effect at the next chunk boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> ResampleState {
        ResampleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Progress percentages. The first call takes the stream; later calls
    /// return an empty sequence.
    pub fn progress(&mut self) -> Progress {
        Progress {
            rx: self.progress.take(),
        }
    }

    /// Block until the worker finishes.
    pub fn result(self) -> Result<ResampleOutcome> {
        match self.worker.join() {
            Ok(res) => res,
            Err(_) => {
                self.state.store(ResampleState::Failed as u8, Ordering::Release);
                Err(GeorefError::WorkerPanicked)
            }
        }
    }
}
