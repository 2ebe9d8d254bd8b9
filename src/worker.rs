use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::feature_cache::FeatureCache;
use crate::pipeline::{self, RunOptions};
use crate::predictor::Predictor;
use crate::progress::{CancelToken, Progress};
use crate::report::RunReport;
use crate::store::MatchStore;

#[derive(Debug)]
pub enum WorkerEvent {
    Progress {
        step: &'static str,
        done: usize,
        total: usize,
    },
    Finished(Box<RunReport>),
    Cancelled,
    Failed(String),
}

pub struct BacktestHandle {
    events: Receiver<WorkerEvent>,
    cancel: CancelToken,
    join: JoinHandle<()>,
}

impl BacktestHandle {
    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn wait(self) -> WorkerEvent {
        let mut last = WorkerEvent::Failed("worker exited without a result".to_string());
        for event in self.events.iter() {
            if !matches!(event, WorkerEvent::Progress { .. }) {
                last = event;
            }
        }
        if self.join.join().is_err() {
            return WorkerEvent::Failed("worker panicked".to_string());
        }
        last
    }
}

pub fn spawn_backtest<S, P>(
    store: S,
    predictor: P,
    cache: Arc<FeatureCache>,
    cfg: EngineConfig,
    opts: RunOptions,
) -> BacktestHandle
where
    S: MatchStore + Send + 'static,
    P: Predictor + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();

    let join = thread::spawn(move || {
        let progress_tx: Sender<WorkerEvent> = tx.clone();
        let sink = move |p: Progress| {
            let _ = progress_tx.send(WorkerEvent::Progress {
                step: p.step,
                done: p.done,
                total: p.total,
            });
        };
        let res = pipeline::run_backtest(&store, &predictor, &cache, &cfg, &opts, &sink, &worker_cancel);
        let event = match res {
            Ok(report) => WorkerEvent::Finished(Box::new(report)),
            Err(err) if matches!(err.downcast_ref::<EngineError>(), Some(EngineError::Cancelled)) => {
                WorkerEvent::Cancelled
            }
            Err(err) => {
                warn!(error = %err, "background backtest failed");
                WorkerEvent::Failed(format!("{err:#}"))
            }
        };
        let _ = tx.send(event);
    });

    BacktestHandle {
        events: rx,
        cancel,
        join,
    }
}
