//! Lifecycle guard for the process-wide asset cache.
//!
//! The gate is the only writer of the cache's presence. It moves through
//! `Absent -> Building -> Ready`; the first caller that finds it absent
//! starts the build, and every caller arriving while the build runs is
//! queued and released in arrival order once the cache is published.
//! Invalidation moves a ready gate back to `Absent`; one arriving during a
//! build marks it stale, so its result is handed to the queued callers but
//! not published.

use std::mem;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::cache::{AssetCache, CacheBuilder};
use crate::error::{BuildError, GateError};
use crate::logging;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    Absent,
    Building,
    Ready,
}

impl GateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GateStatus::Absent => "absent",
            GateStatus::Building => "building",
            GateStatus::Ready => "ready",
        }
    }
}

pub type FailureHook = Arc<dyn Fn(&BuildError) + Send + Sync>;

type Waiter = oneshot::Sender<Result<Arc<AssetCache>, GateError>>;

enum State {
    Absent,
    Building { waiters: Vec<Waiter>, stale: bool },
    Ready(Arc<AssetCache>),
}

pub struct CacheGate {
    state: Mutex<State>,
    builder: CacheBuilder,
    on_failure: Mutex<FailureHook>,
}

impl CacheGate {
    pub fn new(builder: CacheBuilder) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Absent),
            builder,
            on_failure: Mutex::new(Arc::new(exit_process)),
        })
    }

    /// Replaces the action taken when a build fails. The default logs and
    /// exits the process.
    pub fn set_failure_hook(&self, hook: FailureHook) {
        *self.on_failure.lock().expect("cache gate hook") = hook;
    }

    pub fn status(&self) -> GateStatus {
        match &*self.state.lock().expect("cache gate") {
            State::Absent => GateStatus::Absent,
            State::Building { .. } => GateStatus::Building,
            State::Ready(_) => GateStatus::Ready,
        }
    }

    /// The published cache, if the gate is ready.
    pub fn current(&self) -> Option<Arc<AssetCache>> {
        match &*self.state.lock().expect("cache gate") {
            State::Ready(cache) => Some(Arc::clone(cache)),
            _ => None,
        }
    }

    /// Resolves to the ready cache, starting a build if none exists and
    /// none is in flight.
    pub async fn acquire(self: &Arc<Self>) -> Result<Arc<AssetCache>, GateError> {
        let rx = {
            let mut state = self.state.lock().expect("cache gate");
            match &mut *state {
                State::Ready(cache) => return Ok(Arc::clone(cache)),
                State::Building { waiters, .. } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
                State::Absent => {
                    let (tx, rx) = oneshot::channel();
                    *state = State::Building {
                        waiters: vec![tx],
                        stale: false,
                    };
                    self.start_build();
                    rx
                }
            }
        };
        rx.await.unwrap_or(Err(GateError::Abandoned))
    }

    /// Drops a ready cache so the next request rebuilds it. A build in
    /// flight may already have read the old sources, so it finishes for its
    /// waiters and the gate returns to `Absent` instead of `Ready`.
    pub fn invalidate(&self) -> bool {
        let mut state = self.state.lock().expect("cache gate");
        match &mut *state {
            State::Ready(_) => {
                *state = State::Absent;
                log::info!("asset cache invalidated");
                true
            }
            State::Building { stale, .. } => {
                *stale = true;
                log::info!("asset cache invalidated during build, result will not be kept");
                true
            }
            State::Absent => false,
        }
    }

    fn start_build(self: &Arc<Self>) {
        let gate = Arc::clone(self);
        log::info!("asset cache build started");
        tokio::spawn(async move {
            let result = gate.builder.build().await;
            gate.complete(result);
        });
    }

    fn complete(&self, result: Result<AssetCache, BuildError>) {
        let (waiters, outcome) = {
            let mut state = self.state.lock().expect("cache gate");
            let (waiters, stale) = match mem::replace(&mut *state, State::Absent) {
                State::Building { waiters, stale } => (waiters, stale),
                _ => (Vec::new(), false),
            };
            let outcome = match result {
                Ok(cache) => {
                    let cache = Arc::new(cache);
                    if stale {
                        log::info!("asset cache build superseded, next request rebuilds");
                    } else {
                        *state = State::Ready(Arc::clone(&cache));
                    }
                    Ok(cache)
                }
                Err(err) => Err(err),
            };
            (waiters, outcome)
        };

        match outcome {
            Ok(cache) => {
                metrics::record_build(true);
                for waiter in waiters {
                    let _ = waiter.send(Ok(Arc::clone(&cache)));
                }
            }
            Err(err) => {
                metrics::record_build(false);
                log::error!("asset cache build failed: {err}");
                let hook = Arc::clone(&*self.on_failure.lock().expect("cache gate hook"));
                hook(&err);
                let err = GateError::BuildFailed(err.to_string());
                for waiter in waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
            }
        }
    }
}

fn exit_process(err: &BuildError) {
    log::error!("unrecoverable asset read, exiting: {err}");
    logging::flush();
    std::process::exit(1);
}
