//! Editor-thread tick loop and orderly shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use edl_protocol::EditorOperations;
use tracing::{info, warn};

use crate::executor::EditorExecutor;

/// Calls [`EditorExecutor::tick`] at a fixed interval on the current thread,
/// standing in for the editor's own frame tick.
pub struct TickDriver {
    interval: Duration,
    stop: Arc<AtomicBool>,
}

impl TickDriver {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that ends [`TickDriver::run`] when set from any thread.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Tick until stopped.
    pub fn run<E: EditorOperations>(&self, executor: &mut EditorExecutor<E>) {
        info!("Editor tick loop running every {} ms", self.interval.as_millis());
        while !self.stop.load(Ordering::SeqCst) {
            let started = Instant::now();
            executor.tick();
            std::thread::sleep(self.interval.saturating_sub(started.elapsed()));
        }
    }

    /// Keep ticking until all outstanding work has finished or `grace`
    /// elapses. Returns whether the executor went idle.
    pub fn drain<E: EditorOperations>(&self, executor: &mut EditorExecutor<E>, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            executor.tick();
            if executor.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(self.interval);
        }
    }

    /// Drain, then force-cancel whatever is left and mark the context stopped.
    pub fn shutdown<E: EditorOperations>(&self, executor: &mut EditorExecutor<E>, grace: Duration) {
        let context = executor.context().clone();
        context.begin_shutdown();

        if self.drain(executor, grace) {
            info!("All outstanding requests completed");
        } else {
            let cancelled = context.force_cancel_all();
            let abandoned = executor.abandon_all();
            warn!(
                "Drain grace of {} ms elapsed: {cancelled} request(s) cancelled, {abandoned} continuation(s) abandoned",
                grace.as_millis()
            );
        }
        context.mark_stopped();
    }
}
