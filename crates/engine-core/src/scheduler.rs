use crate::context::{EngineContext, TickAction};
use crate::error::EngineError;
use crossbeam::sync::{Parker, Unparker};
use engine_graph::Teardown;
use engine_rt::ControlEvent;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Handle to the realtime thread that drives an [`EngineContext`].
pub struct Scheduler {
    thread: Option<JoinHandle<(EngineContext, Teardown)>>,
    unparker: Unparker,
    stop: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn spawn(context: EngineContext, thread_name: &str) -> Result<Self, EngineError> {
        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name(thread_name.to_owned())
            .spawn(move || run(context, parker, &thread_stop))
            .map_err(EngineError::Spawn)?;
        tracing::debug!(thread = thread_name, "engine thread spawned");
        Ok(Self {
            thread: Some(thread),
            unparker,
            stop,
        })
    }

    /// Interrupts a readiness wait so new transactions apply promptly.
    pub fn wake(&self) {
        self.unparker.unpark();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Requests a stop at the next tick boundary and waits for the thread.
    pub fn stop(mut self) -> Result<(EngineContext, Teardown), EngineError> {
        self.join()
    }

    fn join(&mut self) -> Result<(EngineContext, Teardown), EngineError> {
        self.stop.store(true, Ordering::Release);
        self.unparker.unpark();
        let thread = self.thread.take().ok_or(EngineError::NotRunning)?;
        thread
            .join()
            .map_err(|payload| EngineError::ThreadPanicked(panic_message(payload.as_ref())))
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(err) = self.join() {
                tracing::error!("engine thread ended abnormally: {err}");
            }
        }
    }
}

fn run(mut context: EngineContext, parker: Parker, stop: &AtomicBool) -> (EngineContext, Teardown) {
    loop {
        context.apply_pending();
        if stop.load(Ordering::Acquire) {
            break;
        }
        match context.next_action() {
            TickAction::Process => context.process_block(),
            TickAction::Wait(timeout) => parker.park_timeout(timeout),
        }
    }
    let teardown = context.teardown();
    context.notifier().notify(ControlEvent::EngineStopped);
    (context, teardown)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
