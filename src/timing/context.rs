//! Thread-confined stack of in-flight timed operations.
//!
//! Nothing here is shared between threads; only the assembled
//! [`RequestTiming`](super::RequestTiming) leaves the thread, through the
//! top-level metric's sink. Every successful `push` must be paired with
//! exactly one `pop` on the same thread.

use std::cell::RefCell;
use std::sync::Arc;

use super::{MetricRef, RequestTiming, TimingEntry};
use crate::stats::clock::wall_time;

struct OpenEntry {
    depth: u16,
    metric: Arc<MetricRef>,
    start_nanos: u64,
    attributes: Vec<(String, String)>,
}

struct ThreadContext {
    top: Arc<MetricRef>,
    external_id: Option<String>,
    stack: Vec<OpenEntry>,
    completed: Vec<TimingEntry>,
}

impl ThreadContext {
    fn new(top: &Arc<MetricRef>) -> Self {
        Self {
            top: Arc::clone(top),
            external_id: None,
            stack: Vec::with_capacity(8),
            completed: Vec::with_capacity(8),
        }
    }

    /// Every entry of one request is timed by the clock of the metric
    /// that opened it.
    fn now_nanos(&self) -> u64 {
        self.top.clock().nanos()
    }

    fn push(&mut self, metric: &Arc<MetricRef>) {
        self.stack.push(OpenEntry {
            depth: u16::try_from(self.stack.len()).unwrap_or(u16::MAX),
            metric: Arc::clone(metric),
            start_nanos: self.now_nanos(),
            attributes: Vec::new(),
        });
    }

    fn finish(self) {
        let mut timing = RequestTiming::new(
            self.top.name().to_string(),
            self.external_id,
            self.completed,
        );
        timing.report_time = wall_time(self.top.clock().as_ref());
        self.top.complete_request();
        tracing::debug!(
            metric = %timing.top_metric,
            entries = timing.entries.len(),
            "request timing assembled"
        );
        self.top.sink().add(timing);
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<ThreadContext>> = const { RefCell::new(None) };
}

/// Start timing `metric` on this thread.
///
/// Opens a new context when `metric` is collecting, nests under the
/// active context when there is one, and otherwise does nothing. Returns
/// whether an entry was pushed.
pub fn push(metric: &Arc<MetricRef>) -> bool {
    CONTEXT.with(|cell| {
        let mut slot = cell.borrow_mut();
        match slot.as_mut() {
            Some(ctx) => {
                ctx.push(metric);
                true
            }
            None if metric.is_collecting() => {
                let mut ctx = ThreadContext::new(metric);
                ctx.push(metric);
                *slot = Some(ctx);
                true
            }
            None => false,
        }
    })
}

/// Push only as a child of an already active context.
pub fn push_if_active(metric: &Arc<MetricRef>) -> bool {
    CONTEXT.with(|cell| match cell.borrow_mut().as_mut() {
        Some(ctx) => {
            ctx.push(metric);
            true
        }
        None => false,
    })
}

/// Close the most recently pushed entry. Closing the outermost entry
/// completes the request.
///
/// Calling `pop` without a matching `push` is a programming error: it
/// panics in debug builds and is ignored otherwise.
pub fn pop() {
    let finished = CONTEXT.with(|cell| {
        let mut slot = cell.borrow_mut();
        let ctx = slot.as_mut()?;
        let end_nanos = ctx.now_nanos();
        let open = ctx.stack.pop()?;
        ctx.completed.push(TimingEntry {
            depth: open.depth,
            metric_name: open.metric.name().to_string(),
            start_nanos: open.start_nanos,
            end_nanos,
            attributes: open.attributes,
        });
        if ctx.stack.is_empty() {
            slot.take()
        } else {
            None
        }
    });

    match finished {
        Some(ctx) => ctx.finish(),
        None => debug_assert!(is_active(), "pop() without a matching push()"),
    }
}

/// Whether a request is being collected on this thread.
pub fn is_active() -> bool {
    CONTEXT.with(|cell| cell.borrow().is_some())
}

/// Current nesting depth (0 when inactive).
pub fn depth() -> usize {
    CONTEXT.with(|cell| cell.borrow().as_ref().map_or(0, |ctx| ctx.stack.len()))
}

/// Tag the active request with an id from outside the process, e.g. a
/// request header. No-op when inactive.
pub fn set_external_id(id: impl Into<String>) {
    CONTEXT.with(|cell| {
        if let Some(ctx) = cell.borrow_mut().as_mut() {
            ctx.external_id = Some(id.into());
        }
    });
}

/// Attach a key/value to the innermost open entry. No-op when inactive.
pub fn attribute(key: impl Into<String>, value: impl Into<String>) {
    CONTEXT.with(|cell| {
        if let Some(open) = cell.borrow_mut().as_mut().and_then(|ctx| ctx.stack.last_mut()) {
            open.attributes.push((key.into(), value.into()));
        }
    });
}
