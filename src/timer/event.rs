use crate::timing::context;

use super::Timer;

/// An in-flight timed event.
///
/// Starting the event pushes onto this thread's timing context when the
/// timer (or an enclosing one) is collecting request timings. `end` and
/// `end_with_error` record the duration and pop the context. An event
/// dropped without being ended is recorded as an error.
///
/// Events must end on the thread that started them.
#[must_use = "an event records nothing until it is ended or dropped"]
pub struct TimedEvent<'a, T: Timer> {
    timer: &'a T,
    start_nanos: u64,
    pushed: bool,
    done: bool,
}

impl<'a, T: Timer> TimedEvent<'a, T> {
    pub(super) fn start(timer: &'a T) -> Self {
        let pushed = context::push(timer.metric_ref());
        Self {
            timer,
            start_nanos: timer.metric_ref().clock().nanos(),
            pushed,
            done: false,
        }
    }

    /// Whether this event is part of a collected request timing.
    pub fn is_collecting(&self) -> bool {
        self.pushed
    }

    pub fn end(mut self) {
        self.finish(true);
    }

    pub fn end_with_error(mut self) {
        self.finish(false);
    }

    fn finish(&mut self, success: bool) {
        if self.done {
            return;
        }
        self.done = true;
        self.timer.add_event_since(success, self.start_nanos);
        if self.pushed {
            context::pop();
        }
    }
}

impl<T: Timer> Drop for TimedEvent<'_, T> {
    fn drop(&mut self) {
        self.finish(false);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::timer::{TimedMetric, Timer};
    use crate::timing::RequestTimingSink;

    #[test]
    fn dropped_event_counts_as_error() {
        let timer = TimedMetric::new("svc", Arc::new(RequestTimingSink::new(4)));
        {
            let _event = timer.start_event();
        }
        assert_eq!(timer.error_stats().count, 1);
        assert_eq!(timer.success_stats().count, 0);
    }

    #[test]
    fn nested_events_produce_request_timing() {
        let sink = Arc::new(RequestTimingSink::new(4));
        let outer = TimedMetric::new("outer", Arc::clone(&sink));
        let inner = TimedMetric::new("inner", Arc::clone(&sink));
        outer.metric_ref().set_request_timing_collection(1);

        let a = outer.start_event();
        assert!(a.is_collecting());
        let b = inner.start_event();
        assert!(b.is_collecting());
        b.end();
        a.end();

        let timings = sink.drain();
        assert_eq!(timings.len(), 1);
        assert_eq!(timings[0].entries.len(), 2);
        assert_eq!(timings[0].entries[0].metric_name, "outer");
        assert_eq!(timings[0].entries[1].depth, 1);

        // collection count exhausted: nothing more is captured
        let c = outer.start_event();
        assert!(!c.is_collecting());
        c.end();
        assert!(sink.is_empty());
        assert_eq!(outer.success_stats().count, 2);
    }
}
