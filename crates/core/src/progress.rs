use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    Start { name: String },
    Advance { percent: Option<i32> },
    Finish,
}

/// Receives progress events; returning `true` requests cancellation.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) -> bool + Send + Sync>;

/// Polled cancellation capability shared by the mask and rasterization
/// passes.
pub trait Interrupter: Sync {
    fn start(&self, _name: &str) {}
    fn end(&self) {}
    fn was_interrupted(&self, percent: Option<i32>) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullInterrupter;

impl Interrupter for NullInterrupter {
    fn was_interrupted(&self, _percent: Option<i32>) -> bool {
        false
    }
}

#[derive(Clone, Debug, Default)]
pub struct FlagInterrupter {
    flag: Arc<AtomicBool>,
}

impl FlagInterrupter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

impl Interrupter for FlagInterrupter {
    fn was_interrupted(&self, _percent: Option<i32>) -> bool {
        self.is_cancelled()
    }
}

pub struct CallbackInterrupter {
    sink: ProgressSink,
    cancelled: AtomicBool,
}

impl CallbackInterrupter {
    pub fn new(sink: ProgressSink) -> Self {
        Self {
            sink,
            cancelled: AtomicBool::new(false),
        }
    }
}

impl Interrupter for CallbackInterrupter {
    fn start(&self, name: &str) {
        if (self.sink)(ProgressEvent::Start {
            name: name.to_string(),
        }) {
            self.cancelled.store(true, Ordering::Relaxed);
        }
    }

    fn end(&self) {
        (self.sink)(ProgressEvent::Finish);
    }

    fn was_interrupted(&self, percent: Option<i32>) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        let cancel = (self.sink)(ProgressEvent::Advance { percent });
        if cancel {
            self.cancelled.store(true, Ordering::Relaxed);
        }
        cancel
    }
}

/// Cooperative early-exit shared by the tasks of one pass. Once any task sees
/// the interrupter fire, every later poll reports cancellation without asking
/// the interrupter again.
pub(crate) struct CancelGroup<'a> {
    interrupter: Option<&'a dyn Interrupter>,
    cancelled: AtomicBool,
}

impl<'a> CancelGroup<'a> {
    pub(crate) fn new(interrupter: Option<&'a dyn Interrupter>) -> Self {
        Self {
            interrupter,
            cancelled: AtomicBool::new(false),
        }
    }

    pub(crate) fn poll(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        match self.interrupter {
            Some(interrupter) if interrupter.was_interrupted(None) => {
                self.cancelled.store(true, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn callback_interrupter_latches_cancellation() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        let sink: ProgressSink = Arc::new(move |event| {
            let mut seen = seen.lock().expect("events lock");
            seen.push(event);
            seen.len() >= 3
        });
        let interrupter = CallbackInterrupter::new(sink);
        interrupter.start("pass");
        assert!(!interrupter.was_interrupted(Some(10)));
        assert!(interrupter.was_interrupted(Some(20)));
        assert!(interrupter.was_interrupted(Some(30)));
        assert_eq!(events.lock().expect("events lock").len(), 3);
    }

    #[test]
    fn cancel_group_sticks_after_first_hit() {
        let flag = FlagInterrupter::new();
        let group = CancelGroup::new(Some(&flag));
        assert!(!group.poll());
        flag.cancel();
        assert!(group.poll());
        assert!(group.is_cancelled());
    }
}
