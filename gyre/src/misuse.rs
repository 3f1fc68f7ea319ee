//! Shared-resource misuse detection.
//!
//! Some gyre types are heavyweight shared resources: an [`EventLoop`]
//! owns a worker thread and is meant to serve many channels. Creating one
//! per connection is almost always a bug that ends in thread exhaustion.
//! [`MisuseDetector`] counts live instances per resource type and warns
//! once when the count crosses a threshold.
//!
//! [`EventLoop`]: crate::EventLoop

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::warn;

const MAX_ACTIVE_INSTANCES: usize = 256;

/// Per-type counter of live shared-resource instances.
///
/// The resource type is identified by a compile-time label so the detector
/// can be a `static` next to the type it guards:
///
/// ```
/// use gyre::MisuseDetector;
///
/// static DETECTOR: MisuseDetector = MisuseDetector::new("MyResource");
///
/// DETECTOR.increase();
/// // ... resource lifetime ...
/// DETECTOR.decrease();
/// ```
pub struct MisuseDetector {
    label: &'static str,
    active: AtomicUsize,
    logged: AtomicBool,
}

impl MisuseDetector {
    /// Creates a detector for the resource type named by `label`.
    pub const fn new(label: &'static str) -> Self {
        Self {
            label,
            active: AtomicUsize::new(0),
            logged: AtomicBool::new(false),
        }
    }

    /// Records a new live instance, warning once past the threshold.
    pub fn increase(&self) {
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        if active > MAX_ACTIVE_INSTANCES && !self.logged.swap(true, Ordering::AcqRel) {
            warn!(
                "you are creating too many {} instances ({} active); {} is a shared resource \
                 that should be reused across the application",
                self.label, active, self.label
            );
        }
    }

    /// Records that an instance went away.
    pub fn decrease(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    /// Current number of live instances.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_instances() {
        static DETECTOR: MisuseDetector = MisuseDetector::new("TestResource");

        assert_eq!(DETECTOR.active(), 0);
        DETECTOR.increase();
        DETECTOR.increase();
        assert_eq!(DETECTOR.active(), 2);
        DETECTOR.decrease();
        assert_eq!(DETECTOR.active(), 1);
        DETECTOR.decrease();
        assert_eq!(DETECTOR.active(), 0);
    }

    #[test]
    fn warns_only_once_past_threshold() {
        static DETECTOR: MisuseDetector = MisuseDetector::new("NoisyResource");

        for _ in 0..MAX_ACTIVE_INSTANCES + 8 {
            DETECTOR.increase();
        }
        assert!(DETECTOR.logged.load(Ordering::Acquire));
        for _ in 0..MAX_ACTIVE_INSTANCES + 8 {
            DETECTOR.decrease();
        }
        assert_eq!(DETECTOR.active(), 0);
    }
}
