//! OS thread priority and pool sizing helpers.

use std::convert::TryFrom;

use once_cell::sync::Lazy;
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};

static CORE_COUNT: Lazy<usize> = Lazy::new(|| num_cpus::get().max(1));

/// Get the default worker count, one thread per available CPU core.
pub fn default_threads() -> usize {
    *CORE_COUNT
}

/// OS-level scheduling priority applied to a worker thread when it starts.
///
/// This is a hint to the OS scheduler, nothing more: the pool makes no
/// fairness or ordering guarantees based on it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Priority {
    Lowest,
    Low,
    Normal,
    High,
    Highest,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Apply `priority` to the calling thread.
///
/// Best effort: raising priority is commonly denied to unprivileged
/// processes, and a worker left at default scheduling still works.
pub(crate) fn set_priority(priority: Priority) {
    let target = match priority {
        Priority::Lowest => Some(ThreadPriority::Min),
        Priority::Low => crossplatform(20),
        Priority::Normal => None,
        Priority::High => crossplatform(80),
        Priority::Highest => Some(ThreadPriority::Max),
    };

    if let Some(target) = target {
        let _ = set_current_thread_priority(target);
    }
}

fn crossplatform(value: u8) -> Option<ThreadPriority> {
    ThreadPriorityValue::try_from(value)
        .ok()
        .map(ThreadPriority::Crossplatform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_least_one_default_thread() {
        assert!(default_threads() >= 1);
    }

    #[test]
    fn set_priority_never_panics() {
        for priority in [
            Priority::Lowest,
            Priority::Low,
            Priority::Normal,
            Priority::High,
            Priority::Highest,
        ] {
            set_priority(priority);
        }
    }
}
