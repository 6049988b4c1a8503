//! Task event notification.
//!
//! The engine reports every status change and output line through a
//! [`Notifier`]. [`EventBus`] fans them out in-process; embedders wire their
//! own implementation to forward events elsewhere.

use runbook_types::TaskEvent;
use tokio::sync::broadcast;

/// Receives task events as they happen.
///
/// Called from the scheduler task; implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: TaskEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: TaskEvent) {}
}

const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out of task events over a broadcast channel.
///
/// Slow subscribers observe `RecvError::Lagged` rather than slowing the
/// engine down.
pub struct EventBus {
    sender: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier for EventBus {
    fn notify(&self, event: TaskEvent) {
        // Err only means nobody is subscribed.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runbook_types::{TaskId, TaskStatus, now};

    #[tokio::test]
    async fn test_bus_delivers_to_each_subscriber() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let task_id = TaskId::new();
        bus.notify(TaskEvent::StatusChanged {
            task_id,
            status: TaskStatus::Running,
            at: now(),
        });

        assert_eq!(a.recv().await.unwrap().task_id(), task_id);
        assert_eq!(b.recv().await.unwrap().task_id(), task_id);
    }

    #[test]
    fn test_notify_without_subscribers() {
        let bus = EventBus::default();
        bus.notify(TaskEvent::StatusChanged {
            task_id: TaskId::new(),
            status: TaskStatus::Stopped,
            at: now(),
        });
        NullNotifier.notify(TaskEvent::StatusChanged {
            task_id: TaskId::new(),
            status: TaskStatus::Stopped,
            at: now(),
        });
    }
}
