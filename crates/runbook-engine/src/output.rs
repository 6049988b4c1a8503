//! Output fan-out: persist each line, then forward it to live listeners.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use runbook_types::{OutputLine, TaskEvent, TaskId};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::notify::Notifier;
use crate::store::RecordStore;

struct Listener {
    id: u64,
    tx: mpsc::Sender<OutputLine>,
}

/// Registry of live output listeners keyed by task.
///
/// Publishing never waits on a listener: one whose buffer is full is
/// disconnected and its stream ends.
pub struct OutputBroadcaster {
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    listeners: Mutex<HashMap<TaskId, Vec<Listener>>>,
    buffer: usize,
    next_id: AtomicU64,
}

impl OutputBroadcaster {
    pub fn new(store: Arc<dyn RecordStore>, notifier: Arc<dyn Notifier>, buffer: usize) -> Self {
        Self {
            store,
            notifier,
            listeners: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append `line` to the record store, then forward it.
    ///
    /// A line the store rejected is not forwarded, so listeners never see
    /// anything that is not persisted.
    pub fn publish(&self, line: OutputLine) -> StoreResult<()> {
        self.store.append_output(&line)?;
        self.forward(&line);
        self.notifier.notify(TaskEvent::OutputAppended { line });
        Ok(())
    }

    fn forward(&self, line: &OutputLine) {
        let mut listeners = self.listeners.lock();
        let Some(task_listeners) = listeners.get_mut(&line.task_id) else {
            return;
        };

        task_listeners.retain(|listener| match listener.tx.try_send(line.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    task_id = %line.task_id,
                    listener = listener.id,
                    "Output listener fell behind; disconnecting"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        if task_listeners.is_empty() {
            listeners.remove(&line.task_id);
        }
    }

    /// Register a listener for lines published after this call.
    pub fn subscribe(&self, task_id: TaskId) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.listeners
            .lock()
            .entry(task_id)
            .or_default()
            .push(Listener { id, tx });
        debug!(task_id = %task_id, listener = id, "Output listener subscribed");
        Subscription { task_id, id, rx }
    }

    /// Remove a listener. Its stream ends after any buffered lines.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        let mut listeners = self.listeners.lock();
        if let Some(task_listeners) = listeners.get_mut(&subscription.task_id) {
            task_listeners.retain(|l| l.id != subscription.id);
            if task_listeners.is_empty() {
                listeners.remove(&subscription.task_id);
            }
        }
    }

    /// Close every listener of `task_id`.
    pub fn close(&self, task_id: TaskId) {
        if let Some(closed) = self.listeners.lock().remove(&task_id) {
            debug!(task_id = %task_id, count = closed.len(), "Closed output listeners");
        }
    }

    pub fn listener_count(&self, task_id: TaskId) -> usize {
        self.listeners.lock().get(&task_id).map_or(0, Vec::len)
    }
}

/// A live output stream for one task.
#[derive(Debug)]
pub struct Subscription {
    task_id: TaskId,
    id: u64,
    rx: mpsc::Receiver<OutputLine>,
}

impl Subscription {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Next line, or `None` once the listener is closed and drained.
    pub async fn recv(&mut self) -> Option<OutputLine> {
        self.rx.recv().await
    }

    /// An already-finished stream.
    pub(crate) fn closed(task_id: TaskId) -> Self {
        let (_, rx) = mpsc::channel(1);
        Self { task_id, id: 0, rx }
    }
}

impl Stream for Subscription {
    type Item = OutputLine;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::EventBus;
    use crate::store::MemoryRecordStore;
    use futures::StreamExt;
    use runbook_types::TaskSpec;

    fn setup(buffer: usize) -> (Arc<MemoryRecordStore>, OutputBroadcaster, TaskId) {
        let store = Arc::new(MemoryRecordStore::new());
        let task = store.create_task(TaskSpec::default()).unwrap();
        let broadcaster =
            OutputBroadcaster::new(store.clone(), Arc::new(EventBus::default()), buffer);
        (store, broadcaster, task.id)
    }

    #[tokio::test]
    async fn test_publish_persists_and_forwards() {
        let (store, broadcaster, task_id) = setup(8);
        let mut a = broadcaster.subscribe(task_id);
        let mut b = broadcaster.subscribe(task_id);

        broadcaster.publish(OutputLine::new(task_id, "first")).unwrap();
        broadcaster.publish(OutputLine::new(task_id, "second")).unwrap();
        broadcaster.close(task_id);

        let persisted: Vec<_> = store.get_output(task_id).unwrap().into_iter().map(|l| l.text).collect();
        let seen_a: Vec<_> = (&mut a).map(|l| l.text).collect().await;
        let mut seen_b = Vec::new();
        while let Some(line) = b.recv().await {
            seen_b.push(line.text);
        }
        assert_eq!(persisted, vec!["first", "second"]);
        assert_eq!(seen_a, persisted);
        assert_eq!(seen_b, persisted);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_only_new_lines() {
        let (_store, broadcaster, task_id) = setup(8);
        broadcaster.publish(OutputLine::new(task_id, "before")).unwrap();

        let mut sub = broadcaster.subscribe(task_id);
        broadcaster.publish(OutputLine::new(task_id, "after")).unwrap();
        broadcaster.close(task_id);

        assert_eq!(sub.recv().await.unwrap().text, "after");
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_listener_is_disconnected() {
        let (store, broadcaster, task_id) = setup(2);
        let mut slow = broadcaster.subscribe(task_id);

        for i in 0..5 {
            broadcaster
                .publish(OutputLine::new(task_id, format!("line {i}")))
                .unwrap();
        }

        // Publisher never blocked; every line persisted.
        assert_eq!(store.get_output(task_id).unwrap().len(), 5);
        assert_eq!(broadcaster.listener_count(task_id), 0);

        // The listener keeps what fit in its buffer, then its stream ends.
        assert_eq!(slow.recv().await.unwrap().text, "line 0");
        assert_eq!(slow.recv().await.unwrap().text, "line 1");
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_listener() {
        let (_store, broadcaster, task_id) = setup(8);
        let keep = broadcaster.subscribe(task_id);
        let mut gone = broadcaster.subscribe(task_id);
        assert_eq!(broadcaster.listener_count(task_id), 2);

        broadcaster.unsubscribe(&gone);
        assert_eq!(broadcaster.listener_count(task_id), 1);
        broadcaster.publish(OutputLine::new(task_id, "x")).unwrap();
        assert!(gone.recv().await.is_none());
        drop(keep);
    }

    #[tokio::test]
    async fn test_dropped_subscription_pruned_on_publish() {
        let (_store, broadcaster, task_id) = setup(8);
        drop(broadcaster.subscribe(task_id));

        broadcaster.publish(OutputLine::new(task_id, "x")).unwrap();
        assert_eq!(broadcaster.listener_count(task_id), 0);
    }

    #[tokio::test]
    async fn test_rejected_line_not_forwarded() {
        let (_store, broadcaster, _task_id) = setup(8);
        let unknown = TaskId::new();
        let mut sub = broadcaster.subscribe(unknown);

        assert!(broadcaster.publish(OutputLine::new(unknown, "orphan")).is_err());
        broadcaster.close(unknown);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_emits_event() {
        let store = Arc::new(MemoryRecordStore::new());
        let task = store.create_task(TaskSpec::default()).unwrap();
        let bus = Arc::new(EventBus::default());
        let mut events = bus.subscribe();
        let broadcaster = OutputBroadcaster::new(store, bus, 8);

        broadcaster.publish(OutputLine::new(task.id, "hi")).unwrap();
        match events.recv().await.unwrap() {
            TaskEvent::OutputAppended { line } => assert_eq!(line.text, "hi"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
