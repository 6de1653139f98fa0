//! Chunked replies
//!
//! A turn owns an ordered list of posted messages. [`ReplyReconciler`] maps
//! final content onto that list by editing, creating and deleting messages;
//! [`FlushTimer`] keeps the primary message showing the tail of the stream
//! until the final pass runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channels::{MessageChannel, ReplyHandle};
use crate::config::ReplyConfig;
use crate::error::Result;
use crate::utils::string::{chunk_chars, suffix_chars};

/// Operations issued by one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub edited: usize,
    pub created: usize,
    pub deleted: usize,
}

/// Maps content onto a sequence of reply messages.
#[derive(Debug, Clone)]
pub struct ReplyReconciler {
    chunk_size: usize,
    delay: Duration,
}

impl ReplyReconciler {
    pub fn new(chunk_size: usize, delay: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            delay,
        }
    }

    pub fn from_config(config: &ReplyConfig) -> Self {
        Self::new(
            config.chunk_size,
            Duration::from_millis(config.edit_interval_ms),
        )
    }

    /// Pieces the content is delivered as; never empty.
    pub fn plan(&self, content: &str) -> Vec<String> {
        let chunks = chunk_chars(content, self.chunk_size);
        if chunks.is_empty() {
            vec![String::new()]
        } else {
            chunks
        }
    }

    /// Bring `handles` in line with `content`.
    ///
    /// Existing handles are edited in place, missing ones are created through
    /// `channel` and appended, surplus ones are deleted and removed. Operations
    /// run one at a time with the configured delay between them.
    pub async fn reconcile(
        &self,
        handles: &mut Vec<Arc<dyn ReplyHandle>>,
        channel: &dyn MessageChannel,
        content: &str,
    ) -> Result<ReconcileStats> {
        let chunks = self.plan(content);
        let target = chunks.len();
        let mut stats = ReconcileStats::default();
        let mut first = true;

        for (i, chunk) in chunks.iter().enumerate() {
            self.pace(&mut first).await;
            match handles.get(i) {
                Some(handle) => {
                    handle.edit(chunk).await?;
                    stats.edited += 1;
                }
                None => {
                    let handle = channel.send(chunk).await?;
                    handles.push(handle);
                    stats.created += 1;
                }
            }
        }

        while handles.len() > target {
            self.pace(&mut first).await;
            if let Some(handle) = handles.pop() {
                handle.delete().await?;
                stats.deleted += 1;
            }
        }

        debug!(
            target,
            edited = stats.edited,
            created = stats.created,
            deleted = stats.deleted,
            "Reply reconciled"
        );
        Ok(stats)
    }

    async fn pace(&self, first: &mut bool) {
        if *first {
            *first = false;
        } else if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Periodic live-preview edits of the primary reply.
///
/// Every interval, if the watched content changed and is not empty, the
/// handle is edited to the last `chunk_size` characters. The task is
/// aborted when the timer is dropped.
pub struct FlushTimer {
    task: Option<JoinHandle<()>>,
}

impl FlushTimer {
    pub fn spawn(
        handle: Arc<dyn ReplyHandle>,
        mut content: watch::Receiver<String>,
        interval: Duration,
        chunk_size: usize,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match content.has_changed() {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(_) => return,
                }
                let text = content.borrow_and_update().clone();
                if text.is_empty() {
                    continue;
                }
                if let Err(e) = handle.edit(suffix_chars(&text, chunk_size)).await {
                    warn!(message_id = %handle.id(), "Live preview edit failed: {}", e);
                }
            }
        });
        Self { task: Some(task) }
    }

    /// Stop the timer and wait until no edit can still be in flight.
    pub async fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct RecordingHandle {
        id: String,
        log: Log,
    }

    #[async_trait]
    impl ReplyHandle for RecordingHandle {
        fn id(&self) -> &str {
            &self.id
        }

        async fn edit(&self, text: &str) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("edit {} {}", self.id, text.chars().count()));
            Ok(())
        }

        async fn delete(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("delete {}", self.id));
            Ok(())
        }
    }

    struct RecordingChannel {
        log: Log,
        next: AtomicUsize,
    }

    impl RecordingChannel {
        fn new(log: Log) -> Self {
            Self {
                log,
                next: AtomicUsize::new(100),
            }
        }

        fn handles(&self, n: usize) -> Vec<Arc<dyn ReplyHandle>> {
            (0..n)
                .map(|i| {
                    Arc::new(RecordingHandle {
                        id: format!("h{}", i),
                        log: Arc::clone(&self.log),
                    }) as Arc<dyn ReplyHandle>
                })
                .collect()
        }
    }

    #[async_trait]
    impl MessageChannel for RecordingChannel {
        async fn send(&self, text: &str) -> Result<Arc<dyn ReplyHandle>> {
            let id = format!("h{}", self.next.fetch_add(1, Ordering::SeqCst));
            self.log
                .lock()
                .unwrap()
                .push(format!("send {} {}", id, text.chars().count()));
            Ok(Arc::new(RecordingHandle {
                id,
                log: Arc::clone(&self.log),
            }))
        }
    }

    fn reconciler() -> ReplyReconciler {
        ReplyReconciler::new(2000, Duration::ZERO)
    }

    #[test]
    fn test_plan_minimum_one() {
        let r = reconciler();
        assert_eq!(r.plan(""), vec![String::new()]);
        assert_eq!(r.plan("abc").len(), 1);
        assert_eq!(r.plan(&"x".repeat(2000)).len(), 1);
        assert_eq!(r.plan(&"x".repeat(2001)).len(), 2);
    }

    #[tokio::test]
    async fn test_grow_creates_missing() {
        let log: Log = Arc::default();
        let channel = RecordingChannel::new(Arc::clone(&log));
        let mut handles = channel.handles(1);

        let stats = reconciler()
            .reconcile(&mut handles, &channel, &"a".repeat(4500))
            .await
            .unwrap();

        assert_eq!(handles.len(), 3);
        assert_eq!(
            stats,
            ReconcileStats {
                edited: 1,
                created: 2,
                deleted: 0
            }
        );
        let log = log.lock().unwrap();
        assert_eq!(log[0], "edit h0 2000");
        assert_eq!(log[1], "send h100 2000");
        assert_eq!(log[2], "send h101 500");
    }

    #[tokio::test]
    async fn test_shrink_deletes_surplus() {
        let log: Log = Arc::default();
        let channel = RecordingChannel::new(Arc::clone(&log));
        let mut handles = channel.handles(3);

        let stats = reconciler()
            .reconcile(&mut handles, &channel, "short")
            .await
            .unwrap();

        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].id(), "h0");
        assert_eq!(stats.deleted, 2);
        assert_eq!(stats.created, 0);
        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["edit h0 5", "delete h2", "delete h1"]);
    }

    #[tokio::test]
    async fn test_same_size_only_edits() {
        let log: Log = Arc::default();
        let channel = RecordingChannel::new(Arc::clone(&log));
        let mut handles = channel.handles(2);

        let stats = reconciler()
            .reconcile(&mut handles, &channel, &"é".repeat(3000))
            .await
            .unwrap();
        assert_eq!(stats.edited, 2);
        assert_eq!(handles.len(), 2);
        assert_eq!(log.lock().unwrap()[1], "edit h1 1000");
    }

    #[tokio::test]
    async fn test_flush_timer_edits_tail_and_stops_on_drop() {
        let log: Log = Arc::default();
        let handle: Arc<dyn ReplyHandle> = Arc::new(RecordingHandle {
            id: "h0".into(),
            log: Arc::clone(&log),
        });
        let (tx, rx) = watch::channel(String::new());

        let timer = FlushTimer::spawn(Arc::clone(&handle), rx, Duration::from_millis(10), 4);
        tx.send_replace("abcdefgh".to_string());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(log.lock().unwrap().iter().any(|op| op == "edit h0 4"));

        timer.cancel().await;
        let before = log.lock().unwrap().len();
        tx.send_replace("more content".to_string());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(log.lock().unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_flush_timer_skips_unchanged() {
        let log: Log = Arc::default();
        let handle: Arc<dyn ReplyHandle> = Arc::new(RecordingHandle {
            id: "h0".into(),
            log: Arc::clone(&log),
        });
        let (tx, rx) = watch::channel(String::new());
        let _timer = FlushTimer::spawn(handle, rx, Duration::from_millis(5), 2000);

        tx.send_replace("hi".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
