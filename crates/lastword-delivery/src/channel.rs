//! Delivery channel contract.
//!
//! External infrastructure (email, SMS, webhook providers) implements
//! [`ChannelAdapter`]. The orchestrator picks the adapter registered for a
//! recipient's channel and applies the adapter's own timeout to every call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use lastword_core::{Blake3Hash, Channel, MessageId, RecipientId, Timestamp};

/// Default per-attempt timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// What is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// The released message content.
    Release,
    /// A content-free notice to a dissolution plan's backup contact.
    BackupContactNotice,
}

/// A payload handed to a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryContent {
    pub kind: ContentKind,
    pub message_id: MessageId,
    /// `None` for notices.
    pub recipient_id: Option<RecipientId>,
    pub body: Bytes,
    /// Integrity digest of `body` for releases.
    pub digest: Option<Blake3Hash>,
}

impl DeliveryContent {
    /// Released content for one recipient.
    pub fn release(
        message_id: MessageId,
        recipient_id: RecipientId,
        body: Bytes,
        digest: Blake3Hash,
    ) -> Self {
        Self {
            kind: ContentKind::Release,
            message_id,
            recipient_id: Some(recipient_id),
            body,
            digest: Some(digest),
        }
    }

    /// Notice that a message's deadline was extended. Carries no content.
    pub fn backup_contact_notice(message_id: MessageId, extended_until: Timestamp) -> Self {
        Self {
            kind: ContentKind::BackupContactNotice,
            message_id,
            recipient_id: None,
            body: Bytes::from(format!(
                "A message you are listed as backup contact for has missed its check-in. \
                 Its release has been postponed until {} (Unix ms).",
                extended_until
            )),
            digest: None,
        }
    }
}

/// Result of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The provider accepted the message.
    Sent,
    /// Transient failure; the attempt may be retried.
    Failed(String),
}

impl SendOutcome {
    /// Whether the provider accepted the message.
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

/// Adapter for one delivery channel.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The channel this adapter serves.
    fn channel(&self) -> Channel;

    /// Per-attempt timeout. An attempt that exceeds it counts as failed.
    fn timeout(&self) -> Duration {
        DEFAULT_SEND_TIMEOUT
    }

    /// Send `content` to `destination`.
    async fn send(&self, destination: &str, content: &DeliveryContent) -> SendOutcome;
}

/// Adapters by channel.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for its channel.
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.channel(), adapter);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// The adapter for `channel`.
    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel)
    }

    /// Send through the adapter for `channel`, enforcing its timeout.
    pub async fn send(
        &self,
        channel: Channel,
        destination: &str,
        content: &DeliveryContent,
    ) -> SendOutcome {
        let Some(adapter) = self.get(channel) else {
            return SendOutcome::Failed(format!("no adapter for {}", channel.as_str()));
        };
        let timeout = adapter.timeout();
        match tokio::time::timeout(timeout, adapter.send(destination, content)).await {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::Failed(format!("timed out after {:?}", timeout)),
        }
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.adapters.keys()).finish()
    }
}

/// In-memory adapters for tests and local runs.
pub mod memory {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A send the adapter received.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentRecord {
        pub destination: String,
        pub content: DeliveryContent,
    }

    #[derive(Debug, Clone)]
    enum Behavior {
        Outcome(SendOutcome),
        /// Never completes; only the timeout ends the attempt.
        Hang,
    }

    /// Scriptable in-memory adapter.
    ///
    /// Per-destination scripts are consumed first, then the default
    /// behavior applies. Every call is recorded, including failed ones.
    pub struct MemoryChannel {
        channel: Channel,
        timeout: Duration,
        default: Behavior,
        scripts: Mutex<HashMap<String, VecDeque<SendOutcome>>>,
        calls: Mutex<Vec<SentRecord>>,
    }

    impl MemoryChannel {
        fn with_default(channel: Channel, default: Behavior) -> Self {
            Self {
                channel,
                timeout: DEFAULT_SEND_TIMEOUT,
                default,
                scripts: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Accepts everything.
        pub fn accepting(channel: Channel) -> Self {
            Self::with_default(channel, Behavior::Outcome(SendOutcome::Sent))
        }

        /// Fails everything with `reason`.
        pub fn failing(channel: Channel, reason: impl Into<String>) -> Self {
            Self::with_default(channel, Behavior::Outcome(SendOutcome::Failed(reason.into())))
        }

        /// Never answers.
        pub fn hanging(channel: Channel) -> Self {
            Self::with_default(channel, Behavior::Hang)
        }

        /// Override the per-attempt timeout.
        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }

        /// Queue outcomes for one destination.
        pub fn script(
            self,
            destination: impl Into<String>,
            outcomes: impl IntoIterator<Item = SendOutcome>,
        ) -> Self {
            lock(&self.scripts)
                .entry(destination.into())
                .or_default()
                .extend(outcomes);
            self
        }

        /// Every call received so far.
        pub fn calls(&self) -> Vec<SentRecord> {
            lock(&self.calls).clone()
        }

        /// Calls received for one destination.
        pub fn calls_to(&self, destination: &str) -> usize {
            lock(&self.calls)
                .iter()
                .filter(|c| c.destination == destination)
                .count()
        }
    }

    fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        m.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[async_trait]
    impl ChannelAdapter for MemoryChannel {
        fn channel(&self) -> Channel {
            self.channel
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        async fn send(&self, destination: &str, content: &DeliveryContent) -> SendOutcome {
            lock(&self.calls).push(SentRecord {
                destination: destination.to_string(),
                content: content.clone(),
            });

            let scripted = lock(&self.scripts)
                .get_mut(destination)
                .and_then(|q| q.pop_front());
            let behavior = match scripted {
                Some(outcome) => Behavior::Outcome(outcome),
                None => self.default.clone(),
            };

            match behavior {
                Behavior::Outcome(outcome) => outcome,
                Behavior::Hang => std::future::pending().await,
            }
        }
    }
}
