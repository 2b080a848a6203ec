//! Per-wallet fan-out of payment events.
//!
//! Every terminal payment transition (invoice settled, outgoing payment
//! confirmed or failed) is published once and delivered to every current
//! subscriber of the affected wallet. Publishing never blocks: each wallet has
//! a bounded buffer, and a subscriber that falls behind loses its oldest
//! undelivered events while the most recent ones stay available.
//!
//! # Example
//!
//! ```no_run
//! use notifier::{EventState, Notifier, PaymentEvent};
//!
//! # async fn example() {
//! let notifier = Notifier::new(64);
//! let mut subscription = notifier.subscribe("wallet-1");
//!
//! notifier.publish(PaymentEvent::new("wallet-1", "ab12", EventState::Settled, 21_000, 0));
//!
//! if let Some(event) = subscription.recv().await {
//!     println!("{} -> {:?}", event.payment_hash, event.state);
//! }
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Terminal state a payment reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    /// Incoming invoice paid.
    Settled,
    /// Outgoing payment completed.
    Confirmed,
    /// Outgoing payment failed and was reversed.
    Failed,
}

/// A payment transition delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub wallet_id: String,
    pub payment_hash: String,
    pub state: EventState,
    pub amount_msat: i64,
    pub fee_msat: i64,
    /// Unix timestamp (seconds).
    pub timestamp: i64,
}

impl PaymentEvent {
    pub fn new(
        wallet_id: impl Into<String>,
        payment_hash: impl Into<String>,
        state: EventState,
        amount_msat: i64,
        fee_msat: i64,
    ) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            payment_hash: payment_hash.into(),
            state,
            amount_msat,
            fee_msat,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

type Channels = Mutex<HashMap<String, broadcast::Sender<PaymentEvent>>>;

struct Hub {
    channels: Channels,
    capacity: usize,
    closed: AtomicBool,
}

impl Hub {
    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<PaymentEvent>>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fan-out hub for payment events.
#[derive(Clone)]
pub struct Notifier {
    hub: Arc<Hub>,
}

impl Notifier {
    /// Create a notifier keeping at most `capacity` undelivered events per wallet.
    pub fn new(capacity: usize) -> Self {
        Self {
            hub: Arc::new(Hub {
                channels: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to a wallet's events. Only events published after this call
    /// are delivered.
    pub fn subscribe(&self, wallet_id: &str) -> Subscription {
        let mut channels = self.hub.channels();
        // Checked under the lock so a concurrent close() cannot miss this receiver.
        let receiver = if self.is_closed() {
            // Sender dropped immediately: the subscription ends on first recv.
            broadcast::channel(1).1
        } else {
            channels
                .entry(wallet_id.to_string())
                .or_insert_with(|| broadcast::channel(self.hub.capacity).0)
                .subscribe()
        };
        drop(channels);

        debug!(wallet_id = %wallet_id, "event subscription opened");

        Subscription {
            wallet_id: wallet_id.to_string(),
            receiver,
            hub: Arc::downgrade(&self.hub),
        }
    }

    /// Deliver an event to the wallet's current subscribers.
    ///
    /// Returns the number of subscribers that will see it. Never blocks.
    pub fn publish(&self, event: PaymentEvent) -> usize {
        let channels = self.hub.channels();
        let Some(sender) = channels.get(&event.wallet_id) else {
            return 0;
        };
        sender.send(event).unwrap_or(0)
    }

    /// Number of open subscriptions for a wallet.
    pub fn subscriber_count(&self, wallet_id: &str) -> usize {
        self.hub
            .channels()
            .get(wallet_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of wallets with at least one subscriber.
    pub fn wallet_count(&self) -> usize {
        self.hub.channels().len()
    }

    /// End every subscription. Later subscriptions end immediately.
    pub fn close(&self) {
        let mut channels = self.hub.channels();
        self.hub.closed.store(true, Ordering::SeqCst);
        channels.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.hub.closed.load(Ordering::SeqCst)
    }
}

/// A live subscription to one wallet's events.
///
/// Dropping it detaches from the notifier.
pub struct Subscription {
    wallet_id: String,
    receiver: broadcast::Receiver<PaymentEvent>,
    hub: Weak<Hub>,
}

impl Subscription {
    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    /// Next event, or `None` once the notifier is closed.
    ///
    /// If this subscriber fell behind, the skipped events are dropped and the
    /// oldest still-buffered event is returned.
    pub async fn recv(&mut self) -> Option<PaymentEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        wallet_id = %self.wallet_id,
                        skipped,
                        "slow event subscriber, dropped oldest events"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Turn the subscription into a stream of events.
    pub fn into_stream(self) -> impl Stream<Item = PaymentEvent> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|event| (event, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        let mut channels = hub.channels();
        // This receiver is still alive here, so a count of 1 means it was the last one.
        let last = channels
            .get(&self.wallet_id)
            .map(|sender| sender.receiver_count() <= 1)
            .unwrap_or(false);
        if last {
            channels.remove(&self.wallet_id);
            debug!(wallet_id = %self.wallet_id, "last event subscriber left");
        }
    }
}

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
