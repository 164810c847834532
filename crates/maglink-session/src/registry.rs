//! The gateway registry and switch notifications.
//!
//! One gateway is "connected" at a time. Switching is an explicit external
//! operation, never part of the request path: the registry emits a
//! before-switch event, swaps the active identity atomically, then emits an
//! after-switch event so dependent components (HTTP client caches, socket
//! factories) can rebuild. In-flight requests against the old gateway are
//! not quiesced; callers own that.

use parking_lot::RwLock;
use tokio::sync::broadcast;

use maglink_core::GatewayIdentity;

/// Notifications emitted around a gateway switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Emitted before the active identity changes.
    BeforeSwitch {
        /// The identity being switched away from.
        from: GatewayIdentity,
        /// The identity being switched to.
        to: GatewayIdentity,
    },
    /// Emitted after the active identity changed.
    AfterSwitch {
        /// The identity that was switched away from.
        from: GatewayIdentity,
        /// The now-active identity.
        to: GatewayIdentity,
    },
}

/// Tracks the active gateway and broadcasts switches.
pub struct GatewayRegistry {
    active: RwLock<GatewayIdentity>,
    events: broadcast::Sender<GatewayEvent>,
}

impl GatewayRegistry {
    /// A registry connected to `initial`.
    #[must_use]
    pub fn new(initial: GatewayIdentity) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            active: RwLock::new(initial),
            events,
        }
    }

    /// The currently connected gateway.
    #[must_use]
    pub fn active(&self) -> GatewayIdentity {
        self.active.read().clone()
    }

    /// Subscribe to switch notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    /// Switch the active gateway to `to`.
    ///
    /// No-op if `to` is already active. Returns the previously active
    /// identity.
    pub fn switch(&self, to: GatewayIdentity) -> GatewayIdentity {
        let from = self.active();
        if from == to {
            return from;
        }

        // Send errors just mean nobody is subscribed.
        let _ = self.events.send(GatewayEvent::BeforeSwitch {
            from: from.clone(),
            to: to.clone(),
        });
        *self.active.write() = to.clone();
        let _ = self.events.send(GatewayEvent::AfterSwitch {
            from: from.clone(),
            to: to.clone(),
        });
        tracing::info!(%from, %to, "switched active gateway");
        from
    }
}
