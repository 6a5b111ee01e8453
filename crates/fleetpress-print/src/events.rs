// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Broadcast bus for fleet notifications.
//
// Publishing never blocks and never fails: with no subscribers the event is
// dropped, and a subscriber that falls more than the channel capacity behind
// sees `RecvError::Lagged` instead of slowing the engine down.  Every
// subscriber observes events in publication order.

use tokio::sync::broadcast;
use tracing::trace;

use fleetpress_core::events::FleetEvent;

/// Buffered events per subscriber.
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FleetEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: FleetEvent) {
        trace!(event = event.name(), "publishing fleet event");
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
