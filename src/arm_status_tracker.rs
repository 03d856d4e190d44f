//! Arm Status Tracker
//!
//! Tracks the bus link state of each arm and reports transitions.
//! Only transitions are logged so a failing 10 Hz poll does not flood the log.
//!
//! `Degraded` and `Unconnected` both render as `connected: false`; the split
//! only tells "link was never up / was torn down" from "reads started failing".

use crate::models::Arm;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Link state of one arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmLinkState {
    /// No handle (never connected or torn down)
    Unconnected,
    /// Handle open and the last read succeeded
    Connected,
    /// Handle open but the last read failed
    Degraded,
}

/// Arm link transition event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmLinkEvent {
    /// Unconnected -> Connected
    Established,
    /// Connected -> Degraded
    Degraded,
    /// Degraded -> Connected
    Recovered,
    /// Connected/Degraded -> Unconnected
    TornDown,
}

#[derive(Debug, Clone, Copy)]
struct TrackerEntry {
    state: ArmLinkState,
    /// Consecutive failed reads
    failures: u32,
}

impl Default for TrackerEntry {
    fn default() -> Self {
        Self {
            state: ArmLinkState::Unconnected,
            failures: 0,
        }
    }
}

/// Tracks arm link state and detects transitions
pub struct ArmStatusTracker {
    entries: RwLock<HashMap<Arm, TrackerEntry>>,
}

impl ArmStatusTracker {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// A new bus handle was opened
    pub async fn record_connect(&self, arm: Arm) -> Option<ArmLinkEvent> {
        self.transition(arm, ArmLinkState::Connected).await
    }

    /// Outcome of one batched telemetry read
    pub async fn record_read(&self, arm: Arm, ok: bool) -> Option<ArmLinkEvent> {
        if ok {
            return self.transition(arm, ArmLinkState::Connected).await;
        }

        let mut entries = self.entries.write().await;
        let entry = entries.entry(arm).or_default();
        entry.failures = entry.failures.saturating_add(1);
        match entry.state {
            ArmLinkState::Connected => {
                entry.state = ArmLinkState::Degraded;
                tracing::warn!(arm = %arm, "Arm link degraded");
                Some(ArmLinkEvent::Degraded)
            }
            // A read without a handle is not a transition
            ArmLinkState::Degraded | ArmLinkState::Unconnected => {
                tracing::trace!(arm = %arm, failures = entry.failures, "Arm read failed");
                None
            }
        }
    }

    /// Handle closed (reconnect or shutdown)
    pub async fn record_teardown(&self, arm: Arm) -> Option<ArmLinkEvent> {
        self.transition(arm, ArmLinkState::Unconnected).await
    }

    async fn transition(&self, arm: Arm, next: ArmLinkState) -> Option<ArmLinkEvent> {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(arm).or_default();
        let prev = entry.state;
        let failures = entry.failures;
        entry.state = next;
        if next != ArmLinkState::Degraded {
            entry.failures = 0;
        }

        match (prev, next) {
            (ArmLinkState::Unconnected, ArmLinkState::Connected) => {
                tracing::info!(arm = %arm, "Arm link established");
                Some(ArmLinkEvent::Established)
            }
            (ArmLinkState::Degraded, ArmLinkState::Connected) => {
                tracing::info!(arm = %arm, failed_reads = failures, "Arm link recovered");
                Some(ArmLinkEvent::Recovered)
            }
            (ArmLinkState::Connected | ArmLinkState::Degraded, ArmLinkState::Unconnected) => {
                tracing::info!(arm = %arm, "Arm link torn down");
                Some(ArmLinkEvent::TornDown)
            }
            _ => None,
        }
    }

    pub async fn state(&self, arm: Arm) -> ArmLinkState {
        self.entries
            .read()
            .await
            .get(&arm)
            .map(|e| e.state)
            .unwrap_or(ArmLinkState::Unconnected)
    }

    /// Consecutive failed reads since the last good one
    pub async fn failures(&self, arm: Arm) -> u32 {
        self.entries
            .read()
            .await
            .get(&arm)
            .map(|e| e.failures)
            .unwrap_or(0)
    }
}

impl Default for ArmStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_cycle() {
        let tracker = ArmStatusTracker::new();
        assert_eq!(tracker.state(Arm::Leader).await, ArmLinkState::Unconnected);

        assert_eq!(
            tracker.record_connect(Arm::Leader).await,
            Some(ArmLinkEvent::Established)
        );
        assert_eq!(tracker.record_read(Arm::Leader, true).await, None);

        assert_eq!(
            tracker.record_read(Arm::Leader, false).await,
            Some(ArmLinkEvent::Degraded)
        );
        assert_eq!(tracker.record_read(Arm::Leader, false).await, None);
        assert_eq!(tracker.failures(Arm::Leader).await, 2);

        assert_eq!(
            tracker.record_read(Arm::Leader, true).await,
            Some(ArmLinkEvent::Recovered)
        );
        assert_eq!(tracker.failures(Arm::Leader).await, 0);

        assert_eq!(
            tracker.record_teardown(Arm::Leader).await,
            Some(ArmLinkEvent::TornDown)
        );
        assert_eq!(tracker.record_teardown(Arm::Leader).await, None);
    }

    #[tokio::test]
    async fn test_failure_without_link_is_silent() {
        let tracker = ArmStatusTracker::new();
        assert_eq!(tracker.record_read(Arm::Follower, false).await, None);
        assert_eq!(tracker.state(Arm::Follower).await, ArmLinkState::Unconnected);
    }

    #[tokio::test]
    async fn test_arms_are_independent() {
        let tracker = ArmStatusTracker::new();
        tracker.record_connect(Arm::Leader).await;
        tracker.record_read(Arm::Leader, false).await;

        assert_eq!(tracker.state(Arm::Leader).await, ArmLinkState::Degraded);
        assert_eq!(tracker.state(Arm::Follower).await, ArmLinkState::Unconnected);
    }

    #[tokio::test]
    async fn test_first_good_read_establishes() {
        let tracker = ArmStatusTracker::new();
        assert_eq!(
            tracker.record_read(Arm::Follower, true).await,
            Some(ArmLinkEvent::Established)
        );
    }
}
