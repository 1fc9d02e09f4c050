//! Node lifecycle states and the status-change broadcast (spec.md §4.9).
//!
//! The teacher exposes lifecycle transitions through a boxed-callback list
//! on `DhtNodeManager`; here that becomes a `tokio::sync::broadcast`
//! channel, the idiomatic Tokio equivalent — subscribers that aren't
//! listening when a transition fires simply miss it, same as a callback
//! that was never registered.

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Created,
    Initializing,
    Running,
    Stopping,
    Stopped,
}

impl NodeStatus {
    /// Whether `self -> next` is a legal lifecycle transition (spec.md §4.9:
    /// `CREATED -> INITIALIZING -> RUNNING -> STOPPING -> STOPPED`).
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (self, next),
            (Created, Initializing) | (Initializing, Running) | (Running, Stopping) | (Stopping, Stopped)
        )
    }
}

pub struct StatusBroadcast {
    sender: broadcast::Sender<NodeStatus>,
}

impl StatusBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        StatusBroadcast { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeStatus> {
        self.sender.subscribe()
    }

    pub fn publish(&self, status: NodeStatus) {
        // No listeners is not an error; it just means nobody cares yet.
        let _ = self.sender.send(status);
    }
}

impl Default for StatusBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_forward_lifecycle_path_is_legal() {
        assert!(NodeStatus::Created.can_transition_to(NodeStatus::Initializing));
        assert!(NodeStatus::Initializing.can_transition_to(NodeStatus::Running));
        assert!(NodeStatus::Running.can_transition_to(NodeStatus::Stopping));
        assert!(NodeStatus::Stopping.can_transition_to(NodeStatus::Stopped));
        assert!(!NodeStatus::Created.can_transition_to(NodeStatus::Running));
        assert!(!NodeStatus::Running.can_transition_to(NodeStatus::Created));
    }

    #[tokio::test]
    async fn subscribers_receive_published_transitions_in_order() {
        let broadcast = StatusBroadcast::new();
        let mut rx = broadcast.subscribe();
        broadcast.publish(NodeStatus::Initializing);
        broadcast.publish(NodeStatus::Running);
        assert_eq!(rx.recv().await.unwrap(), NodeStatus::Initializing);
        assert_eq!(rx.recv().await.unwrap(), NodeStatus::Running);
    }
}
