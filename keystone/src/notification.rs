use tokio::sync::broadcast;
use tracing::trace;

use crate::{
    migrations::ExecutedMigrationPlan,
    runtime::{RuntimeLevel, RuntimeLevelReason},
};

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum Notification {
    /// The baseline schema was created and seeded.
    DatabaseSchemaAndDataCreated { requires_upgrade: bool },

    MigrationPlanExecuted(ExecutedMigrationPlan),

    RuntimeLevelDetermined {
        level: RuntimeLevel,
        reason: RuntimeLevelReason,
    },

    ApplicationStarting {
        level: RuntimeLevel,
        is_restarting: bool,
    },
}

/// Fire-and-forget notification hub. Publishing never blocks and never fails,
/// notifications sent while nobody subscribes are dropped.
#[derive(Debug, Clone)]
pub struct EventAggregator {
    sender: broadcast::Sender<Notification>,
}

impl EventAggregator {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self { sender }
    }

    pub fn publish(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            trace!("notification dropped, no subscriber");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new()
    }
}
