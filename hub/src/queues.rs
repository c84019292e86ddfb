use std::time::Duration;

use sensorhub_common::{SubmitError, TaskMessage};
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError, Receiver, Sender};
use tracing::warn;

use crate::health::Health;

pub const COMMAND_QUEUE_DEPTH: usize = 10;
pub const CONTROL_QUEUE_DEPTH: usize = 10;
pub const PUBLISH_QUEUE_DEPTH: usize = 20;

/// Wait allowed to producers outside the loops (HTTP, MQTT commands).
pub const SUBMIT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct QueueSenders {
    pub commands: Sender<TaskMessage>,
    pub control: Sender<TaskMessage>,
    pub publish: Sender<TaskMessage>,
}

pub struct QueueReceivers {
    pub commands: Receiver<TaskMessage>,
    pub control: Receiver<TaskMessage>,
    pub publish: Receiver<TaskMessage>,
}

pub fn channels() -> (QueueSenders, QueueReceivers) {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
    let (publish_tx, publish_rx) = mpsc::channel(PUBLISH_QUEUE_DEPTH);
    (
        QueueSenders {
            commands: commands_tx,
            control: control_tx,
            publish: publish_tx,
        },
        QueueReceivers {
            commands: commands_rx,
            control: control_rx,
            publish: publish_rx,
        },
    )
}

/// Non-blocking send from inside a loop. A full queue drops the message and counts it.
pub fn offer(queue: &Sender<TaskMessage>, message: TaskMessage, health: &Health) -> bool {
    match queue.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(message)) => {
            health.record_dropped();
            warn!("queue full, dropping {}", message.kind());
            false
        }
        Err(TrySendError::Closed(message)) => {
            warn!("queue closed, dropping {}", message.kind());
            false
        }
    }
}

/// Bounded-wait send for producers outside the loops.
pub async fn submit(queue: &Sender<TaskMessage>, message: TaskMessage) -> Result<(), SubmitError> {
    match queue.send_timeout(message, SUBMIT_TIMEOUT).await {
        Ok(()) => Ok(()),
        Err(SendTimeoutError::Timeout(_)) => Err(SubmitError::QueueFull),
        Err(SendTimeoutError::Closed(_)) => Err(SubmitError::Closed),
    }
}
