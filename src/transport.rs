//! Message link between the worker pool and the owning service.
//!
//! Both directions carry JSON frames over bounded tokio channels. Frames are
//! decoded into [`PoolEvent`] / [`PoolCommand`] exactly once, in
//! [`FrameReceiver::recv`]; anything that fails to decode is logged and dropped
//! there, so the scheduler never sees an untyped payload.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{PoolError, Result};
use crate::scheduler::{JobProgress, QueueEntry};

/// What a stop request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopOutcome {
    /// A worker held the job and its job-scoped token was cancelled.
    StoppedRunning,
    /// The job was still queued and is now tombstoned.
    MarkedForRemoval,
    /// Neither a worker nor the queue knows the job.
    NotFound,
}

impl std::fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopOutcome::StoppedRunning => write!(f, "stopped-running"),
            StopOutcome::MarkedForRemoval => write!(f, "marked-for-removal"),
            StopOutcome::NotFound => write!(f, "not-found"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResult {
    pub job_id: Uuid,
    pub outcome: StopOutcome,
}

/// Pool → owning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum PoolEvent {
    JobProgress(JobProgress),
    QueueBackup(Vec<QueueEntry>),
    StopResult(StopResult),
    RecoveryRequest,
}

/// Owning service → pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload")]
pub enum PoolCommand {
    JobsReceived(Vec<QueueEntry>),
    StopJob(StopRequest),
    RecoverQueue(Vec<QueueEntry>),
}

/// Typed sending half of a frame channel.
pub struct FrameSender<T> {
    tx: mpsc::Sender<String>,
    _message: PhantomData<fn(T)>,
}

impl<T> Clone for FrameSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            _message: PhantomData,
        }
    }
}

impl<T: Serialize> FrameSender<T> {
    pub async fn send(&self, message: &T) -> Result<()> {
        let frame = serde_json::to_string(message)?;
        self.send_frame(frame).await
    }

    pub(crate) async fn send_frame(&self, frame: String) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| PoolError::TransportClosed)
    }

    /// Send without waiting for buffer space. A full channel fails with
    /// [`PoolError::TransportFull`].
    pub fn try_send(&self, message: &T) -> Result<()> {
        let frame = serde_json::to_string(message)?;
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::TransportFull,
            mpsc::error::TrySendError::Closed(_) => PoolError::TransportClosed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Typed receiving half of a frame channel.
pub struct FrameReceiver<T> {
    rx: mpsc::Receiver<String>,
    _message: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> FrameReceiver<T> {
    /// Next decodable message, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let frame = self.rx.recv().await?;
            match serde_json::from_str(&frame) {
                Ok(message) => return Some(message),
                Err(e) => {
                    tracing::warn!(error = %e, frame_len = frame.len(), "Dropping malformed frame");
                }
            }
        }
    }

    /// Like [`recv`](Self::recv) but returns `None` as soon as nothing is
    /// buffered.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            let frame = self.rx.try_recv().ok()?;
            match serde_json::from_str(&frame) {
                Ok(message) => return Some(message),
                Err(e) => {
                    tracing::warn!(error = %e, frame_len = frame.len(), "Dropping malformed frame");
                }
            }
        }
    }
}

pub fn frame_channel<T>(capacity: usize) -> (FrameSender<T>, FrameReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        FrameSender {
            tx,
            _message: PhantomData,
        },
        FrameReceiver {
            rx,
            _message: PhantomData,
        },
    )
}

/// The pool's end of the link.
pub struct PoolLink {
    pub events: FrameSender<PoolEvent>,
    pub commands: FrameReceiver<PoolCommand>,
}

/// The owning service's end of the link.
pub struct ServiceLink {
    pub events: FrameReceiver<PoolEvent>,
    pub commands: FrameSender<PoolCommand>,
}

pub fn link(capacity: usize) -> (PoolLink, ServiceLink) {
    let (event_tx, event_rx) = frame_channel(capacity);
    let (command_tx, command_rx) = frame_channel(capacity);
    (
        PoolLink {
            events: event_tx,
            commands: command_rx,
        },
        ServiceLink {
            events: event_rx,
            commands: command_tx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{JobPriority, JobStatus};

    #[test]
    fn event_wire_shape_is_adjacently_tagged() {
        let id = Uuid::nil();
        let event = PoolEvent::JobProgress(JobProgress::new(id, JobStatus::Running, 42));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "JobProgress");
        assert_eq!(json["payload"]["status"], "Running");
        assert_eq!(json["payload"]["progress"], 42);
        assert_eq!(json["payload"]["jobId"], id.to_string());

        let stop = PoolEvent::StopResult(StopResult {
            job_id: id,
            outcome: StopOutcome::MarkedForRemoval,
        });
        let json = serde_json::to_value(&stop).unwrap();
        assert_eq!(json["payload"]["outcome"], "marked-for-removal");

        let json = serde_json::to_value(PoolEvent::RecoveryRequest).unwrap();
        assert_eq!(json["event"], "RecoveryRequest");
    }

    #[test]
    fn command_decodes_from_wire_json() {
        let id = Uuid::new_v4();
        let raw = format!(
            r#"{{"command":"JobsReceived","payload":[{{"jobId":"{}","priority":"High","queuingTime":7}}]}}"#,
            id
        );
        let command: PoolCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            command,
            PoolCommand::JobsReceived(vec![
                QueueEntry::new(id, JobPriority::High).with_queuing_time(7)
            ])
        );
    }

    #[test]
    fn missing_queuing_time_decodes_as_unset() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"jobId":"{}","priority":"Regular"}}"#, id);
        let entry: QueueEntry = serde_json::from_str(&raw).unwrap();
        assert!(!entry.has_queuing_time());
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let (tx, mut rx) = frame_channel::<PoolCommand>(8);
        tx.send_frame("not json".to_string()).await.unwrap();
        tx.send_frame(r#"{"command":"Explode"}"#.to_string())
            .await
            .unwrap();
        let id = Uuid::new_v4();
        tx.send(&PoolCommand::StopJob(StopRequest { job_id: id }))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(
            rx.recv().await,
            Some(PoolCommand::StopJob(StopRequest { job_id: id }))
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn try_send_reports_full_and_closed() {
        let (tx, rx) = frame_channel::<PoolEvent>(1);
        tx.try_send(&PoolEvent::RecoveryRequest).unwrap();
        assert!(matches!(
            tx.try_send(&PoolEvent::RecoveryRequest),
            Err(PoolError::TransportFull)
        ));

        drop(rx);
        assert!(matches!(
            tx.try_send(&PoolEvent::RecoveryRequest),
            Err(PoolError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (pool, service) = link(4);
        drop(service);
        let result = pool.events.send(&PoolEvent::RecoveryRequest).await;
        assert!(matches!(result, Err(PoolError::TransportClosed)));
        assert!(pool.events.is_closed());
    }
}
