//! In-process background task queue.
//!
//! Jobs go through a bounded channel to a single [`Worker`], which runs them
//! one at a time. Each job runs inside a task-mode
//! [`LifecycleCoordinator`], so the worker's resources are opened before and
//! closed after every job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::db::{DbError, Session, content};
use crate::lifecycle::{LifecycleCoordinator, LifecycleError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task queue is full, please try again")]
    Full,

    #[error("task queue is shut down")]
    Closed,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Stores `body` under `url`, replacing whatever was there.
    StoreContent { url: String, body: Option<String> },
    /// Removes the row stored under `url`, if any.
    DeleteContent { url: String },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StoreContent { .. } => "store_content",
            Self::DeleteContent { .. } => "delete_content",
        }
    }

    async fn run(self, session: Session) -> Result<(), TaskError> {
        let mut conn = session.connection().await?;
        match self {
            Self::StoreContent { url, body } => {
                let row = content::upsert(&mut conn, &url, body.as_deref()).await?;
                tracing::info!(content_id = row.id, url = %row.url, "content stored");
            }
            Self::DeleteContent { url } => {
                let deleted = content::delete_by_url(&mut conn, &url).await?;
                tracing::info!(url = %url, deleted, "content deleted");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    #[serde(flatten)]
    pub task: Task,
}

#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<Job>,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Queues `task` without waiting for room.
    pub fn enqueue(&self, task: Task) -> Result<Job, QueueError> {
        let job = Job {
            id: Uuid::new_v4(),
            enqueued_at: Utc::now(),
            task,
        };
        self.sender.try_send(job.clone()).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })?;
        tracing::debug!(job_id = %job.id, task = job.task.name(), "job enqueued");
        Ok(job)
    }
}

pub struct Worker {
    receiver: mpsc::Receiver<Job>,
    coordinator: Arc<LifecycleCoordinator>,
}

impl Worker {
    pub fn new(receiver: mpsc::Receiver<Job>, coordinator: Arc<LifecycleCoordinator>) -> Self {
        Self {
            receiver,
            coordinator,
        }
    }

    /// Runs jobs until every [`TaskQueue`] handle is dropped and the queue
    /// is drained. Returns the number of jobs that failed.
    pub async fn run(mut self) -> usize {
        tracing::info!("worker started");
        let mut failed = 0;
        while let Some(job) = self.receiver.recv().await {
            if self.execute(job).await.is_err() {
                failed += 1;
            }
        }
        tracing::info!(failed, "worker stopped");
        failed
    }

    async fn execute(&self, job: Job) -> Result<(), TaskError> {
        let Job { id, task, .. } = job;
        let name = task.name();
        let result = self
            .coordinator
            .run_task(name, |session| task.run(session))
            .await;

        match &result {
            Ok(()) => tracing::info!(job_id = %id, task = name, "job finished"),
            Err(err) => tracing::error!(job_id = %id, task = name, error = %err, "job failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Mode;
    use crate::test_support::{Call, RecordingResources};

    fn store(url: &str) -> Task {
        Task::StoreContent {
            url: url.to_string(),
            body: Some("hello".to_string()),
        }
    }

    #[test]
    fn full_queue_rejects_jobs() {
        let (queue, _receiver) = TaskQueue::new(1);

        queue.enqueue(store("http://a")).unwrap();
        assert!(matches!(
            queue.enqueue(store("http://b")),
            Err(QueueError::Full)
        ));
    }

    #[test]
    fn closed_queue_rejects_jobs() {
        let (queue, receiver) = TaskQueue::new(4);
        drop(receiver);

        assert!(matches!(
            queue.enqueue(store("http://a")),
            Err(QueueError::Closed)
        ));
    }

    #[test]
    fn jobs_serialize_with_task_tag() {
        let (queue, _receiver) = TaskQueue::new(4);
        let job = queue
            .enqueue(Task::DeleteContent {
                url: "http://a".to_string(),
            })
            .unwrap();

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["task"], "delete_content");
        assert_eq!(value["url"], "http://a");
        assert_eq!(value["id"], job.id.to_string());
    }

    #[tokio::test]
    async fn worker_brackets_each_job_and_drains_the_queue() {
        let resources = RecordingResources::new();
        let coordinator = Arc::new(LifecycleCoordinator::new(resources.clone(), Mode::Task));
        let (queue, receiver) = TaskQueue::new(4);

        queue.enqueue(store("http://a")).unwrap();
        queue
            .enqueue(Task::DeleteContent {
                url: "http://b".to_string(),
            })
            .unwrap();
        drop(queue);

        // The fake pool is never opened, so both jobs fail at acquire.
        let failed = Worker::new(receiver, Arc::clone(&coordinator)).run().await;

        assert_eq!(failed, 2);
        assert_eq!(
            resources.calls(),
            vec![
                Call::Init,
                Call::Cleanup,
                Call::Shutdown,
                Call::Init,
                Call::Cleanup,
                Call::Shutdown
            ]
        );
        assert!(!coordinator.is_running());
    }
}
