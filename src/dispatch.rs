//! Background publishing with dead-letter capture.
//!
//! A [`Dispatcher`] accepts [`PublishJob`]s and runs them on a pool of
//! worker tasks fed by a bounded queue. A job whose publish fails is
//! written to the dead-letter store and reported through the log and the
//! optional failure hook; it is never retried inline. When async dispatch
//! is disabled the job runs on the caller's task and the error is returned.

use crate::config::AsyncConfig;
use crate::dead_letter::{DeadLetterStore, NewFailedMessage};
use crate::kafka::{to_canonical_json, ProducerClient, PublishOptions, Publisher};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A unit of publish work.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishJob {
    pub topic: String,
    /// Wire bytes; canonical JSON when `as_json` is set.
    pub payload: Vec<u8>,
    pub as_json: bool,
    pub options: Option<PublishOptions>,
}

impl PublishJob {
    pub fn raw(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            as_json: false,
            options: None,
        }
    }

    /// Encodes `payload` now, so encoding errors reach the caller.
    pub fn structured<T: Serialize + ?Sized>(topic: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self {
            topic: topic.into(),
            payload: to_canonical_json(payload)?,
            as_json: true,
            options: None,
        })
    }

    pub fn with_options(mut self, options: PublishOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Details of a job that failed, passed to the failure hook.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub topic: String,
    pub error: String,
    /// Id of the dead-letter record, `None` if recording failed too.
    pub record_id: Option<i64>,
}

pub type FailureHook = Arc<dyn Fn(&JobFailure) + Send + Sync>;

struct Shared<C: ProducerClient, S> {
    publisher: Publisher<C>,
    store: Arc<S>,
    on_failure: Option<FailureHook>,
}

pub struct Dispatcher<C: ProducerClient, S> {
    shared: Arc<Shared<C, S>>,
    queue: String,
    sender: Option<mpsc::Sender<PublishJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl<C, S> Dispatcher<C, S>
where
    C: ProducerClient,
    S: DeadLetterStore + 'static,
{
    /// Starts `config.workers` workers when async dispatch is enabled.
    /// Must be called within a tokio runtime.
    pub fn new(publisher: Publisher<C>, store: Arc<S>, config: &AsyncConfig) -> Self {
        Self::with_hook(publisher, store, config, None)
    }

    pub fn with_hook(
        publisher: Publisher<C>,
        store: Arc<S>,
        config: &AsyncConfig,
        on_failure: Option<FailureHook>,
    ) -> Self {
        let shared = Arc::new(Shared {
            publisher,
            store,
            on_failure,
        });

        if !config.enabled {
            info!(queue = %config.queue, "Async dispatch disabled, publishing inline");
            return Self {
                shared,
                queue: config.queue.clone(),
                sender: None,
                workers: Vec::new(),
            };
        }

        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let shared = Arc::clone(&shared);
                let receiver = Arc::clone(&receiver);
                let queue = config.queue.clone();
                tokio::spawn(async move { run_worker(worker, queue, shared, receiver).await })
            })
            .collect();

        info!(queue = %config.queue, workers = config.workers, "Async dispatch started");
        Self {
            shared,
            queue: config.queue.clone(),
            sender: Some(sender),
            workers,
        }
    }

    pub fn is_async(&self) -> bool {
        self.sender.is_some()
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Queues `job` and returns; waits only while the queue is full.
    ///
    /// With async dispatch disabled this is [`Dispatcher::run_now`].
    pub async fn dispatch(&self, job: PublishJob) -> Result<()> {
        match &self.sender {
            Some(sender) => {
                debug!(queue = %self.queue, topic = %job.topic, "Queueing publish job");
                sender.send(job).await.map_err(|_| Error::Closed)
            }
            None => self.run_now(job).await,
        }
    }

    pub async fn dispatch_raw_to_default(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        let topic = self.shared.publisher.default_topic().to_string();
        self.dispatch(PublishJob::raw(topic, payload)).await
    }

    pub async fn dispatch_structured_to_default<T: Serialize + ?Sized>(
        &self,
        payload: &T,
    ) -> Result<()> {
        let topic = self.shared.publisher.default_topic().to_string();
        self.dispatch(PublishJob::structured(topic, payload)?).await
    }

    /// Publishes `job` on the current task, recording it on failure.
    ///
    /// Returns the publish error, or the store error if the failed message
    /// could not be recorded.
    pub async fn run_now(&self, job: PublishJob) -> Result<()> {
        self.shared.execute(job).await
    }

    /// Stops accepting jobs and waits for queued jobs to finish.
    pub async fn shutdown(mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                warn!(error = %e, "Dispatch worker ended abnormally");
            }
        }
        info!(queue = %self.queue, "Async dispatch stopped");
    }
}

impl<C, S> Shared<C, S>
where
    C: ProducerClient,
    S: DeadLetterStore,
{
    async fn execute(&self, job: PublishJob) -> Result<()> {
        let result = self
            .publisher
            .publish(&job.topic, job.payload.clone(), job.options.clone())
            .await;

        let publish_error = match result {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        error!(
            topic = %job.topic,
            as_json = job.as_json,
            error = %publish_error,
            "Kafka produce failed"
        );

        let message = NewFailedMessage::new(
            job.topic.clone(),
            job.payload,
            job.as_json,
            publish_error.to_string(),
        )
        .with_options(job.options);

        let recorded = self.store.record(message).await;
        let failure = JobFailure {
            topic: job.topic,
            error: publish_error.to_string(),
            record_id: recorded.as_ref().ok().map(|r| r.id),
        };
        if let Some(hook) = &self.on_failure {
            hook(&failure);
        }

        match recorded {
            Ok(record) => {
                info!(id = record.id, topic = %record.topic, "Failed message recorded");
                Err(publish_error)
            }
            Err(store_error) => {
                error!(
                    topic = %failure.topic,
                    error = %store_error,
                    "Could not record failed message; message lost"
                );
                Err(store_error)
            }
        }
    }
}

async fn run_worker<C, S>(
    worker: usize,
    queue: String,
    shared: Arc<Shared<C, S>>,
    receiver: Arc<Mutex<mpsc::Receiver<PublishJob>>>,
) where
    C: ProducerClient,
    S: DeadLetterStore,
{
    debug!(worker, queue = %queue, "Dispatch worker started");

    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(job) = job else {
            break;
        };

        // Failures are already logged and recorded.
        let _ = shared.execute(job).await;
    }

    debug!(worker, queue = %queue, "Dispatch worker stopped");
}
