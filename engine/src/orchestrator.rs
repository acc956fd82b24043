//! Sequential job queue driving one capture session at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use slidewatch_common::config::Config;
use slidewatch_common::job::JobDescriptor;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::ports::{Player, ProgressResetter, SlideAck, SlideSink};
use crate::postprocess::PostProcessor;
use crate::recorder::session::{CaptureSession, TickOutcome};
use crate::settings::{effective_config, ResolvedConfig};

/// How often `is_playing` is polled while waiting for playback to start.
const PLAYING_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("queue is empty")]
    EmptyQueue,
    #[error("job #{index} ({id}) is invalid: {reason}")]
    InvalidJob { index: usize, id: String, reason: String },
}

/// Cloneable cancel switch. Honoured at the next tick boundary.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    JobStarted { id: String },
    JobCompleted { id: String, slides: u32 },
    JobFailed { id: String, reason: String },
    QueueFinished,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { slides: u32 },
    Failed { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub id: String,
    pub outcome: JobOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub jobs: Vec<JobReport>,
    pub cancelled: bool,
}

impl QueueReport {
    pub fn completed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.outcome, JobOutcome::Completed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.outcome, JobOutcome::Failed { .. }))
            .count()
    }
}

/// Result of one load/reload attempt of a job.
enum Attempt {
    Ended { saved: Vec<SlideAck> },
    Fault { reason: String, saved: Vec<SlideAck> },
    Cancelled,
}

pub struct TaskOrchestrator {
    config: Config,
    player: Arc<dyn Player>,
    sink: Arc<dyn SlideSink>,
    progress: Option<Arc<dyn ProgressResetter>>,
    postprocessor: Option<PostProcessor>,
    events: Option<mpsc::UnboundedSender<QueueEvent>>,
    queue: VecDeque<JobDescriptor>,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl TaskOrchestrator {
    pub fn new(config: Config, player: Arc<dyn Player>, sink: Arc<dyn SlideSink>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            postprocessor: PostProcessor::from_config(&config.postprocess),
            config,
            player,
            sink,
            progress: None,
            events: None,
            queue: VecDeque::new(),
            cancel_tx: Arc::new(cancel_tx),
        }
    }

    pub fn with_progress_resetter(mut self, resetter: Arc<dyn ProgressResetter>) -> Self {
        self.progress = Some(resetter);
        self
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<QueueEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn enqueue(&mut self, job: JobDescriptor) {
        debug!(job = %job, "job queued");
        self.queue.push_back(job);
    }

    /// Jobs not yet completed or failed, current job first.
    pub fn pending(&self) -> impl Iterator<Item = &JobDescriptor> {
        self.queue.iter()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Check every queued job up front. Custom jobs are exempt.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        for (index, job) in self.queue.iter().enumerate() {
            if job.is_custom() {
                continue;
            }
            let invalid = |reason: String| OrchestratorError::InvalidJob {
                index,
                id: job.id.clone(),
                reason,
            };
            if !self.config.profiles.contains_key(&job.profile_id) {
                return Err(invalid(format!("unknown profile '{}'", job.profile_id)));
            }
            if let Some(flag) = job.capabilities.first_missing() {
                return Err(invalid(format!("missing capability {flag}")));
            }
        }
        Ok(())
    }

    fn emit(&self, event: QueueEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
        *cancel.borrow()
    }

    /// Process the queue until it is exhausted or cancelled.
    ///
    /// Completed and failed jobs are removed from the queue. On cancel the
    /// current job and everything after it stay queued. A cancel issued
    /// before `start` is honoured before the first job; the flag is cleared
    /// once a cancelled run returns.
    pub async fn start(&mut self) -> Result<QueueReport, OrchestratorError> {
        if self.queue.is_empty() {
            return Err(OrchestratorError::EmptyQueue);
        }
        self.validate()?;

        let mut cancel = self.cancel_tx.subscribe();
        let mut report = QueueReport::default();
        info!(jobs = self.queue.len(), "starting job queue");

        while let Some(job) = self.queue.front().cloned() {
            if Self::is_cancelled(&cancel) {
                info!(remaining = self.queue.len(), "queue cancelled before next job");
                return Ok(self.cancelled(report));
            }
            self.emit(QueueEvent::JobStarted { id: job.id.clone() });
            let outcome = self.run_job(&job, &mut cancel).await;

            match &outcome {
                JobOutcome::Cancelled => {
                    info!(job = %job, remaining = self.queue.len(), "queue cancelled");
                    report.jobs.push(JobReport {
                        id: job.id.clone(),
                        outcome: JobOutcome::Cancelled,
                    });
                    return Ok(self.cancelled(report));
                }
                JobOutcome::Completed { slides } => {
                    info!(job = %job, slides, "job completed");
                    self.emit(QueueEvent::JobCompleted {
                        id: job.id.clone(),
                        slides: *slides,
                    });
                }
                JobOutcome::Failed { reason } => {
                    error!(job = %job, reason = %reason, "job failed, skipping");
                    self.emit(QueueEvent::JobFailed {
                        id: job.id.clone(),
                        reason: reason.clone(),
                    });
                }
            }
            self.queue.pop_front();
            report.jobs.push(JobReport { id: job.id, outcome });

            if !self.queue.is_empty() {
                let delay = Duration::try_from_secs_f64(self.config.orchestrator.inter_job_delay_secs)
                    .unwrap_or_default();
                if !self.sleep_unless_cancelled(delay, &mut cancel).await {
                    return Ok(self.cancelled(report));
                }
            }
        }

        info!(
            completed = report.completed(),
            failed = report.failed(),
            "job queue finished"
        );
        self.emit(QueueEvent::QueueFinished);
        Ok(report)
    }

    fn cancelled(&self, mut report: QueueReport) -> QueueReport {
        report.cancelled = true;
        self.emit(QueueEvent::Cancelled);
        self.cancel_tx.send_replace(false);
        report
    }

    /// Sleep for `delay`. Returns false if cancelled first.
    async fn sleep_unless_cancelled(&self, delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
        if Self::is_cancelled(cancel) {
            return false;
        }
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = cancel.changed() => {
                    if changed.is_err() || Self::is_cancelled(cancel) {
                        return false;
                    }
                }
            }
        }
    }

    async fn run_job(&self, job: &JobDescriptor, cancel: &mut watch::Receiver<bool>) -> JobOutcome {
        let resolved = effective_config(Some(job), &self.config);
        info!(
            job = %job,
            fast_mode = resolved.fast_mode,
            max_retry_attempts = resolved.max_retry_attempts,
            "starting job"
        );

        if resolved.reset_progress {
            if let Some(progress) = &self.progress {
                match progress.reset_remote_progress(&job.id).await {
                    Ok(()) => debug!(job = %job, "remote progress reset"),
                    Err(e) => warn!(job = %job, error = %e, "remote progress reset failed, continuing"),
                }
            }
        }

        let mut retries = 0u32;
        let mut saved = Vec::new();
        loop {
            if Self::is_cancelled(cancel) {
                return JobOutcome::Cancelled;
            }
            match self.attempt(job, &resolved, retries > 0, cancel).await {
                Attempt::Ended { saved: s } => {
                    saved.extend(s);
                    let slides = match &self.postprocessor {
                        Some(pp) => pp.run(saved, self.sink.as_ref()).await.kept.len(),
                        None => saved.len(),
                    };
                    return JobOutcome::Completed {
                        slides: slides as u32,
                    };
                }
                Attempt::Cancelled => return JobOutcome::Cancelled,
                Attempt::Fault { reason, saved: s } => {
                    saved.extend(s);
                    if retries >= resolved.max_retry_attempts {
                        return JobOutcome::Failed { reason };
                    }
                    retries += 1;
                    warn!(
                        job = %job,
                        reason = %reason,
                        attempt = retries,
                        max = resolved.max_retry_attempts,
                        "player fault, reloading"
                    );
                }
            }
        }
    }

    /// Load (or reload), wait for playback, then run a capture session until
    /// playback ends, a fault is detected or the queue is cancelled.
    async fn attempt(
        &self,
        job: &JobDescriptor,
        resolved: &ResolvedConfig,
        reload: bool,
        cancel: &mut watch::Receiver<bool>,
    ) -> Attempt {
        let loaded = if reload {
            self.player.reload().await
        } else {
            self.player.load(&job.target).await
        };
        if let Err(e) = loaded {
            return Attempt::Fault {
                reason: format!("load failed: {e}"),
                saved: Vec::new(),
            };
        }
        if resolved.auto_adjust_speed {
            self.player.set_playback_rate(resolved.playback_speed).await;
        }

        match self.wait_for_playing(resolved.start_timeout, cancel).await {
            Some(true) => {}
            Some(false) => {
                return Attempt::Fault {
                    reason: "playback did not start".into(),
                    saved: Vec::new(),
                }
            }
            None => return Attempt::Cancelled,
        }

        let player = self.player.as_ref();
        let sink = self.sink.as_ref();
        let mut session = match CaptureSession::start(resolved, player, sink).await {
            Ok(s) => s,
            Err(e) => {
                return Attempt::Fault {
                    reason: e.to_string(),
                    saved: Vec::new(),
                }
            }
        };

        let period = session.poll_interval().max(Duration::from_millis(10));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut missing = 0u32;

        loop {
            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() || Self::is_cancelled(cancel) {
                        session.stop();
                        return Attempt::Cancelled;
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }

            // End of playback wins over an error shown at the same time.
            if player.is_playback_ended().await {
                info!(slides = session.slides(), "playback ended");
                return Attempt::Ended {
                    saved: session.stop(),
                };
            }
            if let Some(message) = player.error_indicator().await {
                return Attempt::Fault {
                    reason: format!("player error: {message}"),
                    saved: session.stop(),
                };
            }

            match session.poll(player, sink).await {
                TickOutcome::Ended => {
                    return Attempt::Ended {
                        saved: session.stop(),
                    }
                }
                TickOutcome::Unavailable => {
                    missing += 1;
                    debug!(missing, threshold = resolved.target_missing_threshold, "capture target missing");
                    if missing >= resolved.target_missing_threshold {
                        return Attempt::Fault {
                            reason: format!("capture target unavailable {missing} times"),
                            saved: session.stop(),
                        };
                    }
                }
                TickOutcome::BlankSkipped => {}
                _ => missing = 0,
            }
        }
    }

    /// `Some(true)` once playing, `Some(false)` on timeout, `None` if cancelled.
    async fn wait_for_playing(&self, timeout: Duration, cancel: &mut watch::Receiver<bool>) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if Self::is_cancelled(cancel) {
                return None;
            }
            if self.player.is_playing().await {
                return Some(true);
            }
            if Instant::now() >= deadline {
                return Some(false);
            }
            tokio::select! {
                _ = tokio::time::sleep(PLAYING_POLL) => {}
                changed = cancel.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}
