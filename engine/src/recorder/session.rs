use std::time::Duration;

use chrono::Local;
use slidewatch_common::frame::Frame;
use tracing::{debug, error, info, warn};

use crate::detector::ChangeDetector;
use crate::ports::{CaptureError, FrameProvider, PlaybackProbe, SlideAck, SlideSink};
use crate::settings::ResolvedConfig;

use super::verify::{Step, Verifier};

/// Corner sample inset, shrunk for small frames.
const SAMPLE_INSET: u32 = 300;
/// Channel level at or below which a sample counts as empty.
const NEAR_ZERO: u8 = 5;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("capture target still blank after retry")]
    BlankStart,
    #[error("initial capture failed: {0}")]
    Capture(#[from] CaptureError),
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Stable,
    CandidateOpened,
    Confirmed { confirmations: u32 },
    CandidateDiscarded,
    Committed { slide: u32 },
    /// A commit was decided but the sink rejected it. The baseline still moved.
    SaveFailed,
    BlankSkipped,
    /// The surface could not be captured this tick.
    Unavailable,
    Ended,
}

/// True if any of five sample points (center and four inset corners) has
/// visible content: alpha above 5 and at least one colour channel above 5.
pub fn has_content(frame: &Frame) -> bool {
    let (w, h) = frame.dimensions();
    let ix = SAMPLE_INSET.min(w / 4);
    let iy = SAMPLE_INSET.min(h / 4);
    let points = [
        (w / 2, h / 2),
        (ix, iy),
        (w.saturating_sub(ix + 1), iy),
        (ix, h.saturating_sub(iy + 1)),
        (w.saturating_sub(ix + 1), h.saturating_sub(iy + 1)),
    ];
    points.iter().any(|&(x, y)| {
        let [r, g, b, a] = frame.pixel(x, y);
        a > NEAR_ZERO && (r > NEAR_ZERO || g > NEAR_ZERO || b > NEAR_ZERO)
    })
}

/// Capture once and treat content-free frames as blank.
async fn capture_checked<P: FrameProvider + ?Sized>(provider: &P) -> Result<Frame, CaptureError> {
    let frame = provider.capture_frame().await?;
    if has_content(&frame) {
        Ok(frame)
    } else {
        Err(CaptureError::Blank)
    }
}

/// One running capture session. Dropping or stopping it discards the
/// baseline and any pending candidate.
pub struct CaptureSession {
    detector: ChangeDetector,
    verifier: Verifier,
    baseline: Frame,
    slides: u32,
    saved: Vec<SlideAck>,
    title: String,
    poll_interval: Duration,
}

impl CaptureSession {
    /// Capture and commit the initial baseline.
    ///
    /// A blank first frame is retried once after `blank_retry_delay`.
    pub async fn start<P, S>(config: &ResolvedConfig, provider: &P, sink: &S) -> Result<Self, SessionError>
    where
        P: FrameProvider + ?Sized,
        S: SlideSink + ?Sized,
    {
        let detector = ChangeDetector::from_config(&config.comparison, config.crop);
        let frame = match capture_checked(provider).await {
            Ok(f) => f,
            Err(CaptureError::Blank) => {
                warn!(
                    delay_ms = config.blank_retry_delay.as_millis() as u64,
                    "first capture is blank, retrying"
                );
                tokio::time::sleep(config.blank_retry_delay).await;
                match capture_checked(provider).await {
                    Ok(f) => f,
                    Err(CaptureError::Blank) => return Err(SessionError::BlankStart),
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        let baseline = detector.prepare(&frame);
        let mut session = Self {
            verifier: Verifier::from_config(&config.verification),
            detector,
            baseline: baseline.clone(),
            slides: 0,
            saved: Vec::new(),
            title: config.title.clone(),
            poll_interval: config.poll_interval,
        };
        info!(
            strategy = session.detector.strategy_name(),
            poll_ms = session.poll_interval.as_millis() as u64,
            title = session.title,
            "capture session started"
        );
        session.commit(baseline, sink).await;
        Ok(session)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Slides successfully saved so far.
    pub fn slides(&self) -> u32 {
        self.slides
    }

    pub fn baseline(&self) -> &Frame {
        &self.baseline
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// One poll: ended probe, capture, compare, maybe commit.
    pub async fn tick<T, S>(&mut self, surface: &T, sink: &S) -> TickOutcome
    where
        T: FrameProvider + PlaybackProbe + ?Sized,
        S: SlideSink + ?Sized,
    {
        if surface.is_playback_ended().await {
            info!(slides = self.slides, "playback ended");
            return TickOutcome::Ended;
        }
        self.poll(surface, sink).await
    }

    /// Capture, compare and maybe commit, for callers that probe the end of
    /// playback themselves.
    pub async fn poll<P, S>(&mut self, surface: &P, sink: &S) -> TickOutcome
    where
        P: FrameProvider + ?Sized,
        S: SlideSink + ?Sized,
    {
        let frame = match capture_checked(surface).await {
            Ok(f) => f,
            Err(CaptureError::Blank) => {
                debug!("blank frame, skipping tick");
                return TickOutcome::BlankSkipped;
            }
            Err(e) => {
                warn!(error = %e, "capture failed");
                return TickOutcome::Unavailable;
            }
        };

        let prepared = self.detector.prepare(&frame);
        match self.verifier.observe(&self.detector, &self.baseline, prepared) {
            Step::Stable => TickOutcome::Stable,
            Step::CandidateOpened => TickOutcome::CandidateOpened,
            Step::Confirmed { confirmations } => TickOutcome::Confirmed { confirmations },
            Step::CandidateDiscarded => TickOutcome::CandidateDiscarded,
            Step::Commit(candidate) => {
                if self.commit(candidate, sink).await {
                    TickOutcome::Committed { slide: self.slides }
                } else {
                    TickOutcome::SaveFailed
                }
            }
        }
    }

    /// Persist `frame`, then make it the baseline. Returns whether the sink accepted it.
    async fn commit<S: SlideSink + ?Sized>(&mut self, frame: Frame, sink: &S) -> bool {
        let timestamp = Local::now();
        let index = self.slides + 1;
        let saved = match sink.save_slide(&frame, timestamp, &self.title, index).await {
            Ok(ack) => {
                self.slides = index;
                info!(
                    slide = index,
                    path = ack.location.display().to_string(),
                    "committed slide"
                );
                self.saved.push(ack);
                true
            }
            Err(e) => {
                error!(error = %e, slide = index, "failed to save slide");
                false
            }
        };
        self.baseline = frame;
        saved
    }

    /// End the session. Returns what the sink acknowledged, in commit order.
    pub fn stop(self) -> Vec<SlideAck> {
        info!(slides = self.slides, "capture session stopped");
        self.saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::effective_config;
    use crate::test_support::{MemorySink, Script, ScriptedPlayer, Shot};
    use slidewatch_common::config::{ComparisonMethod, Config};

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const BLACK: [u8; 4] = [0, 0, 0, 255];

    fn resolved() -> ResolvedConfig {
        let mut config = Config::default();
        config.comparison.method = ComparisonMethod::Basic;
        effective_config(None, &config)
    }

    fn white() -> Frame {
        Frame::filled(800, 600, WHITE, 0).unwrap()
    }

    fn with_square() -> Frame {
        let mut f = white();
        f.fill_rect(375, 275, 50, 50, BLACK);
        f
    }

    #[test]
    fn blank_detection_samples_five_points() {
        let black = Frame::filled(800, 600, BLACK, 0).unwrap();
        assert!(!has_content(&black));
        let transparent = Frame::filled(800, 600, [255, 255, 255, 0], 0).unwrap();
        assert!(!has_content(&transparent));

        let mut centre_only = black.clone();
        centre_only.fill_rect(400, 300, 1, 1, [0, 0, 9, 255]);
        assert!(has_content(&centre_only));

        let mut off_sample = black;
        off_sample.fill_rect(100, 100, 10, 10, WHITE);
        assert!(!has_content(&off_sample));
    }

    #[test]
    fn tiny_frames_are_sampled_in_bounds() {
        let f = Frame::filled(3, 2, [0, 0, 0, 255], 0).unwrap();
        assert!(!has_content(&f));
    }

    #[tokio::test(start_paused = true)]
    async fn start_commits_initial_baseline() {
        let player = ScriptedPlayer::single(Script::new(vec![Shot::Frame(white())]));
        let sink = MemorySink::default();
        let session = CaptureSession::start(&resolved(), &player, &sink).await.unwrap();
        assert_eq!(session.slides(), 1);
        assert_eq!(sink.saved().len(), 1);
        assert_eq!(sink.saved()[0].index, 1);
        assert_eq!(sink.saved()[0].title, "Slides");
    }

    #[tokio::test(start_paused = true)]
    async fn blank_first_frame_is_retried_once() {
        let player = ScriptedPlayer::single(Script::new(vec![Shot::Blank, Shot::Frame(white())]));
        let sink = MemorySink::default();
        let started = tokio::time::Instant::now();
        let session = CaptureSession::start(&resolved(), &player, &sink).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(session.slides(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn two_blank_frames_fail_the_start() {
        let player = ScriptedPlayer::single(Script::new(vec![Shot::Blank]));
        let sink = MemorySink::default();
        let result = CaptureSession::start(&resolved(), &player, &sink).await;
        assert!(matches!(result, Err(SessionError::BlankStart)));
        assert!(sink.saved().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_slide_commits_after_two_confirmations() {
        let script = Script::new(vec![
            Shot::Frame(white()),
            Shot::Frame(with_square()),
            Shot::Frame(with_square()),
            Shot::Frame(with_square()),
        ])
        .ending();
        let player = ScriptedPlayer::single(script);
        let sink = MemorySink::default();
        let mut session = CaptureSession::start(&resolved(), &player, &sink).await.unwrap();

        assert_eq!(session.tick(&player, &sink).await, TickOutcome::CandidateOpened);
        assert_eq!(
            session.tick(&player, &sink).await,
            TickOutcome::Confirmed { confirmations: 1 }
        );
        assert_eq!(session.tick(&player, &sink).await, TickOutcome::Committed { slide: 2 });
        assert_eq!(session.tick(&player, &sink).await, TickOutcome::Ended);
        assert_eq!(sink.saved().len(), 2);
        assert_eq!(session.stop().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_ticks_are_skipped_silently() {
        let script = Script::new(vec![Shot::Frame(white()), Shot::Blank, Shot::Frame(white())]);
        let player = ScriptedPlayer::single(script);
        let sink = MemorySink::default();
        let mut session = CaptureSession::start(&resolved(), &player, &sink).await.unwrap();
        assert_eq!(session.tick(&player, &sink).await, TickOutcome::BlankSkipped);
        assert_eq!(session.tick(&player, &sink).await, TickOutcome::Stable);
        assert!(session.verifier().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn sink_failure_still_moves_baseline() {
        let mut config = Config::default();
        config.comparison.method = ComparisonMethod::Basic;
        config.verification.double_verification = false;
        let resolved = effective_config(None, &config);

        let script = Script::new(vec![
            Shot::Frame(white()),
            Shot::Frame(with_square()),
            Shot::Frame(with_square()),
        ]);
        let player = ScriptedPlayer::single(script);
        let sink = MemorySink::default();
        let mut session = CaptureSession::start(&resolved, &player, &sink).await.unwrap();

        sink.set_failing(true);
        assert_eq!(session.tick(&player, &sink).await, TickOutcome::SaveFailed);
        assert_eq!(session.slides(), 1);
        // The failed slide is now the baseline, so the same frame is stable.
        assert_eq!(session.tick(&player, &sink).await, TickOutcome::Stable);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_target_is_reported() {
        let script = Script::new(vec![Shot::Frame(white()), Shot::Unavailable]);
        let player = ScriptedPlayer::single(script);
        let sink = MemorySink::default();
        let mut session = CaptureSession::start(&resolved(), &player, &sink).await.unwrap();
        assert_eq!(session.tick(&player, &sink).await, TickOutcome::Unavailable);
    }
}
