use slidewatch_common::config::VerificationConfig;
use slidewatch_common::frame::Frame;
use tracing::{debug, info};

use crate::detector::ChangeDetector;
use crate::filter::Method;

/// Debounce state for candidate slides. Frames held here are already prepared.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationState {
    Idle,
    Verifying {
        candidate: Frame,
        confirmations: u32,
        /// Method that flagged the candidate.
        method: Method,
    },
}

/// What a single observation did to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Idle and the frame matches the baseline.
    Stable,
    /// Idle, the frame differs from the baseline and is now the candidate.
    CandidateOpened,
    /// The frame matches the live candidate; `confirmations` so far.
    Confirmed { confirmations: u32 },
    /// The frame differs from the live candidate, which was dropped.
    CandidateDiscarded,
    /// The frame to commit as the new baseline.
    Commit(Frame),
}

#[derive(Debug, Clone)]
pub struct Verifier {
    double_verification: bool,
    required_confirmations: u32,
    state: VerificationState,
}

impl Verifier {
    pub fn new(double_verification: bool, required_confirmations: u32) -> Self {
        Self {
            double_verification,
            required_confirmations: required_confirmations.max(1),
            state: VerificationState::Idle,
        }
    }

    pub fn from_config(config: &VerificationConfig) -> Self {
        Self::new(config.double_verification, config.required_confirmations)
    }

    pub fn state(&self) -> &VerificationState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, VerificationState::Idle)
    }

    pub fn confirmations(&self) -> u32 {
        match self.state {
            VerificationState::Idle => 0,
            VerificationState::Verifying { confirmations, .. } => confirmations,
        }
    }

    /// Drop any candidate.
    pub fn reset(&mut self) {
        self.state = VerificationState::Idle;
    }

    /// Feed one prepared frame. The baseline is only consulted while idle.
    pub fn observe(&mut self, detector: &ChangeDetector, baseline: &Frame, frame: Frame) -> Step {
        match std::mem::replace(&mut self.state, VerificationState::Idle) {
            VerificationState::Idle => {
                let verdict = detector.compare(baseline, &frame);
                if !verdict.changed {
                    return Step::Stable;
                }
                if !self.double_verification {
                    info!(method = verdict.method.as_str(), score = verdict.score, "change detected, committing");
                    return Step::Commit(frame);
                }
                info!(
                    method = verdict.method.as_str(),
                    score = verdict.score,
                    "IDLE→VERIFYING: change detected, holding candidate"
                );
                self.state = VerificationState::Verifying {
                    candidate: frame,
                    confirmations: 0,
                    method: verdict.method,
                };
                Step::CandidateOpened
            }
            VerificationState::Verifying {
                candidate,
                confirmations,
                method,
            } => {
                let verdict = detector.compare(&candidate, &frame);
                if verdict.changed {
                    info!(
                        confirmations,
                        score = verdict.score,
                        "VERIFYING→IDLE: candidate unstable, discarded"
                    );
                    return Step::CandidateDiscarded;
                }

                let confirmations = confirmations + 1;
                if confirmations == self.required_confirmations {
                    info!(confirmations, method = method.as_str(), "VERIFYING→IDLE: candidate confirmed");
                    return Step::Commit(candidate);
                }
                debug!(
                    confirmations,
                    required = self.required_confirmations,
                    "candidate stable"
                );
                self.state = VerificationState::Verifying {
                    candidate,
                    confirmations,
                    method,
                };
                Step::Confirmed { confirmations }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slidewatch_common::config::{ComparisonConfig, ComparisonMethod, CropConfig};

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const BLACK: [u8; 4] = [0, 0, 0, 255];

    fn detector() -> ChangeDetector {
        let comparison = ComparisonConfig {
            method: ComparisonMethod::Basic,
            ..ComparisonConfig::default()
        };
        let crop = CropConfig {
            top_percent: 0.0,
            bottom_percent: 0.0,
        };
        ChangeDetector::from_config(&comparison, crop)
    }

    fn baseline() -> Frame {
        Frame::filled(80, 60, WHITE, 0).unwrap()
    }

    fn slide_a() -> Frame {
        let mut f = baseline();
        f.fill_rect(10, 10, 30, 20, BLACK);
        f
    }

    fn slide_b() -> Frame {
        let mut f = baseline();
        f.fill_rect(40, 30, 30, 20, BLACK);
        f
    }

    fn count_commits(steps: &[Step]) -> usize {
        steps.iter().filter(|s| matches!(s, Step::Commit(_))).count()
    }

    #[test]
    fn candidate_commits_after_required_confirmations() {
        let d = detector();
        let mut v = Verifier::new(true, 2);
        let base = baseline();

        let steps: Vec<Step> = [slide_a(), slide_a(), slide_a()]
            .into_iter()
            .map(|f| v.observe(&d, &base, f))
            .collect();

        assert_eq!(steps[0], Step::CandidateOpened);
        assert_eq!(steps[1], Step::Confirmed { confirmations: 1 });
        assert_eq!(steps[2], Step::Commit(slide_a()));
        assert_eq!(count_commits(&steps), 1);
        assert!(v.is_idle());
    }

    #[test]
    fn unstable_candidate_is_discarded() {
        let d = detector();
        let mut v = Verifier::new(true, 2);
        let base = baseline();

        assert_eq!(v.observe(&d, &base, slide_a()), Step::CandidateOpened);
        assert_eq!(v.observe(&d, &base, slide_b()), Step::CandidateDiscarded);
        assert!(v.is_idle());
        assert_eq!(v.confirmations(), 0);
    }

    #[test]
    fn change_resets_confirmations_from_any_point() {
        let d = detector();
        let mut v = Verifier::new(true, 5);
        let base = baseline();

        v.observe(&d, &base, slide_a());
        v.observe(&d, &base, slide_a());
        v.observe(&d, &base, slide_a());
        assert_eq!(v.confirmations(), 2);
        assert_eq!(v.observe(&d, &base, slide_b()), Step::CandidateDiscarded);
        assert_eq!(v.confirmations(), 0);
        assert_eq!(*v.state(), VerificationState::Idle);
    }

    #[test]
    fn exactly_one_commit_per_candidate() {
        let d = detector();
        for required in 1..=4 {
            let mut v = Verifier::new(true, required);
            let base = baseline();
            let steps: Vec<Step> = (0..=required)
                .map(|_| v.observe(&d, &base, slide_a()))
                .collect();
            assert_eq!(count_commits(&steps), 1, "required = {required}");
            assert!(matches!(steps.last(), Some(Step::Commit(_))));
        }
    }

    #[test]
    fn single_verification_commits_immediately() {
        let d = detector();
        let mut v = Verifier::new(false, 2);
        assert_eq!(v.observe(&d, &baseline(), slide_a()), Step::Commit(slide_a()));
        assert!(v.is_idle());
    }

    #[test]
    fn stable_frames_leave_idle_untouched() {
        let d = detector();
        let mut v = Verifier::new(true, 2);
        assert_eq!(v.observe(&d, &baseline(), baseline()), Step::Stable);
        assert!(v.is_idle());
    }
}
