pub mod keys;
pub mod session;
pub mod verify;

pub use session::{CaptureSession, SessionError, TickOutcome};
pub use verify::{Step, VerificationState, Verifier};
