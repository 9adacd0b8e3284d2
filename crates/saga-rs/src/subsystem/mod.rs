//! Signal-driven delegation to isolated sub-loops.
//!
//! A self-contained episode (a combat encounter, a puzzle minigame) takes
//! over the interaction loop, runs against its own internal message log, and
//! hands control back with exactly one condensed record. The controller is
//! an explicit state machine:
//!
//! ```text
//! Idle ──delegate()──▶ Delegated ──sub-loop returns──▶ AwaitingContinuation
//!   ▲                                                        │
//!   └──────────────────── acknowledge() ─────────────────────┘
//! ```
//!
//! Invariants: exactly one synthetic summary message reaches the
//! conversation buffer per delegation, and the sub-loop's raw turns never
//! reach the context assembler. A sub-loop that errors or panics is
//! contained — the caller still receives a fallback summary and a
//! [`ContinuationSignal::Terminate`], never a hang.

use crate::error::{SessionError, SubsystemError};
use crate::session::ConversationBuffer;
use crate::{Message, MessageRole};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::panic::AssertUnwindSafe;
use tracing::{info, warn};

// ── Signals and states ─────────────────────────────────────────────

/// What the main loop should do after a delegated episode ends. Closed enum,
/// consumed by the caller's dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationSignal {
    /// Continue the story, narrating from the episode's outcome.
    ResumeWithNarration,
    /// End the session.
    Terminate,
    /// Reload persisted state before continuing (e.g. after a defeat).
    ReloadState,
}

/// Controller lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    DelegatedToSubsystem,
    AwaitingContinuation,
}

// ── Sub-loop contract ──────────────────────────────────────────────

/// Outcome of a completed episode: the single condensed record plus the
/// signal for the main loop.
#[derive(Debug, Clone)]
pub struct EpisodeOutcome {
    pub summary: String,
    pub signal: ContinuationSignal,
}

/// Future returned by a sub-loop run.
pub type SubsystemFuture<'a> = BoxFuture<'a, Result<EpisodeOutcome, SubsystemError>>;

/// An isolated sub-loop. Gets read access to the conversation buffer for
/// context, keeps its own turns in an internal [`EpisodeLog`], and returns
/// one condensed outcome.
pub trait Subsystem: Send {
    /// Short label for logging and fallback summaries (e.g. `"combat"`).
    fn kind(&self) -> &str;

    fn run<'a>(&'a mut self, buffer: &'a ConversationBuffer) -> SubsystemFuture<'a>;
}

/// Internal message log for a sub-loop's own turns. Deliberately not a
/// [`ConversationBuffer`]: nothing in here is durable or visible to the
/// context assembler — the episode's only trace in the session is the one
/// summary message the controller appends.
#[derive(Debug, Default)]
pub struct EpisodeLog {
    messages: Vec<Message>,
}

impl EpisodeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Render the log for the sub-loop's own condensation step.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for msg in &self.messages {
            out.push_str(&format!("[{}]: {}\n", msg.role, msg.content));
        }
        out
    }
}

// ── Controller ─────────────────────────────────────────────────────

/// State machine transferring control to and from isolated sub-loops.
#[derive(Debug)]
pub struct SubsystemController {
    state: ControllerState,
    delegations: u64,
}

impl Default for SubsystemController {
    fn default() -> Self {
        Self::new()
    }
}

impl SubsystemController {
    pub fn new() -> Self {
        Self {
            state: ControllerState::Idle,
            delegations: 0,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Completed delegations over the controller's lifetime.
    pub fn delegations(&self) -> u64 {
        self.delegations
    }

    /// Run a sub-loop to completion and append its single synthetic summary
    /// message. Returns the episode's continuation signal; the controller is
    /// left in [`ControllerState::AwaitingContinuation`] until
    /// [`acknowledge`](Self::acknowledge) is called.
    ///
    /// A sub-loop error or panic is contained: a fallback summary is
    /// appended and [`ContinuationSignal::Terminate`] is returned.
    pub async fn delegate(
        &mut self,
        buffer: &mut ConversationBuffer,
        subsystem: &mut dyn Subsystem,
    ) -> Result<ContinuationSignal, SessionError> {
        if self.state != ControllerState::Idle {
            return Err(SessionError::State(format!(
                "cannot delegate while {:?}",
                self.state,
            )));
        }
        self.state = ControllerState::DelegatedToSubsystem;
        let kind = subsystem.kind().to_string();
        info!("delegating to '{kind}' subsystem");

        let outcome = match AssertUnwindSafe(subsystem.run(buffer)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!("'{kind}' subsystem failed: {e}; injecting fallback outcome");
                fallback_outcome(&kind, &e.to_string())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!("'{kind}' subsystem panicked: {reason}; injecting fallback outcome");
                fallback_outcome(&kind, &reason)
            }
        };

        // Exactly one synthetic message per delegation. On append failure
        // the state machine returns to Idle so the session stays usable.
        let message = Message::new(MessageRole::Assistant, outcome.summary);
        if let Err(e) = buffer.append(message) {
            self.state = ControllerState::Idle;
            return Err(e.into());
        }

        self.delegations += 1;
        self.state = ControllerState::AwaitingContinuation;
        info!("'{kind}' episode complete: {:?}", outcome.signal);
        Ok(outcome.signal)
    }

    /// The caller has acted on the continuation signal; return to idle.
    pub fn acknowledge(&mut self) -> Result<(), SessionError> {
        if self.state != ControllerState::AwaitingContinuation {
            return Err(SessionError::State(format!(
                "nothing to acknowledge while {:?}",
                self.state,
            )));
        }
        self.state = ControllerState::Idle;
        Ok(())
    }
}

/// Best-effort outcome when a sub-loop dies abnormally.
fn fallback_outcome(kind: &str, reason: &str) -> EpisodeOutcome {
    EpisodeOutcome {
        summary: format!(
            "The {kind} episode ended abruptly and its outcome is uncertain. ({reason})"
        ),
        signal: ContinuationSignal::Terminate,
    }
}

/// Extract a readable message from a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedEpisode {
        outcome: Option<Result<EpisodeOutcome, SubsystemError>>,
    }

    impl ScriptedEpisode {
        fn ok(summary: &str, signal: ContinuationSignal) -> Self {
            Self {
                outcome: Some(Ok(EpisodeOutcome {
                    summary: summary.into(),
                    signal,
                })),
            }
        }

        fn failing(reason: &str) -> Self {
            Self {
                outcome: Some(Err(SubsystemError::Failed(reason.into()))),
            }
        }
    }

    impl Subsystem for ScriptedEpisode {
        fn kind(&self) -> &str {
            "combat"
        }

        fn run<'a>(&'a mut self, _buffer: &'a ConversationBuffer) -> SubsystemFuture<'a> {
            let outcome = self.outcome.take().expect("episode run twice");
            Box::pin(async move { outcome })
        }
    }

    struct PanickingEpisode;

    impl Subsystem for PanickingEpisode {
        fn kind(&self) -> &str {
            "combat"
        }

        fn run<'a>(&'a mut self, _buffer: &'a ConversationBuffer) -> SubsystemFuture<'a> {
            Box::pin(async { panic!("initiative table corrupted") })
        }
    }

    /// A sub-loop that reads session context and keeps its own internal log.
    struct LoggingEpisode;

    impl Subsystem for LoggingEpisode {
        fn kind(&self) -> &str {
            "skirmish"
        }

        fn run<'a>(&'a mut self, buffer: &'a ConversationBuffer) -> SubsystemFuture<'a> {
            Box::pin(async move {
                let mut log = EpisodeLog::new();
                // Context is readable, but these turns stay internal.
                let setting = buffer
                    .tail()
                    .last()
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                log.push(Message::user(format!("ambush near: {setting}")));
                log.push(Message::assistant("two bandits fall, one flees"));
                Ok(EpisodeOutcome {
                    summary: format!(
                        "A short skirmish ({} internal turns): the bandits were driven off.",
                        log.messages().len(),
                    ),
                    signal: ContinuationSignal::ResumeWithNarration,
                })
            })
        }
    }

    fn buffer() -> (tempfile::TempDir, ConversationBuffer) {
        let dir = tempfile::tempdir().unwrap();
        let buffer = ConversationBuffer::open(dir.path(), "framing", 0).unwrap();
        (dir, buffer)
    }

    #[tokio::test]
    async fn delegation_appends_exactly_one_message_and_yields_signal() {
        let (_dir, mut buf) = buffer();
        buf.append(Message::user("we make camp")).unwrap();
        let before = buf.tail().len();

        let mut controller = SubsystemController::new();
        let mut episode = ScriptedEpisode::ok(
            "The wolves were driven back into the dark.",
            ContinuationSignal::ResumeWithNarration,
        );

        let signal = controller.delegate(&mut buf, &mut episode).await.unwrap();
        assert_eq!(signal, ContinuationSignal::ResumeWithNarration);
        assert_eq!(buf.tail().len(), before + 1);
        assert!(buf.tail().last().unwrap().content.contains("wolves"));
        assert_eq!(controller.state(), ControllerState::AwaitingContinuation);

        controller.acknowledge().unwrap();
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(controller.delegations(), 1);
    }

    #[tokio::test]
    async fn failing_episode_still_yields_fallback_signal() {
        let (_dir, mut buf) = buffer();
        let mut controller = SubsystemController::new();
        let mut episode = ScriptedEpisode::failing("dice server unreachable");

        let signal = controller.delegate(&mut buf, &mut episode).await.unwrap();
        assert_eq!(signal, ContinuationSignal::Terminate);
        // The fallback summary is the one synthetic message.
        assert_eq!(buf.tail().len(), 1);
        assert!(buf.tail()[0].content.contains("ended abruptly"));
        assert_eq!(controller.state(), ControllerState::AwaitingContinuation);
    }

    #[tokio::test]
    async fn panicking_episode_is_contained() {
        let (_dir, mut buf) = buffer();
        let mut controller = SubsystemController::new();
        let mut episode = PanickingEpisode;

        let signal = controller.delegate(&mut buf, &mut episode).await.unwrap();
        assert_eq!(signal, ContinuationSignal::Terminate);
        assert_eq!(buf.tail().len(), 1);
        assert!(buf.tail()[0].content.contains("initiative table corrupted"));
    }

    #[tokio::test]
    async fn internal_episode_log_never_reaches_the_buffer() {
        let (_dir, mut buf) = buffer();
        buf.append(Message::assistant("the road narrows")).unwrap();
        let mut controller = SubsystemController::new();
        let mut episode = LoggingEpisode;

        controller.delegate(&mut buf, &mut episode).await.unwrap();
        // One prior message + one synthetic summary; the two internal
        // episode turns are nowhere in the buffer.
        assert_eq!(buf.tail().len(), 2);
        assert!(!buf.tail().iter().any(|m| m.content.contains("ambush near")));
        assert!(buf.tail()[1].content.contains("2 internal turns"));
    }

    #[tokio::test]
    async fn double_delegation_is_rejected_until_acknowledged() {
        let (_dir, mut buf) = buffer();
        let mut controller = SubsystemController::new();
        let mut first = ScriptedEpisode::ok("done", ContinuationSignal::ResumeWithNarration);
        controller.delegate(&mut buf, &mut first).await.unwrap();

        let mut second = ScriptedEpisode::ok("again", ContinuationSignal::Terminate);
        let err = controller.delegate(&mut buf, &mut second).await.unwrap_err();
        assert!(matches!(err, SessionError::State(_)));

        controller.acknowledge().unwrap();
        let mut third = ScriptedEpisode::ok("third", ContinuationSignal::Terminate);
        assert!(controller.delegate(&mut buf, &mut third).await.is_ok());
    }

    #[tokio::test]
    async fn acknowledge_without_delegation_is_an_error() {
        let mut controller = SubsystemController::new();
        assert!(matches!(
            controller.acknowledge(),
            Err(SessionError::State(_)),
        ));
    }
}
