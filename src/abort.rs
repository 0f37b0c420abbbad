//! Operator-confirmed cancellation.
//!
//! An interrupt moves the run from [`AbortState::Running`] to
//! [`AbortState::AbortPending`] and opens a confirmation prompt. Only a
//! confirmed abort stops new instances from starting; running instances and
//! the cleanup pass are never cut short.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Question printed when the operator interrupts a run.
pub const PROMPT: &str = "Abort? (y/N): ";

/// Tri-state abort flag.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AbortState {
    /// Normal operation.
    #[default]
    Running,
    /// Interrupt received; waiting for the operator's answer.
    AbortPending,
    /// The operator confirmed; queued instances are dropped.
    AbortConfirmed,
}

/// Shared handle on the run's abort state.
///
/// Clones observe and mutate the same state.
#[derive(Clone, Debug)]
pub struct AbortSignal {
    state: Arc<watch::Sender<AbortState>>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    /// Creates a signal in [`AbortState::Running`].
    #[must_use]
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(AbortState::Running);
        Self {
            state: Arc::new(sender),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AbortState {
        *self.state.borrow()
    }

    /// Returns `true` once an abort has been confirmed.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.state() == AbortState::AbortConfirmed
    }

    /// Moves `Running` to `AbortPending`. Returns `false` (and changes
    /// nothing) in any other state.
    #[must_use]
    pub fn request(&self) -> bool {
        self.transition(AbortState::Running, AbortState::AbortPending)
    }

    /// Confirms the abort. Confirmation is final.
    pub fn confirm(&self) {
        self.state.send_if_modified(|state| {
            let changed = *state != AbortState::AbortConfirmed;
            *state = AbortState::AbortConfirmed;
            changed
        });
    }

    /// Returns a pending abort to `Running`.
    #[must_use]
    pub fn decline(&self) -> bool {
        self.transition(AbortState::AbortPending, AbortState::Running)
    }

    /// Watches state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AbortState> {
        self.state.subscribe()
    }

    fn transition(&self, from: AbortState, to: AbortState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}

/// Asks the operator whether to abort.
pub trait AbortPrompt: Send + Sync {
    /// Resolves to `true` when the operator confirms.
    fn confirm(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}

/// Prompt on stderr, answer on stdin.
///
/// End of input or a read failure counts as confirmation.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdinPrompt;

impl AbortPrompt for StdinPrompt {
    fn confirm(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async {
            let mut stderr = tokio::io::stderr();
            if let Err(err) = stderr.write_all(PROMPT.as_bytes()).await {
                debug!(error = %err, "failed to print abort prompt");
            }
            if let Err(err) = stderr.flush().await {
                debug!(error = %err, "failed to flush abort prompt");
            }

            let mut line = String::new();
            match BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
                Ok(0) | Err(_) => true,
                Ok(_) => parse_answer(&line),
            }
        })
    }
}

/// Interprets an answer to [`PROMPT`]: `y` or `yes`, case-insensitive.
#[must_use]
pub fn parse_answer(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Handles one interrupt.
///
/// Returns `None` when the interrupt is ignored because a prompt is already
/// open or the abort is already confirmed. Otherwise the prompt runs on its
/// own task so further interrupts are observed (and ignored) while the
/// operator answers.
#[must_use]
pub fn on_interrupt<P>(signal: &AbortSignal, prompt: &Arc<P>) -> Option<JoinHandle<AbortState>>
where
    P: AbortPrompt + ?Sized + 'static,
{
    if !signal.request() {
        debug!(state = ?signal.state(), "interrupt ignored");
        return None;
    }

    let signal = signal.clone();
    let prompt = Arc::clone(prompt);
    Some(tokio::spawn(async move {
        if prompt.confirm().await {
            signal.confirm();
            warn!("abort confirmed: no new instances will be started");
        } else if signal.decline() {
            info!("abort declined: continuing");
        }
        signal.state()
    }))
}

/// Listens for Ctrl-C for the rest of the process lifetime and routes each
/// interrupt through [`on_interrupt`].
#[must_use]
pub fn spawn_interrupt_listener<P>(signal: AbortSignal, prompt: Arc<P>) -> JoinHandle<()>
where
    P: AbortPrompt + ?Sized + 'static,
{
    tokio::spawn(async move {
        loop {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "cannot listen for interrupts");
                return;
            }
            drop(on_interrupt(&signal, &prompt));
        }
    })
}
