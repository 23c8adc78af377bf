//! Character-by-character text reveal.
//!
//! A reveal is a tokio task that walks [`prefixes`] of its text, one per
//! tick, reporting each through a callback. Every reveal ends in exactly one
//! completion: either a [`RevealEvent::Complete`] from the task, or the
//! `Some` returned by [`TypewriterEngine::skip`]. The two race on a shared
//! flag, so only one of them can win.

use std::str::CharIndices;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifies one call to [`TypewriterEngine::reveal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RevealId(u64);

/// Progress of a reveal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealEvent {
    /// A longer prefix is now visible.
    Frame { id: RevealId, text: String },
    /// The whole text is visible; fired once per reveal.
    Complete { id: RevealId, text: String },
}

impl RevealEvent {
    pub fn id(&self) -> RevealId {
        match self {
            RevealEvent::Frame { id, .. } | RevealEvent::Complete { id, .. } => *id,
        }
    }
}

/// Callback for reveal events.
pub type RevealCallback = Arc<dyn Fn(RevealEvent) + Send + Sync>;

/// Iterator over the non-empty prefixes of a string, ending with the string
/// itself. Prefixes always end on a char boundary.
pub struct Prefixes<'a> {
    text: &'a str,
    chars: CharIndices<'a>,
}

impl<'a> Iterator for Prefixes<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.chars
            .next()
            .map(|(start, c)| &self.text[..start + c.len_utf8()])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chars.size_hint()
    }
}

pub fn prefixes(text: &str) -> Prefixes<'_> {
    Prefixes {
        text,
        chars: text.char_indices(),
    }
}

struct ActiveReveal {
    id: RevealId,
    text: String,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

/// Drives at most one reveal at a time.
pub struct TypewriterEngine {
    tick: Duration,
    next_id: u64,
    active: Option<ActiveReveal>,
}

impl TypewriterEngine {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            next_id: 0,
            active: None,
        }
    }

    /// Start revealing `text`, cancelling any reveal still in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub fn reveal(&mut self, text: impl Into<String>, on_event: RevealCallback) -> RevealId {
        self.cancel();

        let id = RevealId(self.next_id);
        self.next_id += 1;

        let text = text.into();
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));

        debug!(?id, chars = text.chars().count(), "Starting reveal");
        tokio::spawn(run_reveal(
            id,
            text.clone(),
            self.tick,
            cancel.clone(),
            Arc::clone(&finished),
            on_event,
        ));

        self.active = Some(ActiveReveal {
            id,
            text,
            cancel,
            finished,
        });
        id
    }

    /// Cancel pending ticks and return the full text as the final state.
    ///
    /// Returns `None` when nothing is revealing or the reveal already
    /// completed on its own. In the latter case its `Complete` event is still
    /// on its way, so the reveal stays current until it is acknowledged.
    pub fn skip(&mut self) -> Option<(RevealId, String)> {
        let active = self.active.as_ref()?;
        active.cancel.cancel();
        if !claim(&active.finished) {
            debug!(id = ?active.id, "Skip after natural completion");
            return None;
        }

        let active = self.active.take()?;
        debug!(id = ?active.id, "Reveal skipped");
        Some((active.id, active.text))
    }

    /// Abandon the current reveal without completing it.
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            active.finished.store(true, Ordering::SeqCst);
        }
    }

    /// Forget a reveal whose completion the owner has consumed.
    pub fn acknowledge(&mut self, id: RevealId) {
        if self.is_current(id) {
            self.active = None;
        }
    }

    /// Whether events tagged `id` still belong to the live reveal.
    pub fn is_current(&self, id: RevealId) -> bool {
        self.active.as_ref().is_some_and(|a| a.id == id)
    }

    /// A reveal is live, or its completion has not been acknowledged yet.
    pub fn is_revealing(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for TypewriterEngine {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Set the finished flag; true for the single caller that flipped it.
fn claim(finished: &AtomicBool) -> bool {
    finished
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

async fn run_reveal(
    id: RevealId,
    text: String,
    tick: Duration,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
    on_event: RevealCallback,
) {
    for (n, prefix) in prefixes(&text).enumerate() {
        if n > 0 {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(tick) => {}
            }
        }
        if cancel.is_cancelled() {
            return;
        }
        on_event(RevealEvent::Frame {
            id,
            text: prefix.to_string(),
        });
    }

    if claim(&finished) {
        on_event(RevealEvent::Complete { id, text });
    }
}
