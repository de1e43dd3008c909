//! Narration actor
//!
//! One task owns the [`Narrator`] so lines never overlap. A new line or a
//! cancel preempts whatever is playing.

use tokio::sync::{mpsc, oneshot, watch};

use super::Narrator;
use crate::story::DialogueLine;
use crate::{Error, Result};

enum Command {
    Speak {
        line: DialogueLine,
        done: oneshot::Sender<Result<()>>,
    },
    Cancel,
}

/// Cloneable handle to the narration task
#[derive(Debug, Clone)]
pub struct NarrationHandle {
    tx: mpsc::UnboundedSender<Command>,
    playing: watch::Receiver<bool>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Speak { line, .. } => f.debug_struct("Speak").field("line", line).finish(),
            Self::Cancel => f.write_str("Cancel"),
        }
    }
}

impl NarrationHandle {
    /// Spawn the narration task; it ends when every handle is dropped
    #[must_use]
    pub fn spawn(narrator: Narrator) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (playing_tx, playing) = watch::channel(false);

        tokio::spawn(run(narrator, rx, playing_tx));

        Self { tx, playing }
    }

    /// Speak a line and wait until it finishes
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails, or if the line was
    /// interrupted by a cancel or a newer line
    pub async fn speak(&self, line: DialogueLine) -> Result<()> {
        let (done, result) = oneshot::channel();

        self.tx
            .send(Command::Speak { line, done })
            .map_err(|_| Error::Narration("narration task stopped".to_string()))?;

        result
            .await
            .map_err(|_| Error::Narration("narration task stopped".to_string()))?
    }

    /// Stop whatever is playing
    pub fn cancel(&self) {
        let _ = self.tx.send(Command::Cancel);
    }

    /// Whether a line is playing right now
    #[must_use]
    pub fn is_playing(&self) -> bool {
        *self.playing.borrow()
    }

    /// Watch playback activity
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.playing.clone()
    }
}

async fn run(
    mut narrator: Narrator,
    mut rx: mpsc::UnboundedReceiver<Command>,
    playing: watch::Sender<bool>,
) {
    let mut next = rx.recv().await;

    while let Some(command) = next.take() {
        let Command::Speak { line, done } = command else {
            next = rx.recv().await;
            continue;
        };

        playing.send_replace(true);

        let result = tokio::select! {
            result = narrator.speak(&line) => Some(result),
            preempt = rx.recv() => {
                next = preempt;
                None
            }
        };

        playing.send_replace(false);

        match result {
            Some(result) => {
                if let Err(e) = &result {
                    tracing::warn!(error = %e, speaker = %line.speaker, "narration failed");
                }
                let _ = done.send(result);
                next = rx.recv().await;
            }
            None => {
                tracing::debug!(speaker = %line.speaker, "narration interrupted");
                let _ = done.send(Err(Error::Narration("narration interrupted".to_string())));
            }
        }
    }

    tracing::debug!("narration task stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::narration::{MuteBackend, SilentSink};
    use crate::story::Speaker;

    fn handle(pace: Duration) -> NarrationHandle {
        NarrationHandle::spawn(Narrator::new(
            Arc::new(MuteBackend),
            Box::new(SilentSink::new(pace)),
            8,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn speak_waits_for_playback() {
        let narration = handle(Duration::from_secs(2));
        let started = tokio::time::Instant::now();

        narration
            .speak(DialogueLine::new(Speaker::Mom, "Hello", "warm"))
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(!narration.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_playback() {
        let narration = handle(Duration::from_secs(60));

        let speaking = {
            let narration = narration.clone();
            tokio::spawn(async move {
                narration
                    .speak(DialogueLine::new(Speaker::Dad, "A very long line", "excited"))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(narration.is_playing());

        narration.cancel();
        let result = speaking.await.unwrap();
        assert!(result.is_err());
    }
}
