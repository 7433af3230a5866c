//! "Connecting" ticker shown on the status message while a remote call is out.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    messaging::port::MessagingPort,
    progress::{render_or_resend, Fallback, RenderOutcome},
    session::Session,
};

pub const LOADING_FRAMES: [&str; 6] = [
    "🔄 Connecting •••",
    "🔄 Connecting ••○",
    "🔄 Connecting •○○",
    "🔄 Connecting ○○○",
    "🔄 Connecting ○○•",
    "🔄 Connecting ○••",
];

/// Spawns animation tasks; one live task per session at most.
#[derive(Clone)]
pub struct ProgressAnimator {
    messenger: Arc<dyn MessagingPort>,
    frame_interval: Duration,
    flood_buffer: Duration,
}

/// Ownership of a running animation task.
pub struct AnimatorHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressAnimator {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        frame_interval: Duration,
        flood_buffer: Duration,
    ) -> Self {
        Self {
            messenger,
            frame_interval,
            flood_buffer,
        }
    }

    pub fn start(&self, session: Arc<Session>) -> AnimatorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let animator = self.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = animator.run(&session) => {}
            }
        });
        AnimatorHandle { cancel, handle }
    }

    async fn run(&self, session: &Session) {
        let mut frame_index = 0usize;
        loop {
            let frame = LOADING_FRAMES[frame_index % LOADING_FRAMES.len()];
            let html = format!("<b>{frame}</b>");
            match render_or_resend(&*self.messenger, session, &html, Fallback::MissingMessage)
                .await
            {
                RenderOutcome::Edited | RenderOutcome::Unchanged | RenderOutcome::Resent => {
                    sleep(self.frame_interval).await;
                }
                RenderOutcome::RateLimited(wait) => {
                    sleep(wait + self.flood_buffer).await;
                }
                RenderOutcome::Failed(e) => {
                    debug!(user_id = session.user_id.0, error = %e, "animation stopped");
                    return;
                }
            }
            frame_index = frame_index.wrapping_add(1);
        }
    }
}

impl AnimatorHandle {
    /// Cancel the task and wait until it has exited.
    ///
    /// Never fails: a task that already finished, was cancelled, or panicked
    /// all count as stopped.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                debug!(error = %e, "animation task ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
