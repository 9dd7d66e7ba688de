//! Serve command: run the host against newline-delimited envelopes on stdin
//!
//! Transport framing and authentication live outside the core; the host
//! consumes one JSON envelope per line and renders progress bus updates on
//! a pinned bar.

use crate::error::{Error, Result};
use crate::events::Envelope;
use crate::host::Host;
use crate::progress::{Phase, Status};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Read envelopes from stdin until EOF
pub async fn cmd_serve(host: &Host) -> Result<()> {
    let components = host.start_once().await?;
    info!(
        "Host ready{}",
        if components.is_degraded() {
            " (vector backend unavailable)"
        } else {
            ""
        }
    );

    let progress_task = {
        let mut rx = components.progress.subscribe();
        tokio::spawn(async move {
            let bar = indexing_bar();
            while let Ok(status) = rx.recv().await {
                render(&bar, &status);
            }
        })
    };

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let envelope = match Envelope::parse(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Malformed frames are dropped after logging.
                warn!("Dropping invalid envelope: {e}");
                continue;
            }
        };

        if let Err(e) = components.handle_envelope(envelope).await {
            match e {
                Error::InvalidEnvelope(ref detail) => {
                    warn!("Dropping invalid envelope: {detail}");
                }
                other => {
                    // The event failed; subsequent events are still processed.
                    warn!("Event failed: {other}");
                }
            }
        }
    }

    progress_task.abort();
    Ok(())
}

fn indexing_bar() -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr_with_hz(10));
    bar.set_style(
        ProgressStyle::with_template("{prefix:>9} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar
}

fn render(bar: &ProgressBar, status: &Status) {
    bar.set_length(status.total as u64);
    bar.set_position(status.done as u64);
    bar.set_prefix(format!("{:?}", status.phase).to_lowercase());

    if let Some(ref error) = status.error {
        bar.set_message(error.clone());
    } else if let Some(ref message) = status.message {
        bar.set_message(message.clone());
    } else if let Some(ref last_file) = status.last_file {
        bar.set_message(last_file.clone());
    }

    if status.phase == Phase::Complete {
        let points = status
            .qdrant_points
            .map(|count| format!(" ({count} points)"))
            .unwrap_or_default();
        bar.println(format!(
            "indexed {}/{}{points}",
            status.done, status.total
        ));
    }
}
