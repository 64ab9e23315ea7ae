//! Yes/no questions on the terminal for tool approvals and checkpoints

use agentry_agent::{ApprovalCallback, CheckpointCallback};
use serde_json::Value;
use std::io::{BufRead, Write};
use std::sync::Arc;

/// Ask on stderr, read one line from stdin. Anything but y/yes is a no,
/// and so is a closed stdin.
async fn confirm(question: String) -> bool {
    let answer = tokio::task::spawn_blocking(move || {
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{question} [y/N] ");
        let _ = stderr.flush();

        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    })
    .await;

    let answer = answer.ok().flatten().unwrap_or_default();
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

pub fn approval_callback() -> ApprovalCallback {
    Arc::new(|tool: &str, params: &Value| {
        let question = format!("Allow `{tool}` with {params}?");
        Box::pin(confirm(question))
    })
}

pub fn checkpoint_callback() -> CheckpointCallback {
    Arc::new(|step, index, message| {
        let question = format!("[step {} `{}`] {message}", index + 1, step.id);
        Box::pin(confirm(question))
    })
}
