//! Timed yes/no and free-text prompts.

use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

pub trait Confirmer {
    /// Ask a yes/no question; `default` applies on timeout or closed input.
    fn confirm(&self, question: &str, timeout: Duration, default: bool) -> bool;

    /// Ask for a line of text; `None` on timeout, closed input or empty answer.
    fn ask(&self, question: &str, timeout: Duration) -> Option<String>;
}

/// Interpret an answer to a `[Y/n]` question. Empty means yes.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "" | "y" | "yes"
    )
}

/// Reads answers from stdin on a background thread so prompts can time out.
///
/// Lines typed before a question is asked are discarded.
pub struct StdinConfirmer {
    lines: Receiver<String>,
}

impl StdinConfirmer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self { lines: rx }
    }

    fn read_line(&self, question: &str, timeout: Duration) -> Result<String, RecvTimeoutError> {
        while let Ok(stale) = self.lines.try_recv() {
            debug!(line = %stale, "discarding stale input");
        }
        print!("{question} ");
        if let Err(err) = std::io::stdout().flush() {
            warn!(err = %err, "flush stdout");
        }
        self.lines.recv_timeout(timeout)
    }
}

impl Default for StdinConfirmer {
    fn default() -> Self {
        Self::new()
    }
}

impl Confirmer for StdinConfirmer {
    fn confirm(&self, question: &str, timeout: Duration, default: bool) -> bool {
        match self.read_line(question, timeout) {
            Ok(answer) => is_affirmative(&answer),
            Err(RecvTimeoutError::Timeout) => {
                println!();
                debug!(default, "confirmation timed out");
                default
            }
            Err(RecvTimeoutError::Disconnected) => default,
        }
    }

    fn ask(&self, question: &str, timeout: Duration) -> Option<String> {
        match self.read_line(question, timeout) {
            Ok(answer) if !answer.trim().is_empty() => Some(answer.trim().to_string()),
            Ok(_) => None,
            Err(RecvTimeoutError::Timeout) => {
                println!();
                None
            }
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_yes_answers_are_affirmative() {
        for answer in ["", "y", "Y", " yes ", "YES"] {
            assert!(is_affirmative(answer), "{answer:?}");
        }
        for answer in ["n", "no", "nope", "later"] {
            assert!(!is_affirmative(answer), "{answer:?}");
        }
    }
}
