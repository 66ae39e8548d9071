//! Suggestion sources
//!
//! A suggester turns a curator's message into a reply: free text plus
//! proposed annotation changes. The core only sees the [`SuggestionSource`]
//! trait; the concrete sources here read a canned reply from disk or run an
//! external command with a bounded timeout.

use crate::reconcile::SuggestionOutput;
use regex::Regex;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

lazy_static::lazy_static! {
    static ref FENCED_JSON: Regex = Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)```").unwrap();
}

/// Error type for suggestion sources
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SuggestionError {
    #[error("suggester unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, SuggestionError>;

/// Anything that can answer a curator's message with proposed changes
pub trait SuggestionSource: Send + Sync {
    fn suggest(&self, message: &str) -> Result<SuggestionOutput>;

    /// Short description for logs
    fn describe(&self) -> String;
}

impl<T: SuggestionSource + ?Sized> SuggestionSource for Box<T> {
    fn suggest(&self, message: &str) -> Result<SuggestionOutput> {
        (**self).suggest(message)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Body of the first fenced code block tagged `json` (or untagged)
pub fn extract_json_block(text: &str) -> Option<&str> {
    FENCED_JSON
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Parse a suggester reply.
///
/// A fenced JSON block wins; text around it becomes the reply text when the
/// JSON carries none. Without a fence the whole reply is tried as JSON, and
/// anything that does not look like JSON is a plain-text answer with no
/// changes.
pub fn parse_reply(reply: &str) -> Result<SuggestionOutput> {
    let unparseable = |e: crate::reconcile::ReconcileError| {
        SuggestionError::Unavailable(format!("unparseable reply: {}", e))
    };

    if let Some(block) = extract_json_block(reply) {
        let mut output = SuggestionOutput::parse(block).map_err(unparseable)?;
        if output.text.trim().is_empty() {
            output.text = FENCED_JSON.replace(reply, "").trim().to_string();
        }
        return Ok(output);
    }

    let trimmed = reply.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return SuggestionOutput::parse(trimmed).map_err(unparseable);
    }
    Ok(SuggestionOutput {
        text: trimmed.to_string(),
        annotations: Vec::new(),
    })
}

/// Replays a reply stored on disk, for offline curation and demos
#[derive(Debug, Clone)]
pub struct FileSuggester {
    path: PathBuf,
}

impl FileSuggester {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SuggestionSource for FileSuggester {
    fn suggest(&self, message: &str) -> Result<SuggestionOutput> {
        tracing::debug!(path = %self.path.display(), message, "reading stored suggestion");
        let reply = std::fs::read_to_string(&self.path).map_err(|e| {
            SuggestionError::Unavailable(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        parse_reply(&reply)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Runs an external program, sending the message on stdin and reading the
/// reply from stdout
#[derive(Debug, Clone)]
pub struct CommandSuggester {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSuggester {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut source) = source {
            let _ = source.read_to_string(&mut buf);
        }
        buf
    })
}

impl SuggestionSource for CommandSuggester {
    fn suggest(&self, message: &str) -> Result<SuggestionOutput> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SuggestionError::Unavailable(format!("cannot start '{}': {}", self.command_line(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let message = message.to_string();
            thread::spawn(move || {
                let _ = stdin.write_all(message.as_bytes());
            });
        }
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(command = %self.command_line(), "suggester timed out");
                    return Err(SuggestionError::Unavailable(format!(
                        "'{}' timed out after {}s",
                        self.command_line(),
                        self.timeout.as_secs_f32()
                    )));
                }
                Ok(None) => thread::sleep(Duration::from_millis(20)),
                Err(e) => return Err(SuggestionError::Unavailable(format!("waiting for '{}': {}", self.command_line(), e))),
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        if !status.success() {
            return Err(SuggestionError::Unavailable(format!(
                "'{}' exited with {}: {}",
                self.command_line(),
                status,
                stderr.trim()
            )));
        }
        parse_reply(&stdout)
    }

    fn describe(&self) -> String {
        format!("command {}", self.command_line())
    }
}

/// Retries another source a bounded number of times
pub struct RetryingSuggester<S> {
    inner: S,
    attempts: u32,
    backoff: Duration,
}

impl<S: SuggestionSource> RetryingSuggester<S> {
    /// `attempts` counts the first try; zero is treated as one
    pub fn new(inner: S, attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            backoff,
        }
    }
}

impl<S: SuggestionSource> SuggestionSource for RetryingSuggester<S> {
    fn suggest(&self, message: &str) -> Result<SuggestionOutput> {
        let mut attempt = 1;
        loop {
            match self.inner.suggest(message) {
                Ok(output) => return Ok(output),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "suggestion failed, retrying");
                    attempt += 1;
                    thread::sleep(self.backoff);
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!("{} (up to {} attempts)", self.inner.describe(), self.attempts)
    }
}
