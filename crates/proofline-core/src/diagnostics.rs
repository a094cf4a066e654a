//! Lean / Lake build output parser.
//!
//! Parsing happens in two phases:
//!
//! 1. [`segment_messages`] splits raw output into messages. `warning:` and
//!    `error:` lines open a message; progress markers (`⚠`, `✖`, `info:`,
//!    `trace:`) close it; other non-empty lines continue it. The generic
//!    `Lean exited with code 1` and `build failed` errors are dropped along
//!    with their trailing lines. Direct `lean` output, where the location
//!    precedes the severity (`File.lean:3:4: error: ...`), also opens a
//!    message.
//! 2. [`DiagnosticsParser::parse`] extracts `<path>.lean:<line>:<col>:` from
//!    each message, stripping any leading `./` segments.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::diagnostic::{Diagnostic, Severity};

const SKIPPED_ERRORS: [&str; 2] = ["Lean exited with code 1", "build failed"];
const CLOSING_MARKERS: [&str; 4] = ["⚠", "✖", "info:", "trace:"];

/// Output kept on the synthetic diagnostic of an unparseable failure.
const TAIL_LINES: usize = 20;

fn located_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^(?:\.*/)*([^:]+\.lean):(\d+):(\d+):\s*(.*)$").ok())
        .as_ref()
}

fn direct_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^((?:\.*/)*[^:\s]+\.lean:\d+:\d+):\s*(error|warning|info):\s*(.*)$").ok()
    })
    .as_ref()
}

/// One segmented message before location parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub severity: Severity,
    /// Message lines joined with `\n`, severity prefix removed.
    pub content: String,
}

/// Phase 1: split raw build output into messages.
pub fn segment_messages(output: &str) -> Vec<RawMessage> {
    let mut messages = Vec::new();
    let mut current: Option<(Severity, Vec<String>)> = None;
    // Set after a skipped generic error; swallows its continuation lines.
    let mut swallowing = false;

    let mut flush = |current: &mut Option<(Severity, Vec<String>)>| {
        if let Some((severity, lines)) = current.take() {
            if !lines.is_empty() {
                messages.push(RawMessage {
                    severity,
                    content: lines.join("\n"),
                });
            }
        }
    };

    for line in output.lines() {
        let line = line.trim();

        if CLOSING_MARKERS.iter().any(|m| line.starts_with(m)) {
            flush(&mut current);
            swallowing = false;
            continue;
        }

        if let Some(rest) = line.strip_prefix("warning:") {
            flush(&mut current);
            swallowing = false;
            current = Some((Severity::Warning, vec![rest.trim().to_string()]));
        } else if let Some(rest) = line.strip_prefix("error:") {
            let rest = rest.trim();
            flush(&mut current);
            if SKIPPED_ERRORS.contains(&rest) {
                swallowing = true;
            } else {
                swallowing = false;
                current = Some((Severity::Error, vec![rest.to_string()]));
            }
        } else if let Some(caps) = direct_re().and_then(|re| re.captures(line)) {
            flush(&mut current);
            swallowing = false;
            let severity = match &caps[2] {
                "error" => Severity::Error,
                "warning" => Severity::Warning,
                _ => Severity::Info,
            };
            current = Some((severity, vec![format!("{}: {}", &caps[1], &caps[3])]));
        } else if !line.is_empty() && !swallowing {
            if let Some((_, lines)) = current.as_mut() {
                lines.push(line.to_string());
            }
        }
    }
    flush(&mut current);
    messages
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticsParserConfig {
    /// Drop warnings and infos.
    pub only_errors: bool,
    /// Keep at most this many diagnostics (0 = unlimited).
    pub max_diagnostics: usize,
}

impl Default for DiagnosticsParserConfig {
    fn default() -> Self {
        Self {
            only_errors: true,
            max_diagnostics: 0,
        }
    }
}

/// Turns raw toolchain output into located [`Diagnostic`]s.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsParser {
    config: DiagnosticsParserConfig,
}

impl DiagnosticsParser {
    pub fn new(config: DiagnosticsParserConfig) -> Self {
        Self { config }
    }

    /// Parse every message in `output`.
    pub fn parse(&self, output: &str) -> Vec<Diagnostic> {
        let mut diagnostics: Vec<Diagnostic> = segment_messages(output)
            .into_iter()
            .filter(|m| !self.config.only_errors || m.severity == Severity::Error)
            .map(locate)
            .collect();

        if self.config.max_diagnostics > 0 {
            diagnostics.truncate(self.config.max_diagnostics);
        }
        diagnostics
    }

    /// Parse the output of a failed check. Never returns an empty list: when
    /// nothing parses, a single error carrying the output tail is produced.
    pub fn parse_failure(&self, output: &str) -> Vec<Diagnostic> {
        let diagnostics = self.parse(output);
        if !diagnostics.is_empty() {
            return diagnostics;
        }

        let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
        let tail = lines[lines.len().saturating_sub(TAIL_LINES)..].join("\n");
        let message = if tail.is_empty() {
            "check failed without output".to_string()
        } else {
            format!("check failed:\n{tail}")
        };
        vec![Diagnostic::error(message).with_excerpt(tail)]
    }
}

fn locate(message: RawMessage) -> Diagnostic {
    let parsed = located_re().and_then(|re| {
        let caps = re.captures(&message.content)?;
        let line = caps[2].parse().ok()?;
        let column = caps[3].parse().ok()?;
        Some((caps[1].to_string(), line, column, caps[4].trim().to_string()))
    });

    match parsed {
        Some((file, line, column, text)) => Diagnostic::new(message.severity, text)
            .with_location(file, line, column)
            .with_excerpt(message.content),
        None => Diagnostic::new(message.severity, message.content.clone())
            .with_excerpt(message.content),
    }
}
