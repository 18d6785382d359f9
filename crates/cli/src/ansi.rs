// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// CSI sequences, OSC sequences (BEL or ST terminated), two-byte escapes,
/// bare BEL and CR.
static ANSI_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\x1b\[[0-?]*[ -/]*[@-~]",
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
        r"|\x1b[0-?@-Z\\-_]",
        r"|\x07",
        r"|\r",
    ))
    .ok()
});

/// Strips terminal control sequences from log lines.
///
/// Only log output goes through here; exec output keeps its control bytes
/// so shell prompts render faithfully.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiSanitizer;

impl AnsiSanitizer {
    pub fn clean(line: &str) -> Cow<'_, str> {
        match ANSI_PATTERN.as_ref() {
            Some(re) => re.replace_all(line, ""),
            None => Cow::Borrowed(line),
        }
    }

    /// True when a cleaned line carries nothing worth displaying.
    pub fn is_blank(line: &str) -> bool {
        line.trim().is_empty()
    }
}

#[cfg(test)]
#[path = "ansi_tests.rs"]
mod tests;
