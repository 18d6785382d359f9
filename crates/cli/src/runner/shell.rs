// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interactive shell detection and environment injection.

use tracing::warn;

/// Program basenames treated as interactive shells.
const SHELLS: &[&str] = &["sh", "bash", "zsh", "ash", "dash", "ksh", "mksh", "fish", "tcsh"];

/// Whether `argv` starts an interactive shell: a known shell program
/// invoked without a command string (`-c`, alone or in a flag cluster).
pub fn is_shell_invocation(argv: &[String]) -> bool {
    let Some(program) = argv.first() else {
        return false;
    };
    let name = program.rsplit('/').next().unwrap_or(program);
    if !SHELLS.contains(&name) {
        return false;
    }
    !argv[1..].iter().any(|arg| {
        arg.strip_prefix('-').is_some_and(|flags| !flags.starts_with('-') && flags.contains('c'))
    })
}

/// Tracks whether the environment has already been injected into the
/// current interactive shell, so re-running into the same container does
/// not inject it twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellSessionState {
    pub last_container_with_env: Option<String>,
    pub shell_session_active: bool,
}

impl ShellSessionState {
    /// Injection is needed unless a shell session that already received the
    /// environment is active in the same container.
    pub fn needs_injection(&self, container_id: &str) -> bool {
        !self.shell_session_active || self.last_container_with_env.as_deref() != Some(container_id)
    }

    /// State after starting a command in `container_id`.
    pub fn entered(&self, container_id: &str, is_shell: bool, injected: bool) -> Self {
        let last_container_with_env = if injected {
            Some(container_id.to_owned())
        } else {
            self.last_container_with_env.clone()
        };
        Self { last_container_with_env, shell_session_active: is_shell }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Quote `value` for a POSIX shell: wrap in single quotes, with embedded
/// single quotes written as `'"'"'`.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

/// Whether `name` is usable as a shell variable name.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Rewrite a shell invocation so it starts with `vars` exported.
///
/// `[sh, args..]` becomes `[sh, -lc, "export K='v'; ..; exec 'sh' args.. '-i'"]`.
/// Variables with invalid names are skipped; with nothing left to export
/// the argv is returned unchanged.
pub fn inject_env(argv: &[String], vars: &[(String, String)]) -> Vec<String> {
    let Some(shell) = argv.first() else {
        return Vec::new();
    };

    let mut script = String::new();
    for (name, value) in vars {
        if !is_valid_name(name) {
            warn!(name = %name, "skipping environment variable with invalid name");
            continue;
        }
        script.push_str(&format!("export {name}={}; ", quote(value)));
    }
    if script.is_empty() {
        return argv.to_vec();
    }

    let mut target: Vec<&str> = argv.iter().map(String::as_str).collect();
    if !target[1..].contains(&"-i") {
        target.push("-i");
    }
    let target: Vec<String> = target.into_iter().map(quote).collect();
    script.push_str("exec ");
    script.push_str(&target.join(" "));

    vec![shell.clone(), "-lc".to_owned(), script]
}

#[cfg(test)]
#[path = "shell_tests.rs"]
mod tests;
