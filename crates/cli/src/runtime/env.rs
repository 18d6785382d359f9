// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

/// Source of the environment variables exported into freshly entered shells.
pub trait EnvironmentProvider: Send + Sync + 'static {
    fn load_variables(&self) -> BoxFuture<'_, Vec<(String, String)>>;
}

/// Fixed variable set.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    vars: Vec<(String, String)>,
}

impl StaticEnvironment {
    pub fn new(vars: Vec<(String, String)>) -> Self {
        Self { vars }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl EnvironmentProvider for StaticEnvironment {
    fn load_variables(&self) -> BoxFuture<'_, Vec<(String, String)>> {
        let vars = self.vars.clone();
        Box::pin(async move { vars })
    }
}

/// Dotenv-format file, re-read on every load so edits apply to the next shell.
#[derive(Debug, Clone)]
pub struct EnvFileEnvironment {
    path: PathBuf,
}

impl EnvFileEnvironment {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EnvironmentProvider for EnvFileEnvironment {
    fn load_variables(&self) -> BoxFuture<'_, Vec<(String, String)>> {
        let path = self.path.clone();
        Box::pin(async move {
            let loaded = tokio::task::spawn_blocking(move || read_env_file(&path)).await;
            match loaded {
                Ok(vars) => vars,
                Err(e) => {
                    warn!("env file loader panicked: {e}");
                    Vec::new()
                }
            }
        })
    }
}

fn read_env_file(path: &Path) -> Vec<(String, String)> {
    if !path.exists() {
        debug!(path = %path.display(), "env file missing, injecting nothing");
        return Vec::new();
    }
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) => {
            warn!(path = %path.display(), "failed to open env file: {e}");
            return Vec::new();
        }
    };
    let mut vars = Vec::new();
    for item in iter {
        match item {
            Ok(var) => vars.push(var),
            Err(dotenvy::Error::Io(e)) => {
                warn!(path = %path.display(), "failed to read env file: {e}");
                break;
            }
            Err(e) => warn!(path = %path.display(), "skipping env file entry: {e}"),
        }
    }
    vars
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
