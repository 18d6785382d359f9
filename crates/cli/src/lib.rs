// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod ansi;
pub mod config;
pub mod console;
pub mod error;
pub mod event;
pub mod reassemble;
pub mod runner;
pub mod runtime;
pub mod stream;
pub mod test_support;
