// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io::{self, Write};
use std::sync::Mutex;

use crate::app::ports::ReportPort;

/// Writes progress and verdict lines to stdout.
pub struct ConsoleReporter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleReporter {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl ReportPort for ConsoleReporter {
    fn line(&self, text: &str) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        let result = writeln!(out, "{text}").and_then(|()| out.flush());
        if let Err(err) = result {
            // a closed pipe must not abort the run
            tracing::debug!("failed to write report line: {err}");
        }
    }
}
