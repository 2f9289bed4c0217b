// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use crate::app::errors::FatalError;
use crate::app::ports::{ClockPort, ReportPort};
use crate::app::types::CancelSignal;

pub mod collect;
pub mod poll;
pub mod retry;
pub mod shell;
pub mod slurm;
pub mod submit;

/// Collaborators shared by every phase of a run.
#[derive(Clone, Copy)]
pub struct PhaseContext<'a> {
    pub clock: &'a dyn ClockPort,
    pub report: &'a dyn ReportPort,
    pub cancel: &'a CancelSignal,
}

impl PhaseContext<'_> {
    /// Sleep for `duration` unless the run is cancelled first.
    pub async fn pause(&self, duration: Duration) -> Result<(), FatalError> {
        if self.cancel.is_cancelled() {
            return Err(FatalError::Cancelled);
        }
        tokio::select! {
            _ = self.clock.sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(FatalError::Cancelled),
        }
    }
}
