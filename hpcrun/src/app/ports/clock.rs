// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
/// Time source boundary for backoff sleeps.
/// Makes polling logic deterministic and testable.
pub trait ClockPort: Send + Sync {
    async fn sleep(&self, duration: Duration);
}
