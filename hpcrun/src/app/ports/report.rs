// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// User-facing progress and verdict lines, kept apart from diagnostics logging.
pub trait ReportPort: Send + Sync {
    fn line(&self, text: &str);
}
