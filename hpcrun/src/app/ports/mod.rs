// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod file_transfer;
pub mod remote_exec;
pub mod report;

pub use clock::ClockPort;
pub use file_transfer::FileTransferPort;
pub use remote_exec::{ExecCapture, RemoteExecPort};
pub use report::ReportPort;
