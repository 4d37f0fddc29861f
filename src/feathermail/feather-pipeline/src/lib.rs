/*
 * FeatherMail SMTP server framework
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

//! FeatherMail pipeline
//!
//! The per-connection pipeline: the closed registry of adapter kinds, the
//! stage contract and its deterministic dispatch, the reference stage
//! implementations, the transformer sub-pipeline run inside delivery
//! stages, and the hot-reload handle for the pipeline document.

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod reload;
mod spec;
mod stage;

/// The reference stage implementations.
pub mod stages {
    pub mod access;
    pub mod auth;
    pub mod limit;
    pub mod log;
    pub mod route;
}

/// The transformer contract and implementations.
pub mod transform;

pub use reload::{spawn_pipeline_watcher, spawn_server_config_watcher, PipelineHandle};
pub use spec::{PipelineSpec, SessionCtx, StageConfig};
pub use stage::{dispatch, terminate_all, DispatchOutcome, Event, HaltReason, Stage, Verdict};
