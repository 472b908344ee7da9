/*
 *
 * Copyright 2025 gRPC authors.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

//! The xDS load-balancing data plane.
//!
//! [`LocalityStore`] spreads RPCs across weighted localities, each backed by
//! its own round_robin child policy, applies server-dictated drop policies,
//! and keeps per-locality load statistics in a [`LoadStatsStore`] for the
//! load-reporting service.  The xDS wire client drives the store with
//! locality and drop-policy updates; the store installs pickers into the
//! channel in response.

use thiserror::Error;

pub mod bootstrap;
pub mod load_report;
pub mod locality;
pub mod locality_store;
pub mod orca;
pub mod picker;
pub mod resolver;

pub use load_report::LoadStatsStore;
pub use locality::{DropOverload, Locality, LocalityInfo};
pub use locality_store::LocalityStore;

/// Errors produced by configuration delivered from the management server or
/// discovered at initialization.  These fail the enclosing operation without
/// mutating any installed state.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The LB policy registry has no provider for the fixed child policy.
    #[error("no \"{0}\" LB policy available in the registry")]
    MissingChildPolicy(&'static str),

    /// A drop overload carried a rate outside [0, 1_000_000].
    #[error("drop rate {drops_per_million} per million for category {category:?} is outside [0, 1000000]")]
    DropRateOutOfRange {
        category: String,
        drops_per_million: u32,
    },
}
