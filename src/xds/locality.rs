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

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::client::name_resolution::Endpoint;

/// Identifies a group of endpoints that share a location: a
/// (region, zone, sub-zone) triple.  The primary key for everything in the
/// locality store; equality and hashing are structural, and the derived
/// ordering provides a stable iteration order for reconfiguration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Locality {
    #[serde(default)]
    region: String,
    #[serde(default)]
    zone: String,
    #[serde(default)]
    sub_zone: String,
}

impl Locality {
    pub fn new(
        region: impl Into<String>,
        zone: impl Into<String>,
        sub_zone: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            zone: zone.into(),
            sub_zone: sub_zone.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn sub_zone(&self) -> &str {
        &self.sub_zone
    }
}

impl Display for Locality {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.region, self.zone, self.sub_zone)
    }
}

/// Everything the management server says about one locality: its weight
/// relative to its siblings and the endpoints it contains.  Delivered by the
/// xDS client and immutable once delivered.
#[derive(Clone, Debug)]
pub struct LocalityInfo {
    /// The locality's weight for inter-locality picking.
    pub locality_weight: u32,
    /// The ordered endpoint address groups in this locality.
    pub endpoints: Vec<Endpoint>,
}

/// A server-dictated instruction to fail a fraction of RPCs with a category
/// label, for load shedding.  An ordered list of these forms the drop policy;
/// entries are evaluated in order and the first match wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DropOverload {
    pub category: String,
    /// Fraction of RPCs to drop, in units of 1/1_000_000.
    pub drops_per_million: u32,
}

impl Display for DropOverload {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.drops_per_million)
    }
}
