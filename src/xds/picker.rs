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

use std::sync::Arc;

use crate::client::load_balancing::{PickResult, Picker};
use crate::service::Request;

/// A source of uniformly distributed integers that is safe to share across
/// the pick path's threads.  Injected so tests can script the draws.
pub trait ThreadSafeRandom: Send + Sync {
    /// Returns a uniform random integer in [0, bound).
    fn next_in_range(&self, bound: u64) -> u64;
}

/// The production random source.  Draws from the thread-local generator, so
/// concurrent picks never contend.
#[derive(Debug, Default)]
pub struct ThreadSafeRandomImpl;

impl ThreadSafeRandom for ThreadSafeRandomImpl {
    fn next_in_range(&self, bound: u64) -> u64 {
        rand::random_range(0..bound)
    }
}

/// A child picker paired with its locality's weight.
pub struct WeightedChildPicker {
    weight: u32,
    picker: Arc<dyn Picker>,
}

impl WeightedChildPicker {
    pub fn new(weight: u32, picker: Arc<dyn Picker>) -> Self {
        Self { weight, picker }
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn picker(&self) -> &Arc<dyn Picker> {
        &self.picker
    }
}

/// Picks across localities in proportion to their weights, delegating each
/// pick to the chosen locality's own picker.
///
/// Only READY localities appear here; the locality store rebuilds the picker
/// whenever the READY set or the weights change.
pub struct InterLocalityPicker {
    weighted_pickers: Vec<WeightedChildPicker>,
    total_weight: u64,
    random: Arc<dyn ThreadSafeRandom>,
}

impl InterLocalityPicker {
    /// Panics if `weighted_pickers` is empty.
    pub fn new(weighted_pickers: Vec<WeightedChildPicker>, random: Arc<dyn ThreadSafeRandom>) -> Self {
        assert!(
            !weighted_pickers.is_empty(),
            "weighted_pickers may not be empty"
        );
        let total_weight = weighted_pickers.iter().map(|wp| wp.weight as u64).sum();
        Self {
            weighted_pickers,
            total_weight,
            random,
        }
    }
}

impl Picker for InterLocalityPicker {
    fn pick(&self, request: &Request) -> PickResult {
        // All weights zero: degenerate to a uniform draw over the children.
        if self.total_weight == 0 {
            let idx = self.random.next_in_range(self.weighted_pickers.len() as u64) as usize;
            return self.weighted_pickers[idx].picker.pick(request);
        }

        let draw = self.random.next_in_range(self.total_weight);
        let mut accumulated = 0u64;
        for wp in &self.weighted_pickers {
            accumulated += wp.weight as u64;
            if draw < accumulated {
                return wp.picker.pick(request);
            }
        }
        unreachable!("draw {draw} not covered by total weight {}", self.total_weight)
    }
}
