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

//! Interfaces for [ORCA] backend metrics reporting.
//!
//! Backends report utilization and request cost either out-of-band, as a
//! periodic stream per subchannel, or per-request, attached to call trailers.
//! The transport owns both wire paths; this module carries the report data to
//! listeners and holds the per-child reporting configuration.
//!
//! [ORCA]: https://github.com/envoyproxy/envoy/issues/6614

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::client::load_balancing::Subchannel;

/// A snapshot of a backend's utilization and request costs, as reported by
/// the backend itself.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendMetricReport {
    /// CPU utilization, in [0, 1].
    pub cpu_utilization: f64,
    /// Memory utilization, in [0, 1].
    pub mem_utilization: f64,
    /// Application-specific cost metrics for the request that carried this
    /// report.
    pub request_cost: HashMap<String, f64>,
    /// Application-specific utilization metrics, in [0, 1].
    pub utilization: HashMap<String, f64>,
}

/// Receives backend metric reports, from either the out-of-band or the
/// per-request path.
pub trait OrcaMetricsListener: Send + Sync {
    fn on_load_report(&self, report: &BackendMetricReport);
}

/// Out-of-band reporting state for one child policy.
///
/// Tracks which subchannels belong to the child and the report interval the
/// control plane asked for.  The transport reads both to manage the periodic
/// report streams and delivers arriving reports through [`Self::on_oob_report`].
pub struct OrcaOobReporter {
    listener: Arc<dyn OrcaMetricsListener>,
    report_interval: Mutex<Option<Duration>>,
    subchannels: Mutex<Vec<Weak<dyn Subchannel>>>,
}

impl OrcaOobReporter {
    pub fn new(listener: Arc<dyn OrcaMetricsListener>) -> Self {
        Self {
            listener,
            report_interval: Mutex::new(None),
            subchannels: Mutex::new(vec![]),
        }
    }

    /// Sets the interval at which registered subchannels should be asked for
    /// reports.  Applies to subchannels registered later as well.
    pub fn set_report_interval(&self, interval: Duration) {
        *self.report_interval.lock().unwrap() = Some(interval);
    }

    pub fn report_interval(&self) -> Option<Duration> {
        *self.report_interval.lock().unwrap()
    }

    /// Adds a subchannel to the reporting set.  Dropped subchannels fall out
    /// of the set on the next sweep.
    pub fn register_subchannel(&self, subchannel: &Arc<dyn Subchannel>) {
        let mut subchannels = self.subchannels.lock().unwrap();
        subchannels.retain(|sc| sc.upgrade().is_some());
        subchannels.push(Arc::downgrade(subchannel));
    }

    /// The subchannels currently registered for out-of-band reporting.
    pub fn subchannels(&self) -> Vec<Arc<dyn Subchannel>> {
        self.subchannels
            .lock()
            .unwrap()
            .iter()
            .filter_map(|sc| sc.upgrade())
            .collect()
    }

    /// Delivers an out-of-band report to the listener.  Called by the
    /// transport when a report arrives on a subchannel's report stream.
    pub fn on_oob_report(&self, report: &BackendMetricReport) {
        self.listener.on_load_report(report);
    }
}
