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

//! Process-local load accounting for the load-reporting service.
//!
//! Counters are written from the pick path on arbitrary threads while the
//! orchestration domain adds and removes entries, so the store is backed by
//! concurrent maps and the counters by atomics.  The wire client that turns
//! snapshots into LRS requests lives elsewhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::client::load_balancing::{CallCompleted, PickResult, Picker};
use crate::service::Request;
use crate::xds::locality::Locality;
use crate::xds::orca::{BackendMetricReport, OrcaMetricsListener};

/// Accumulated metric values reported under one name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricValue {
    pub num_reports: u64,
    pub total: f64,
}

/// Call and metric counters for one locality.
///
/// Incremented from the pick path; drained by `snapshot` when a load report
/// is assembled.
#[derive(Debug, Default)]
pub struct ClientLoadCounter {
    calls_in_progress: AtomicI64,
    calls_succeeded: AtomicU64,
    calls_failed: AtomicU64,
    calls_issued: AtomicU64,
    metrics: Mutex<HashMap<String, MetricValue>>,
}

impl ClientLoadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call_started(&self) {
        self.calls_in_progress.fetch_add(1, Ordering::Relaxed);
        self.calls_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_call_finished(&self, succeeded: bool) {
        self.calls_in_progress.fetch_sub(1, Ordering::Relaxed);
        if succeeded {
            self.calls_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.calls_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_metric(&self, name: &str, value: f64) {
        let mut metrics = self.metrics.lock().unwrap();
        let entry = metrics.entry(name.to_string()).or_default();
        entry.num_reports += 1;
        entry.total += value;
    }

    pub fn calls_in_progress(&self) -> i64 {
        self.calls_in_progress.load(Ordering::Relaxed)
    }

    /// Drains the cumulative counters into a snapshot for one reporting
    /// interval.  Calls in progress are reported, not drained.
    pub fn snapshot(&self) -> ClientLoadSnapshot {
        ClientLoadSnapshot {
            calls_in_progress: self.calls_in_progress.load(Ordering::Relaxed),
            calls_succeeded: self.calls_succeeded.swap(0, Ordering::Relaxed),
            calls_failed: self.calls_failed.swap(0, Ordering::Relaxed),
            calls_issued: self.calls_issued.swap(0, Ordering::Relaxed),
            metrics: std::mem::take(&mut *self.metrics.lock().unwrap()),
        }
    }
}

/// One reporting interval's worth of activity for a locality.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientLoadSnapshot {
    pub calls_in_progress: i64,
    pub calls_succeeded: u64,
    pub calls_failed: u64,
    pub calls_issued: u64,
    pub metrics: HashMap<String, MetricValue>,
}

/// Load recorded since the previous snapshot, for the whole cluster.
#[derive(Debug, Default)]
pub struct LoadReportSnapshot {
    pub locality_loads: HashMap<Locality, ClientLoadSnapshot>,
    pub dropped_requests: HashMap<String, u64>,
}

/// Process-local store of per-locality call counters and per-category drop
/// counters.
///
/// The orchestration domain owns the key set: a counter exists for every
/// locality in the balancer map, and removal is deferred until no installed
/// picker can reference it.  Pickers increment concurrently through the
/// wrappers below.
#[derive(Default)]
pub struct LoadStatsStore {
    locality_counters: DashMap<Locality, Arc<ClientLoadCounter>>,
    dropped_requests: DashMap<String, AtomicU64>,
}

impl LoadStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a counter exists for the locality and returns it.  Idempotent:
    /// an existing counter is returned unchanged.
    pub fn add_locality(&self, locality: &Locality) -> Arc<ClientLoadCounter> {
        self.locality_counters
            .entry(locality.clone())
            .or_default()
            .clone()
    }

    /// Removes the locality's counter.  Must only be called once no picker
    /// references the counter; the locality store's deferred-delete protocol
    /// guarantees this.
    pub fn remove_locality(&self, locality: &Locality) {
        self.locality_counters.remove(locality);
    }

    /// The counter for the locality, or None if it has been removed.
    pub fn locality_counter(&self, locality: &Locality) -> Option<Arc<ClientLoadCounter>> {
        self.locality_counters
            .get(locality)
            .map(|c| c.value().clone())
    }

    /// Counts one request dropped under the category, creating the category
    /// on first use.
    pub fn record_dropped_request(&self, category: &str) {
        self.dropped_requests
            .entry(category.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Drains all counters into a report for one interval.
    pub fn snapshot(&self) -> LoadReportSnapshot {
        let locality_loads = self
            .locality_counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        let dropped_requests = self
            .dropped_requests
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().swap(0, Ordering::Relaxed)))
            .collect();
        LoadReportSnapshot {
            locality_loads,
            dropped_requests,
        }
    }
}

/// Wraps a child picker so that every call routed through it is counted
/// against the locality's counter: started at pick time, finished when the
/// call completes.
pub struct LoadRecordingPicker {
    counter: Arc<ClientLoadCounter>,
    delegate: Arc<dyn Picker>,
}

impl LoadRecordingPicker {
    pub fn new(counter: Arc<ClientLoadCounter>, delegate: Arc<dyn Picker>) -> Self {
        Self { counter, delegate }
    }
}

impl Picker for LoadRecordingPicker {
    fn pick(&self, request: &Request) -> PickResult {
        match self.delegate.pick(request) {
            PickResult::Pick(mut pick) => {
                self.counter.record_call_started();
                let counter = self.counter.clone();
                let inner = pick.on_complete.take();
                pick.on_complete = Some(Arc::new(move |completed: &CallCompleted| {
                    if let Some(inner) = &inner {
                        inner(completed);
                    }
                    counter.record_call_finished(completed.status == tonic::Code::Ok);
                }));
                PickResult::Pick(pick)
            }
            other => other,
        }
    }
}

/// Wraps a picker so that backend metrics attached to completed calls are
/// forwarded to a metrics listener.
pub struct MetricsObservingPicker {
    listener: Arc<dyn OrcaMetricsListener>,
    delegate: Arc<dyn Picker>,
}

impl MetricsObservingPicker {
    pub fn new(listener: Arc<dyn OrcaMetricsListener>, delegate: Arc<dyn Picker>) -> Self {
        Self { listener, delegate }
    }
}

impl Picker for MetricsObservingPicker {
    fn pick(&self, request: &Request) -> PickResult {
        match self.delegate.pick(request) {
            PickResult::Pick(mut pick) => {
                let listener = self.listener.clone();
                let inner = pick.on_complete.take();
                pick.on_complete = Some(Arc::new(move |completed: &CallCompleted| {
                    if let Some(inner) = &inner {
                        inner(completed);
                    }
                    if let Some(report) = &completed.backend_metrics {
                        listener.on_load_report(report);
                    }
                }));
                PickResult::Pick(pick)
            }
            other => other,
        }
    }
}

/// Records the contents of backend metric reports into a locality's counter.
pub struct MetricsRecordingListener {
    counter: Arc<ClientLoadCounter>,
}

impl MetricsRecordingListener {
    pub fn new(counter: Arc<ClientLoadCounter>) -> Self {
        Self { counter }
    }
}

impl OrcaMetricsListener for MetricsRecordingListener {
    fn on_load_report(&self, report: &BackendMetricReport) {
        self.counter
            .record_metric("cpu_utilization", report.cpu_utilization);
        self.counter
            .record_metric("mem_utilization", report.mem_utilization);
        for (name, value) in &report.request_cost {
            self.counter.record_metric(name, *value);
        }
        for (name, value) in &report.utilization {
            self.counter.record_metric(name, *value);
        }
    }
}
