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

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use tonic::Status;
use tracing::debug;

use crate::client::load_balancing::{
    ChannelController, FailingPicker, LbPolicy, LbPolicyBuilder, LbPolicyOptions, LbState, Picker,
    PickResult, QueuingPicker, Subchannel, SubchannelState, WorkScheduler, round_robin,
    GLOBAL_LB_REGISTRY, LbPolicyRegistry,
};
use crate::client::name_resolution::{Address, ResolverUpdate};
use crate::client::ConnectivityState;
use crate::service::Request;
use crate::xds::load_report::{
    ClientLoadCounter, LoadRecordingPicker, LoadStatsStore, MetricsObservingPicker,
    MetricsRecordingListener,
};
use crate::xds::locality::{DropOverload, Locality, LocalityInfo};
use crate::xds::orca::OrcaOobReporter;
use crate::xds::picker::{
    InterLocalityPicker, ThreadSafeRandom, ThreadSafeRandomImpl, WeightedChildPicker,
};
use crate::xds::ConfigError;

/// Manages one child round_robin balancer per locality and presents them to
/// the channel as a single weighted picker, with the server's drop policy
/// overlaid on top.
///
/// The xDS client drives the store with locality-map and drop-policy updates;
/// subchannel state changes arrive through [`handle_subchannel_state`].  Every
/// operation must run inside the channel's serialization domain; only the
/// installed pickers and the [`LoadStatsStore`] are touched from other
/// threads.
///
/// [`handle_subchannel_state`]: LocalityStore::handle_subchannel_state
pub struct LocalityStore {
    child_policy_builder: Arc<dyn LbPolicyBuilder>,
    work_scheduler: Arc<dyn WorkScheduler>,
    random: Arc<dyn ThreadSafeRandom>,
    load_stats_store: Arc<LoadStatsStore>,
    // Kept in key-sorted order; rebuilt by update_locality_store.
    children: Vec<LocalityLbInfo>,
    drop_overloads: Arc<[DropOverload]>,
    metrics_report_interval: Option<Duration>,
    // Localities whose counters are erased by the next work() call.
    pending_counter_removals: Vec<Locality>,
}

impl LocalityStore {
    /// Creates a store whose children come from the global LB registry,
    /// registering the round_robin policy there if needed.
    pub fn new(work_scheduler: Arc<dyn WorkScheduler>) -> Result<Self, ConfigError> {
        round_robin::reg();
        Self::with_parts(
            &GLOBAL_LB_REGISTRY,
            work_scheduler,
            Arc::new(ThreadSafeRandomImpl),
            Arc::new(LoadStatsStore::new()),
        )
    }

    /// Creates a store from explicit parts.  Fails if the registry has no
    /// round_robin provider.
    pub fn with_parts(
        registry: &LbPolicyRegistry,
        work_scheduler: Arc<dyn WorkScheduler>,
        random: Arc<dyn ThreadSafeRandom>,
        load_stats_store: Arc<LoadStatsStore>,
    ) -> Result<Self, ConfigError> {
        let child_policy_builder = registry
            .get_policy(round_robin::POLICY_NAME)
            .ok_or(ConfigError::MissingChildPolicy(round_robin::POLICY_NAME))?;
        Ok(Self {
            child_policy_builder,
            work_scheduler,
            random,
            load_stats_store,
            children: vec![],
            drop_overloads: Arc::from([]),
            metrics_report_interval: None,
            pending_counter_removals: vec![],
        })
    }

    /// The store of per-locality load counters, shared with the load
    /// reporting client.
    pub fn load_stats_store(&self) -> Arc<LoadStatsStore> {
        self.load_stats_store.clone()
    }

    /// Shuts down every child balancer and drops every per-locality counter.
    /// Idempotent.  Does not install a new top-level picker; the next update
    /// will.
    pub fn reset(&mut self) {
        debug!(localities = self.children.len(), "resetting locality store");
        for child in self.children.drain(..) {
            // Dropping the child policy releases its subchannels.
            self.load_stats_store.remove_locality(&child.locality);
        }
        for locality in self.pending_counter_removals.drain(..) {
            self.load_stats_store.remove_locality(&locality);
        }
    }

    /// Applies a new locality map from an EDS update.
    ///
    /// Localities absent from the map are shut down immediately (hard
    /// cutover) and their counters scheduled for deferred removal; localities
    /// present in both keep their child balancer and helper, updating only the
    /// weight; new localities get a fresh counter, helper, and child.  Each
    /// child then receives its endpoint list, and the top-level picker is
    /// reinstalled from the children's current states.
    ///
    /// Errors returned by children are collected and returned after the
    /// entire update has been applied.
    pub fn update_locality_store(
        &mut self,
        locality_info_map: HashMap<Locality, LocalityInfo>,
        channel_controller: &mut dyn ChannelController,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut new_localities: Vec<(Locality, LocalityInfo)> =
            locality_info_map.into_iter().collect();
        new_localities.sort_by(|(a, _), (b, _)| a.cmp(b));

        let new_keys: HashSet<Locality> =
            new_localities.iter().map(|(l, _)| l.clone()).collect();

        // Shut down children whose locality disappeared.  No graceful
        // transition: the cutover is hard.
        let mut old_children: HashMap<Locality, LocalityLbInfo> = mem::take(&mut self.children)
            .into_iter()
            .map(|c| (c.locality.clone(), c))
            .collect();
        let mut to_remove: Vec<Locality> = vec![];
        old_children.retain(|locality, _| {
            if new_keys.contains(locality) {
                true
            } else {
                debug!(%locality, "removing locality");
                to_remove.push(locality.clone());
                false
            }
        });

        // Reuse or create a child per new locality, in key order, and deliver
        // its endpoint list.
        let mut errs: Vec<String> = vec![];
        for (locality, info) in new_localities {
            let mut child = match old_children.remove(&locality) {
                Some(mut existing) => {
                    existing.weight = info.locality_weight;
                    existing
                }
                None => {
                    debug!(%locality, weight = info.locality_weight, "adding locality");
                    // The counter must exist before the helper that records
                    // into it.
                    let counter = self.load_stats_store.add_locality(&locality);
                    let child_helper = ChildHelper::new(locality.clone(), counter);
                    let child_policy = self.child_policy_builder.build(LbPolicyOptions {
                        work_scheduler: self.work_scheduler.clone(),
                    });
                    if let Some(interval) = self.metrics_report_interval {
                        child_helper.update_metrics_report_interval(interval);
                    }
                    LocalityLbInfo {
                        locality: locality.clone(),
                        weight: info.locality_weight,
                        child_policy,
                        child_helper,
                    }
                }
            };

            let update = ResolverUpdate {
                endpoints: Ok(info.endpoints),
                ..Default::default()
            };
            let captured = {
                let mut controller = ChildController::new(
                    &mut *channel_controller,
                    &child.child_helper.oob_reporter,
                );
                if let Err(err) = child
                    .child_policy
                    .resolver_update(update, None, &mut controller)
                {
                    errs.push(err.to_string());
                }
                controller.picker_update
            };
            if let Some(state) = captured {
                child
                    .child_helper
                    .update_balancing_state(state.connectivity_state, state.picker);
            }
            self.children.push(child);
        }

        self.install_snapshot(channel_controller);

        // A pick started against the previous picker may still reference a
        // removed locality's counter.  Erasing the counters in a later
        // serialized task keeps those loads recorded; anything after the task
        // runs is dropped on the floor.
        if !to_remove.is_empty() {
            self.pending_counter_removals.extend(to_remove);
            self.work_scheduler.schedule_work();
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(errs.join("; ").into())
        }
    }

    /// Replaces the drop policy and reinstalls the top-level picker so the
    /// drop overlay tracks the new list.  Fails without touching anything if
    /// any rate is outside [0, 1_000_000].
    pub fn update_drop_percentage(
        &mut self,
        drop_overloads: Vec<DropOverload>,
        channel_controller: &mut dyn ChannelController,
    ) -> Result<(), ConfigError> {
        for overload in &drop_overloads {
            if overload.drops_per_million > 1_000_000 {
                return Err(ConfigError::DropRateOutOfRange {
                    category: overload.category.clone(),
                    drops_per_million: overload.drops_per_million,
                });
            }
        }
        debug!(overloads = drop_overloads.len(), "updating drop policy");
        self.drop_overloads = drop_overloads.into();
        self.install_snapshot(channel_controller);
        Ok(())
    }

    /// Broadcasts a subchannel state change to every child balancer.  Each
    /// child ignores subchannels it does not own.
    pub fn handle_subchannel_state(
        &mut self,
        subchannel: &Arc<dyn Subchannel>,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    ) {
        for idx in 0..self.children.len() {
            let captured = {
                let child = &mut self.children[idx];
                let mut controller = ChildController::new(
                    &mut *channel_controller,
                    &child.child_helper.oob_reporter,
                );
                child
                    .child_policy
                    .subchannel_update(subchannel, state, &mut controller);
                controller.picker_update
            };
            if let Some(update) = captured {
                let locality = self.children[idx].locality.clone();
                self.children[idx]
                    .child_helper
                    .update_balancing_state(update.connectivity_state, update.picker);
                self.update_child_state(&locality, channel_controller);
            }
        }
    }

    /// Stores the new out-of-band report interval and pushes it into every
    /// live child's reporting wrapper.  Children created later get it too.
    pub fn update_oob_metrics_report_interval(&mut self, interval: Duration) {
        self.metrics_report_interval = Some(interval);
        for child in &self.children {
            child.child_helper.update_metrics_report_interval(interval);
        }
    }

    /// Runs work the store queued on the channel's serialization domain:
    /// forwards work to children that scheduled it and erases counters of
    /// localities removed by a previous update.
    pub fn work(&mut self, channel_controller: &mut dyn ChannelController) {
        for idx in 0..self.children.len() {
            let captured = {
                let child = &mut self.children[idx];
                let mut controller = ChildController::new(
                    &mut *channel_controller,
                    &child.child_helper.oob_reporter,
                );
                child.child_policy.work(&mut controller);
                controller.picker_update
            };
            if let Some(update) = captured {
                let locality = self.children[idx].locality.clone();
                self.children[idx]
                    .child_helper
                    .update_balancing_state(update.connectivity_state, update.picker);
                self.update_child_state(&locality, channel_controller);
            }
        }
        for locality in mem::take(&mut self.pending_counter_removals) {
            self.load_stats_store.remove_locality(&locality);
        }
    }

    // Reacts to a child's balancing-state report: recomputes the aggregate
    // state and the READY picker set and reinstalls the top-level picker.  A
    // report for a locality that is no longer in the map is a late callback
    // after removal and is ignored.
    fn update_child_state(
        &mut self,
        locality: &Locality,
        channel_controller: &mut dyn ChannelController,
    ) {
        if !self.children.iter().any(|c| &c.locality == locality) {
            return;
        }
        self.install_snapshot(channel_controller);
    }

    // Computes (aggregate state, READY child pickers) from the children's
    // current states and installs the top-level picker.
    fn install_snapshot(&mut self, channel_controller: &mut dyn ChannelController) {
        let mut state: Option<ConnectivityState> = None;
        let mut child_pickers: Vec<WeightedChildPicker> = vec![];
        for child in &self.children {
            let child_state = child.child_helper.current_state;
            state = aggregate_state(state, child_state);
            if child_state == Some(ConnectivityState::Ready) {
                child_pickers.push(WeightedChildPicker::new(
                    child.weight,
                    child.child_helper.current_picker.clone(),
                ));
            }
        }
        self.update_picker(state, child_pickers, channel_controller);
    }

    // Installs the top-level picker for the given aggregate state and READY
    // children.  With no READY children a placeholder serves instead: failing
    // under TRANSIENT_FAILURE, queueing otherwise.  A non-empty drop policy
    // wraps whatever was chosen; a drop policy with no aggregate state yet
    // means the stack is live, so the state is coerced to IDLE.
    fn update_picker(
        &mut self,
        mut state: Option<ConnectivityState>,
        child_pickers: Vec<WeightedChildPicker>,
        channel_controller: &mut dyn ChannelController,
    ) {
        let mut picker: Arc<dyn Picker> = if child_pickers.is_empty() {
            if state == Some(ConnectivityState::TransientFailure) {
                Arc::new(FailingPicker {
                    error: "all localities are in transient failure".to_string(),
                })
            } else {
                Arc::new(QueuingPicker {})
            }
        } else {
            Arc::new(InterLocalityPicker::new(child_pickers, self.random.clone()))
        };

        if !self.drop_overloads.is_empty() {
            picker = Arc::new(DroppablePicker {
                drop_overloads: self.drop_overloads.clone(),
                delegate: picker,
                random: self.random.clone(),
                load_stats_store: self.load_stats_store.clone(),
            });
            if state.is_none() {
                state = Some(ConnectivityState::Idle);
            }
        }

        if let Some(state) = state {
            channel_controller.update_picker(LbState {
                connectivity_state: state,
                picker,
            });
        }
    }

    #[cfg(test)]
    fn oob_report_interval(&self, locality: &Locality) -> Option<Duration> {
        self.children
            .iter()
            .find(|c| &c.locality == locality)
            .and_then(|c| c.child_helper.oob_reporter.report_interval())
    }
}

/// Folds two child connectivity states into an aggregate, favoring READY,
/// then CONNECTING, then IDLE, with TRANSIENT_FAILURE last.  `None` means no
/// state has been reported.  Commutative and associative, so the fold order
/// over children does not matter.
fn aggregate_state(
    overall: Option<ConnectivityState>,
    child: Option<ConnectivityState>,
) -> Option<ConnectivityState> {
    use ConnectivityState::*;
    let Some(overall) = overall else {
        return child;
    };
    if overall == Ready || child == Some(Ready) {
        Some(Ready)
    } else if overall == Connecting || child == Some(Connecting) {
        Some(Connecting)
    } else if overall == Idle || child == Some(Idle) {
        Some(Idle)
    } else {
        Some(overall)
    }
}

/// State of a single locality: its weight and its owned child balancer and
/// helper.
struct LocalityLbInfo {
    locality: Locality,
    weight: u32,
    child_policy: Box<dyn LbPolicy>,
    child_helper: ChildHelper,
}

/// Per-locality adapter between a child balancer and the parent runtime.
///
/// Tracks the child's last-known state and picker; every picker the child
/// produces is wrapped so calls routed through it are recorded against the
/// locality's counter and observed for backend metrics.
struct ChildHelper {
    locality: Locality,
    counter: Arc<ClientLoadCounter>,
    oob_reporter: OrcaOobReporter,
    current_state: Option<ConnectivityState>,
    current_picker: Arc<dyn Picker>,
}

impl ChildHelper {
    fn new(locality: Locality, counter: Arc<ClientLoadCounter>) -> Self {
        let listener = Arc::new(MetricsRecordingListener::new(counter.clone()));
        Self {
            locality,
            counter,
            oob_reporter: OrcaOobReporter::new(listener),
            current_state: None,
            current_picker: Arc::new(QueuingPicker {}),
        }
    }

    // Records the child's new state and wraps its picker: the metrics
    // observer innermost around the child's picker, the load recorder outside
    // it, both bound to the locality's counter.
    fn update_balancing_state(&mut self, state: ConnectivityState, picker: Arc<dyn Picker>) {
        self.current_state = Some(state);
        let observing = MetricsObservingPicker::new(
            Arc::new(MetricsRecordingListener::new(self.counter.clone())),
            picker,
        );
        self.current_picker = Arc::new(LoadRecordingPicker::new(
            self.counter.clone(),
            Arc::new(observing),
        ));
    }

    fn update_metrics_report_interval(&self, interval: Duration) {
        self.oob_reporter.set_report_interval(interval);
    }

    /// The authority for RPCs sent to this locality's backends.  Not yet
    /// consumed by the channel's stream creation path.
    // TODO: switch to the proposed locality_name field when it exists; the
    // sub-zone stands in for it until then.
    #[allow(dead_code)]
    fn authority(&self) -> &str {
        self.locality.sub_zone()
    }
}

// The controller handed to a child balancer for the duration of one call.
// Captures the child's picker update for the store to absorb afterwards and
// registers created subchannels for out-of-band metrics reporting.
struct ChildController<'a> {
    channel_controller: &'a mut dyn ChannelController,
    oob_reporter: &'a OrcaOobReporter,
    picker_update: Option<LbState>,
}

impl<'a> ChildController<'a> {
    fn new(
        channel_controller: &'a mut dyn ChannelController,
        oob_reporter: &'a OrcaOobReporter,
    ) -> Self {
        Self {
            channel_controller,
            oob_reporter,
            picker_update: None,
        }
    }
}

impl ChannelController for ChildController<'_> {
    fn new_subchannel(&mut self, address: &Address) -> Arc<dyn Subchannel> {
        let subchannel = self.channel_controller.new_subchannel(address);
        self.oob_reporter.register_subchannel(&subchannel);
        subchannel
    }

    fn update_picker(&mut self, update: LbState) {
        self.picker_update = Some(update);
    }

    fn request_resolution(&mut self) {
        self.channel_controller.request_resolution();
    }
}

// Overlays the server's drop policy on the picker below it.  Overloads are
// evaluated in order; the first whose rate covers the draw drops the pick.
struct DroppablePicker {
    drop_overloads: Arc<[DropOverload]>,
    delegate: Arc<dyn Picker>,
    random: Arc<dyn ThreadSafeRandom>,
    load_stats_store: Arc<LoadStatsStore>,
}

impl Picker for DroppablePicker {
    fn pick(&self, request: &Request) -> PickResult {
        for overload in self.drop_overloads.iter() {
            let draw = self.random.next_in_range(1_000_000);
            if draw < overload.drops_per_million as u64 {
                self.load_stats_store
                    .record_dropped_request(&overload.category);
                return PickResult::Drop(Status::unavailable(format!(
                    "dropped by load balancer: {overload}"
                )));
            }
        }
        self.delegate.pick(request)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::client::load_balancing::test_utils::{
        self, TestChannelController, TestEvent, TestWorkScheduler,
    };
    use crate::client::name_resolution::{Address, Endpoint};
    use crate::xds::picker::test_random::ScriptedRandom;

    fn setup(
        random: Arc<dyn ThreadSafeRandom>,
    ) -> (
        mpsc::UnboundedReceiver<TestEvent>,
        LocalityStore,
        TestChannelController,
    ) {
        round_robin::reg();
        let (tx_events, rx_events) = mpsc::unbounded_channel();
        let tcc = TestChannelController {
            tx_events: tx_events.clone(),
        };
        let store = LocalityStore::with_parts(
            &GLOBAL_LB_REGISTRY,
            Arc::new(TestWorkScheduler { tx_events }),
            random,
            Arc::new(LoadStatsStore::new()),
        )
        .unwrap();
        (rx_events, store, tcc)
    }

    fn locality(sub_zone: &str) -> Locality {
        Locality::new("region1", "zone1", sub_zone)
    }

    fn info(weight: u32, address: &str) -> LocalityInfo {
        LocalityInfo {
            locality_weight: weight,
            endpoints: vec![Endpoint {
                addresses: vec![Address {
                    address: address.to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    fn ready_state() -> SubchannelState {
        SubchannelState {
            connectivity_state: ConnectivityState::Ready,
            ..Default::default()
        }
    }

    fn failed_state(error: &str) -> SubchannelState {
        SubchannelState {
            connectivity_state: ConnectivityState::TransientFailure,
            last_connection_error: Some(Arc::from(Box::from(error.to_owned()))),
        }
    }

    // Drains NewSubchannel events, skipping the connect requests interleaved
    // with them, and returns the created subchannels.
    async fn collect_subchannels(
        rx_events: &mut mpsc::UnboundedReceiver<TestEvent>,
        count: usize,
    ) -> Vec<Arc<dyn Subchannel>> {
        let mut subchannels = Vec::new();
        while subchannels.len() < count {
            match rx_events.recv().await.unwrap() {
                TestEvent::NewSubchannel(sc) => subchannels.push(sc),
                TestEvent::Connect(_) => continue,
                other => panic!("unexpected event {}", other),
            };
        }
        subchannels
    }

    async fn next_picker_update(rx_events: &mut mpsc::UnboundedReceiver<TestEvent>) -> LbState {
        loop {
            match rx_events.recv().await.unwrap() {
                TestEvent::UpdatePicker(update) => return update,
                TestEvent::Connect(_) => continue,
                other => panic!("unexpected event {}", other),
            }
        }
    }

    async fn expect_schedule_work(rx_events: &mut mpsc::UnboundedReceiver<TestEvent>) {
        match rx_events.recv().await.unwrap() {
            TestEvent::ScheduleWork => {}
            other => panic!("unexpected event {}", other),
        }
    }

    // Picks once and returns the address of the chosen subchannel.
    fn picked_address(picker: &Arc<dyn Picker>) -> String {
        let req = test_utils::new_request();
        match picker.pick(&req) {
            PickResult::Pick(pick) => pick.subchannel.address().address,
            other => panic!("unexpected pick result {}", other),
        }
    }

    #[tokio::test]
    async fn fresh_update_creates_children_and_aggregates() {
        let (mut rx_events, mut store, mut tcc) = setup(Arc::new(ScriptedRandom::new([0])));
        let (a, b) = (locality("a"), locality("b"));
        store
            .update_locality_store(
                HashMap::from([
                    (a.clone(), info(1, "10.0.0.1:80")),
                    (b.clone(), info(2, "10.0.0.2:80")),
                ]),
                &mut tcc,
            )
            .unwrap();

        // Children are built in key order, so the first subchannel belongs to
        // locality a.
        let subchannels = collect_subchannels(&mut rx_events, 2).await;
        assert_eq!(subchannels[0].address().address, "10.0.0.1:80");
        assert_eq!(subchannels[1].address().address, "10.0.0.2:80");

        // Counters exist for both localities as soon as the update returns.
        let stats = store.load_stats_store();
        assert!(stats.locality_counter(&a).is_some());
        assert!(stats.locality_counter(&b).is_some());

        // No child is READY yet: the store queues RPCs.
        let update = next_picker_update(&mut rx_events).await;
        assert_eq!(update.connectivity_state, ConnectivityState::Connecting);
        let req = test_utils::new_request();
        assert!(matches!(update.picker.pick(&req), PickResult::Queue));

        // a becomes READY while b keeps connecting: aggregate is READY and
        // picks go to a only.
        store.handle_subchannel_state(&subchannels[0], &ready_state(), &mut tcc);
        let update = next_picker_update(&mut rx_events).await;
        assert_eq!(update.connectivity_state, ConnectivityState::Ready);
        assert_eq!(picked_address(&update.picker), "10.0.0.1:80");

        // The pick was recorded against a's counter through the
        // load-recording wrapper.
        assert_eq!(stats.locality_counter(&a).unwrap().calls_in_progress(), 1);
        assert_eq!(stats.locality_counter(&b).unwrap().calls_in_progress(), 0);
    }

    #[tokio::test]
    async fn picks_are_weighted_across_ready_localities() {
        let (mut rx_events, mut store, mut tcc) =
            setup(Arc::new(ScriptedRandom::new([0, 1, 2])));
        let (a, b) = (locality("a"), locality("b"));
        store
            .update_locality_store(
                HashMap::from([
                    (a.clone(), info(1, "10.0.0.1:80")),
                    (b.clone(), info(2, "10.0.0.2:80")),
                ]),
                &mut tcc,
            )
            .unwrap();
        let subchannels = collect_subchannels(&mut rx_events, 2).await;

        store.handle_subchannel_state(&subchannels[0], &ready_state(), &mut tcc);
        store.handle_subchannel_state(&subchannels[1], &ready_state(), &mut tcc);

        // Updates: initial Connecting, READY over a, READY over a and b.
        let mut update = next_picker_update(&mut rx_events).await;
        update = next_picker_update(&mut rx_events).await;
        update = next_picker_update(&mut rx_events).await;
        assert_eq!(update.connectivity_state, ConnectivityState::Ready);

        // Total weight 3: draw 0 lands in a's range, 1 and 2 in b's.
        assert_eq!(picked_address(&update.picker), "10.0.0.1:80");
        assert_eq!(picked_address(&update.picker), "10.0.0.2:80");
        assert_eq!(picked_address(&update.picker), "10.0.0.2:80");
    }

    #[tokio::test]
    async fn drop_overlay_drops_and_delegates() {
        let (mut rx_events, mut store, mut tcc) =
            setup(Arc::new(ScriptedRandom::new([100_000, 300_000, 0, 0])));
        let (a, b) = (locality("a"), locality("b"));
        store
            .update_locality_store(
                HashMap::from([
                    (a.clone(), info(1, "10.0.0.1:80")),
                    (b.clone(), info(2, "10.0.0.2:80")),
                ]),
                &mut tcc,
            )
            .unwrap();
        let subchannels = collect_subchannels(&mut rx_events, 2).await;
        store.handle_subchannel_state(&subchannels[0], &ready_state(), &mut tcc);
        store.handle_subchannel_state(&subchannels[1], &ready_state(), &mut tcc);
        for _ in 0..3 {
            next_picker_update(&mut rx_events).await;
        }

        store
            .update_drop_percentage(
                vec![DropOverload {
                    category: "throttle".to_string(),
                    drops_per_million: 250_000,
                }],
                &mut tcc,
            )
            .unwrap();
        let update = next_picker_update(&mut rx_events).await;
        assert_eq!(update.connectivity_state, ConnectivityState::Ready);

        // Draw 100_000 < 250_000: dropped, with the category named and
        // counted.
        let req = test_utils::new_request();
        match update.picker.pick(&req) {
            PickResult::Drop(status) => {
                assert_eq!(status.code(), tonic::Code::Unavailable);
                assert!(status.message().contains("throttle"));
            }
            other => panic!("unexpected pick result {}", other),
        }
        let snapshot = store.load_stats_store().snapshot();
        assert_eq!(snapshot.dropped_requests["throttle"], 1);

        // Draw 300_000 >= 250_000: delegated to the weighted picker, which
        // draws 0 and lands in a.
        assert_eq!(picked_address(&update.picker), "10.0.0.1:80");

        // Clearing the policy removes the overlay: the next pick consumes
        // only the weighted draw.
        store.update_drop_percentage(vec![], &mut tcc).unwrap();
        let update = next_picker_update(&mut rx_events).await;
        assert_eq!(picked_address(&update.picker), "10.0.0.1:80");
        let snapshot = store.load_stats_store().snapshot();
        assert_eq!(snapshot.dropped_requests.get("throttle"), Some(&0));
    }

    #[tokio::test]
    async fn removed_locality_cuts_over_hard() {
        let (mut rx_events, mut store, mut tcc) =
            setup(Arc::new(ScriptedRandom::new([0, 1])));
        let (a, b) = (locality("a"), locality("b"));
        store
            .update_locality_store(
                HashMap::from([
                    (a.clone(), info(1, "10.0.0.1:80")),
                    (b.clone(), info(2, "10.0.0.2:80")),
                ]),
                &mut tcc,
            )
            .unwrap();
        let subchannels = collect_subchannels(&mut rx_events, 2).await;
        store.handle_subchannel_state(&subchannels[0], &ready_state(), &mut tcc);
        store.handle_subchannel_state(&subchannels[1], &ready_state(), &mut tcc);
        for _ in 0..3 {
            next_picker_update(&mut rx_events).await;
        }

        store
            .update_locality_store(
                HashMap::from([(b.clone(), info(2, "10.0.0.2:80"))]),
                &mut tcc,
            )
            .unwrap();

        // b keeps its subchannel, so the only events are the reinstalled
        // picker and the deferred-deletion task.
        let update = next_picker_update(&mut rx_events).await;
        assert_eq!(update.connectivity_state, ConnectivityState::Ready);
        expect_schedule_work(&mut rx_events).await;

        // Every pick lands in b now.
        assert_eq!(picked_address(&update.picker), "10.0.0.2:80");
        assert_eq!(picked_address(&update.picker), "10.0.0.2:80");

        // a's counter survives until the serialized task runs, then is gone.
        let stats = store.load_stats_store();
        assert!(stats.locality_counter(&a).is_some());
        store.work(&mut tcc);
        assert!(stats.locality_counter(&a).is_none());
        assert!(stats.locality_counter(&b).is_some());
    }

    #[tokio::test]
    async fn all_transient_failure_serves_unavailable() {
        let (mut rx_events, mut store, mut tcc) = setup(Arc::new(ScriptedRandom::new([])));
        let (a, b) = (locality("a"), locality("b"));
        store
            .update_locality_store(
                HashMap::from([
                    (a.clone(), info(1, "10.0.0.1:80")),
                    (b.clone(), info(2, "10.0.0.2:80")),
                ]),
                &mut tcc,
            )
            .unwrap();
        let subchannels = collect_subchannels(&mut rx_events, 2).await;

        store.handle_subchannel_state(&subchannels[0], &failed_state("conn reset"), &mut tcc);
        store.handle_subchannel_state(&subchannels[1], &failed_state("conn reset"), &mut tcc);

        // Initial Connecting, then Connecting again with a down, then
        // TRANSIENT_FAILURE once both are down.
        let mut update = next_picker_update(&mut rx_events).await;
        while update.connectivity_state != ConnectivityState::TransientFailure {
            update = next_picker_update(&mut rx_events).await;
        }

        let req = test_utils::new_request();
        match update.picker.pick(&req) {
            PickResult::Fail(status) => assert_eq!(status.code(), tonic::Code::Unavailable),
            other => panic!("unexpected pick result {}", other),
        }
    }

    #[tokio::test]
    async fn weight_change_keeps_children_and_counters() {
        let (mut rx_events, mut store, mut tcc) =
            setup(Arc::new(ScriptedRandom::new([0, 3])));
        let (a, b) = (locality("a"), locality("b"));
        store
            .update_locality_store(
                HashMap::from([
                    (a.clone(), info(1, "10.0.0.1:80")),
                    (b.clone(), info(2, "10.0.0.2:80")),
                ]),
                &mut tcc,
            )
            .unwrap();
        let subchannels = collect_subchannels(&mut rx_events, 2).await;
        store.handle_subchannel_state(&subchannels[0], &ready_state(), &mut tcc);
        store.handle_subchannel_state(&subchannels[1], &ready_state(), &mut tcc);
        for _ in 0..3 {
            next_picker_update(&mut rx_events).await;
        }
        let stats = store.load_stats_store();
        let counter_a = stats.locality_counter(&a).unwrap();

        // Same localities, new weights.
        store
            .update_locality_store(
                HashMap::from([
                    (a.clone(), info(3, "10.0.0.1:80")),
                    (b.clone(), info(1, "10.0.0.2:80")),
                ]),
                &mut tcc,
            )
            .unwrap();

        // No subchannels were created and no deletion was scheduled: the
        // children and counters were reused.
        let update = next_picker_update(&mut rx_events).await;
        assert_eq!(update.connectivity_state, ConnectivityState::Ready);
        assert!(rx_events.try_recv().is_err());
        assert!(Arc::ptr_eq(&counter_a, &stats.locality_counter(&a).unwrap()));

        // Total weight 4: draw 0 lands in a, draw 3 in b.  The subchannel
        // picked for a is the very one created by the first update.
        let req = test_utils::new_request();
        match update.picker.pick(&req) {
            PickResult::Pick(pick) => {
                assert!(crate::client::load_balancing::same_subchannel(
                    &pick.subchannel,
                    &subchannels[0]
                ));
            }
            other => panic!("unexpected pick result {}", other),
        }
        assert_eq!(picked_address(&update.picker), "10.0.0.2:80");
    }

    #[tokio::test]
    async fn reset_then_update_matches_fresh_store() {
        let (mut rx_events, mut store, mut tcc) = setup(Arc::new(ScriptedRandom::new([])));
        let (a, b) = (locality("a"), locality("b"));
        store
            .update_locality_store(
                HashMap::from([
                    (a.clone(), info(1, "10.0.0.1:80")),
                    (b.clone(), info(2, "10.0.0.2:80")),
                ]),
                &mut tcc,
            )
            .unwrap();
        collect_subchannels(&mut rx_events, 2).await;
        next_picker_update(&mut rx_events).await;

        store.reset();
        let stats = store.load_stats_store();
        assert!(stats.locality_counter(&a).is_none());
        assert!(stats.locality_counter(&b).is_none());
        // Idempotent.
        store.reset();

        // The next update builds everything from scratch, subchannels
        // included.
        store
            .update_locality_store(HashMap::from([(a.clone(), info(1, "10.0.0.1:80"))]), &mut tcc)
            .unwrap();
        let subchannels = collect_subchannels(&mut rx_events, 1).await;
        assert_eq!(subchannels[0].address().address, "10.0.0.1:80");
        let update = next_picker_update(&mut rx_events).await;
        assert_eq!(update.connectivity_state, ConnectivityState::Connecting);
        assert!(stats.locality_counter(&a).is_some());
    }

    #[tokio::test]
    async fn empty_endpoint_list_surfaces_child_error() {
        let (mut rx_events, mut store, mut tcc) = setup(Arc::new(ScriptedRandom::new([])));
        let a = locality("a");
        let result = store.update_locality_store(
            HashMap::from([(
                a.clone(),
                LocalityInfo {
                    locality_weight: 1,
                    endpoints: vec![],
                },
            )]),
            &mut tcc,
        );
        assert!(result.is_err());

        // The child requested re-resolution and reported TRANSIENT_FAILURE,
        // which became the aggregate.
        match rx_events.recv().await.unwrap() {
            TestEvent::RequestResolution => {}
            other => panic!("unexpected event {}", other),
        }
        let update = next_picker_update(&mut rx_events).await;
        assert_eq!(
            update.connectivity_state,
            ConnectivityState::TransientFailure
        );
    }

    #[tokio::test]
    async fn drop_policy_without_children_coerces_idle() {
        let (mut rx_events, mut store, mut tcc) =
            setup(Arc::new(ScriptedRandom::new([999_999, 0])));
        store
            .update_drop_percentage(
                vec![DropOverload {
                    category: "lb".to_string(),
                    drops_per_million: 1_000_000,
                }],
                &mut tcc,
            )
            .unwrap();

        let update = next_picker_update(&mut rx_events).await;
        assert_eq!(update.connectivity_state, ConnectivityState::Idle);
        let req = test_utils::new_request();
        assert!(matches!(update.picker.pick(&req), PickResult::Drop(_)));

        // Rate zero never drops; the queueing placeholder shows through.
        store
            .update_drop_percentage(
                vec![DropOverload {
                    category: "never".to_string(),
                    drops_per_million: 0,
                }],
                &mut tcc,
            )
            .unwrap();
        let update = next_picker_update(&mut rx_events).await;
        assert!(matches!(update.picker.pick(&req), PickResult::Queue));
    }

    #[tokio::test]
    async fn out_of_range_drop_rate_is_rejected() {
        let (mut rx_events, mut store, mut tcc) = setup(Arc::new(ScriptedRandom::new([])));
        let result = store.update_drop_percentage(
            vec![DropOverload {
                category: "bad".to_string(),
                drops_per_million: 1_000_001,
            }],
            &mut tcc,
        );
        assert!(matches!(
            result,
            Err(ConfigError::DropRateOutOfRange { .. })
        ));
        // Nothing was installed.
        assert!(rx_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_round_robin_provider_is_fatal() {
        let (tx_events, _rx_events) = mpsc::unbounded_channel();
        let result = LocalityStore::with_parts(
            &LbPolicyRegistry::new(),
            Arc::new(TestWorkScheduler { tx_events }),
            Arc::new(ScriptedRandom::new([])),
            Arc::new(LoadStatsStore::new()),
        );
        assert!(matches!(result, Err(ConfigError::MissingChildPolicy(_))));
    }

    #[tokio::test]
    async fn report_interval_applies_to_current_and_future_children() {
        let (mut rx_events, mut store, mut tcc) = setup(Arc::new(ScriptedRandom::new([])));
        let (a, b) = (locality("a"), locality("b"));
        store
            .update_locality_store(HashMap::from([(a.clone(), info(1, "10.0.0.1:80"))]), &mut tcc)
            .unwrap();
        collect_subchannels(&mut rx_events, 1).await;

        let interval = Duration::from_secs(30);
        store.update_oob_metrics_report_interval(interval);
        assert_eq!(store.oob_report_interval(&a), Some(interval));

        store
            .update_locality_store(
                HashMap::from([
                    (a.clone(), info(1, "10.0.0.1:80")),
                    (b.clone(), info(1, "10.0.0.2:80")),
                ]),
                &mut tcc,
            )
            .unwrap();
        assert_eq!(store.oob_report_interval(&b), Some(interval));
    }

    #[tokio::test]
    async fn late_child_report_after_removal_is_ignored() {
        let (mut rx_events, mut store, mut tcc) = setup(Arc::new(ScriptedRandom::new([])));
        store.update_child_state(&locality("gone"), &mut tcc);
        assert!(rx_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn new_registers_round_robin_in_the_global_registry() {
        let (tx_events, _rx_events) = mpsc::unbounded_channel();
        assert!(LocalityStore::new(Arc::new(TestWorkScheduler { tx_events })).is_ok());
    }

    #[test]
    fn child_helper_authority_is_the_sub_zone() {
        let helper = ChildHelper::new(locality("a"), Arc::new(ClientLoadCounter::new()));
        assert_eq!(helper.authority(), "a");
    }

    #[test]
    fn aggregate_state_prefers_ready_then_connecting_then_idle() {
        use ConnectivityState::*;
        assert_eq!(aggregate_state(None, None), None);
        assert_eq!(aggregate_state(None, Some(Connecting)), Some(Connecting));
        assert_eq!(aggregate_state(Some(TransientFailure), None), Some(TransientFailure));
        assert_eq!(aggregate_state(Some(Ready), Some(TransientFailure)), Some(Ready));
        assert_eq!(aggregate_state(Some(TransientFailure), Some(Ready)), Some(Ready));
        assert_eq!(aggregate_state(Some(Connecting), Some(Idle)), Some(Connecting));
        assert_eq!(aggregate_state(Some(Idle), Some(Connecting)), Some(Connecting));
        assert_eq!(aggregate_state(Some(Idle), Some(TransientFailure)), Some(Idle));
        assert_eq!(
            aggregate_state(Some(TransientFailure), Some(TransientFailure)),
            Some(TransientFailure)
        );

        // The fold is commutative: any order over a set of states agrees.
        let states = [Some(Ready), Some(Idle), Some(TransientFailure), None];
        let forward = states.iter().fold(None, |acc, s| aggregate_state(acc, *s));
        let backward = states
            .iter()
            .rev()
            .fold(None, |acc, s| aggregate_state(acc, *s));
        assert_eq!(forward, Some(Ready));
        assert_eq!(forward, backward);
    }
}
