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

//! The round_robin LB policy: connects to every resolved address and spreads
//! RPCs evenly across the connections that are READY.

use std::collections::HashSet;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use tonic::metadata::MetadataMap;
use tracing::debug;

use crate::client::load_balancing::{
    same_subchannel, ChannelController, FailingPicker, LbPolicy, LbPolicyBuilder, LbPolicyOptions,
    LbState, Pick, PickResult, Picker, QueuingPicker, Subchannel, SubchannelState,
    GLOBAL_LB_REGISTRY,
};
use crate::client::name_resolution::{Address, Endpoint, ResolverUpdate};
use crate::client::service_config::LbConfig;
use crate::client::ConnectivityState;
use crate::service::Request;

pub(crate) static POLICY_NAME: &str = "round_robin";
static START: Once = Once::new();

/// Registers round_robin in the global LB policy registry.
pub fn reg() {
    START.call_once(|| {
        GLOBAL_LB_REGISTRY.add_builder(RoundRobinBuilder {});
    });
}

struct RoundRobinBuilder {}

impl LbPolicyBuilder for RoundRobinBuilder {
    fn build(&self, _options: LbPolicyOptions) -> Box<dyn LbPolicy> {
        Box::new(RoundRobinPolicy {
            subchannels: vec![],
            addresses: vec![],
            last_connection_error: None,
        })
    }

    fn name(&self) -> &'static str {
        POLICY_NAME
    }
}

struct SubchannelEntry {
    subchannel: Arc<dyn Subchannel>,
    state: ConnectivityState,
}

struct RoundRobinPolicy {
    subchannels: Vec<SubchannelEntry>,
    addresses: Vec<Address>,
    last_connection_error: Option<Arc<dyn Error + Send + Sync>>,
}

impl RoundRobinPolicy {
    // Flattens the endpoints into the ordered list of their addresses with
    // duplicates removed.
    fn address_list_from_endpoints(endpoints: &[Endpoint]) -> Vec<Address> {
        let mut addresses: Vec<Address> = endpoints
            .iter()
            .flat_map(|ep| ep.addresses.clone())
            .collect();
        let mut uniques = HashSet::new();
        addresses.retain(|a| uniques.insert(a.clone()));
        addresses
    }

    // Sets the policy's state to TRANSIENT_FAILURE with a picker returning the
    // error string provided, then requests re-resolution from the channel.
    fn move_to_transient_failure(
        &mut self,
        error: String,
        channel_controller: &mut dyn ChannelController,
    ) {
        channel_controller.update_picker(LbState {
            connectivity_state: ConnectivityState::TransientFailure,
            picker: Arc::new(FailingPicker { error }),
        });
        channel_controller.request_resolution();
    }

    // Sends an aggregate picker based on the states of the subchannels.
    //
    // If any subchannel is READY, the picker round-robins between all READY
    // subchannels.  Otherwise the state is CONNECTING (or IDLE) with a
    // queueing picker, or TRANSIENT_FAILURE with a failing picker carrying
    // the last connection error.
    fn update_picker(&mut self, channel_controller: &mut dyn ChannelController) {
        let ready: Vec<Arc<dyn Subchannel>> = self
            .subchannels
            .iter()
            .filter(|e| e.state == ConnectivityState::Ready)
            .map(|e| e.subchannel.clone())
            .collect();
        let update = if !ready.is_empty() {
            LbState {
                connectivity_state: ConnectivityState::Ready,
                picker: Arc::new(RoundRobinPicker::new(ready)),
            }
        } else if self
            .subchannels
            .iter()
            .any(|e| e.state == ConnectivityState::Connecting)
        {
            LbState {
                connectivity_state: ConnectivityState::Connecting,
                picker: Arc::new(QueuingPicker {}),
            }
        } else if self
            .subchannels
            .iter()
            .any(|e| e.state == ConnectivityState::Idle)
        {
            LbState {
                connectivity_state: ConnectivityState::Idle,
                picker: Arc::new(QueuingPicker {}),
            }
        } else {
            let error = self
                .last_connection_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "all connections failed".to_string());
            LbState {
                connectivity_state: ConnectivityState::TransientFailure,
                picker: Arc::new(FailingPicker { error }),
            }
        };
        channel_controller.update_picker(update);
    }
}

impl LbPolicy for RoundRobinPolicy {
    fn resolver_update(
        &mut self,
        update: ResolverUpdate,
        _config: Option<&LbConfig>,
        channel_controller: &mut dyn ChannelController,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let endpoints = match update.endpoints {
            Ok(endpoints) => endpoints,
            Err(error) => {
                let err = format!("received error from the name resolver: {error}");
                if self.addresses.is_empty() {
                    // No good previous update to keep using.
                    self.move_to_transient_failure(err.clone(), channel_controller);
                }
                return Err(err.into());
            }
        };

        let new_addresses = Self::address_list_from_endpoints(&endpoints);
        if new_addresses.is_empty() {
            let err = "received empty address list from the name resolver";
            self.subchannels.clear();
            self.addresses.clear();
            self.move_to_transient_failure(err.into(), channel_controller);
            return Err(err.into());
        }

        debug!(addresses = new_addresses.len(), "round_robin address update");

        // Keep the subchannel (and its connectivity state) for every address
        // that survived the update; connect to the new ones.  Subchannels for
        // removed addresses are released when `old` drops.
        let mut old = std::mem::take(&mut self.subchannels);
        self.subchannels = new_addresses
            .iter()
            .map(|address| {
                if let Some(pos) = old.iter().position(|e| e.subchannel.address() == *address) {
                    old.remove(pos)
                } else {
                    let subchannel = channel_controller.new_subchannel(address);
                    subchannel.connect();
                    SubchannelEntry {
                        subchannel,
                        state: ConnectivityState::Connecting,
                    }
                }
            })
            .collect();
        self.addresses = new_addresses;

        self.update_picker(channel_controller);
        Ok(())
    }

    fn subchannel_update(
        &mut self,
        subchannel: &Arc<dyn Subchannel>,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    ) {
        // Updates are broadcast to every policy; ignore subchannels this
        // policy does not own.
        let Some(entry) = self
            .subchannels
            .iter_mut()
            .find(|e| same_subchannel(&e.subchannel, subchannel))
        else {
            return;
        };
        entry.state = state.connectivity_state;
        match state.connectivity_state {
            // Round robin keeps its connections warm.
            ConnectivityState::Idle => entry.subchannel.connect(),
            ConnectivityState::TransientFailure => {
                if let Some(error) = &state.last_connection_error {
                    self.last_connection_error = Some(error.clone());
                }
            }
            _ => {}
        }
        self.update_picker(channel_controller);
    }

    fn work(&mut self, _channel_controller: &mut dyn ChannelController) {}
}

struct RoundRobinPicker {
    subchannels: Vec<Arc<dyn Subchannel>>,
    next: AtomicUsize,
}

impl RoundRobinPicker {
    fn new(subchannels: Vec<Arc<dyn Subchannel>>) -> Self {
        let random_index: usize = rand::random_range(0..subchannels.len());
        Self {
            subchannels,
            next: AtomicUsize::new(random_index),
        }
    }
}

impl Picker for RoundRobinPicker {
    fn pick(&self, _request: &Request) -> PickResult {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.subchannels.len();
        PickResult::Pick(Pick {
            subchannel: self.subchannels[idx].clone(),
            metadata: MetadataMap::new(),
            on_complete: None,
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use crate::client::load_balancing::test_utils::{self, TestChannelController, TestEvent};
    use crate::client::load_balancing::{
        LbPolicy, LbPolicyOptions, LbState, PickResult, Picker, Subchannel, SubchannelState,
        GLOBAL_LB_REGISTRY,
    };
    use crate::client::name_resolution::{Address, Endpoint, ResolverUpdate};
    use crate::client::ConnectivityState;

    fn setup() -> (
        mpsc::UnboundedReceiver<TestEvent>,
        Box<dyn LbPolicy>,
        TestChannelController,
    ) {
        super::reg();
        let (tx_events, rx_events) = mpsc::unbounded_channel();
        let tcc = TestChannelController {
            tx_events: tx_events.clone(),
        };
        let builder = GLOBAL_LB_REGISTRY.get_policy(super::POLICY_NAME).unwrap();
        let lb_policy = builder.build(LbPolicyOptions {
            work_scheduler: Arc::new(test_utils::TestWorkScheduler { tx_events }),
        });
        (rx_events, lb_policy, tcc)
    }

    fn create_endpoints(num_endpoints: usize) -> Vec<Endpoint> {
        (0..num_endpoints)
            .map(|i| Endpoint {
                addresses: vec![Address {
                    address: format!("{}.{}.{}.{}:80", i + 1, i + 1, i + 1, i + 1),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .collect()
    }

    fn send_resolver_update_to_policy(
        lb_policy: &mut dyn LbPolicy,
        endpoints: Vec<Endpoint>,
        tcc: &mut TestChannelController,
    ) {
        let update = ResolverUpdate {
            endpoints: Ok(endpoints),
            ..Default::default()
        };
        let _ = lb_policy.resolver_update(update, None, tcc);
    }

    fn move_subchannel_to_state(
        lb_policy: &mut dyn LbPolicy,
        subchannel: &Arc<dyn Subchannel>,
        state: ConnectivityState,
        tcc: &mut TestChannelController,
    ) {
        lb_policy.subchannel_update(
            subchannel,
            &SubchannelState {
                connectivity_state: state,
                ..Default::default()
            },
            tcc,
        );
    }

    // Drains NewSubchannel events, returning the created subchannels.
    async fn verify_subchannel_creation(
        rx_events: &mut mpsc::UnboundedReceiver<TestEvent>,
        number_of_subchannels: usize,
    ) -> Vec<Arc<dyn Subchannel>> {
        let mut subchannels = Vec::new();
        while subchannels.len() < number_of_subchannels {
            match rx_events.recv().await.unwrap() {
                TestEvent::NewSubchannel(sc) => subchannels.push(sc),
                // Subchannels request connects as they are created; skip those.
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
                // Subchannels request connects when created; skip those.
                TestEvent::Connect(_) => continue,
                other => panic!("unexpected event {}", other),
            }
        }
    }

    fn picked_subchannels(picker: &Arc<dyn Picker>, n: usize) -> Vec<Arc<dyn Subchannel>> {
        let req = test_utils::new_request();
        (0..n)
            .map(|_| match picker.pick(&req) {
                PickResult::Pick(pick) => pick.subchannel,
                other => panic!("unexpected pick result {}", other),
            })
            .collect()
    }

    #[tokio::test]
    async fn roundrobin_picks_are_round_robin() {
        let (mut rx_events, mut lb_policy, mut tcc) = setup();
        send_resolver_update_to_policy(lb_policy.as_mut(), create_endpoints(2), &mut tcc);
        let subchannels = verify_subchannel_creation(&mut rx_events, 2).await;

        move_subchannel_to_state(
            lb_policy.as_mut(),
            &subchannels[0],
            ConnectivityState::Ready,
            &mut tcc,
        );
        move_subchannel_to_state(
            lb_policy.as_mut(),
            &subchannels[1],
            ConnectivityState::Ready,
            &mut tcc,
        );

        // The initial Connecting update and the one-READY update precede the
        // two-READY update.
        let mut update = next_picker_update(&mut rx_events).await;
        while update.connectivity_state != ConnectivityState::Ready {
            update = next_picker_update(&mut rx_events).await;
        }
        update = next_picker_update(&mut rx_events).await;
        assert_eq!(update.connectivity_state, ConnectivityState::Ready);

        let picked = picked_subchannels(&update.picker, 4);
        assert!(
            !Arc::ptr_eq(&picked[0], &picked[1]),
            "should alternate between subchannels"
        );
        assert!(Arc::ptr_eq(&picked[0], &picked[2]));
        assert!(Arc::ptr_eq(&picked[1], &picked[3]));
    }

    #[tokio::test]
    async fn roundrobin_ignores_unowned_subchannels() {
        let (mut rx_events, mut lb_policy, mut tcc) = setup();
        send_resolver_update_to_policy(lb_policy.as_mut(), create_endpoints(1), &mut tcc);
        let _ = verify_subchannel_creation(&mut rx_events, 1).await;
        let _ = next_picker_update(&mut rx_events).await; // initial Connecting

        // A subchannel created by some other policy.
        let (tx_other, _rx_other) = mpsc::unbounded_channel();
        let other: Arc<dyn Subchannel> = Arc::new(test_utils::TestSubchannel::new(
            Address {
                address: "9.9.9.9:80".to_string(),
                ..Default::default()
            },
            tx_other,
        ));
        move_subchannel_to_state(lb_policy.as_mut(), &other, ConnectivityState::Ready, &mut tcc);

        // No picker update may result from the unowned subchannel.
        assert!(rx_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn roundrobin_empty_endpoints_is_transient_failure() {
        let (mut rx_events, mut lb_policy, mut tcc) = setup();
        let update = ResolverUpdate {
            endpoints: Ok(vec![]),
            ..Default::default()
        };
        assert!(lb_policy.resolver_update(update, None, &mut tcc).is_err());
        let update = next_picker_update(&mut rx_events).await;
        assert_eq!(
            update.connectivity_state,
            ConnectivityState::TransientFailure
        );
        let req = test_utils::new_request();
        match update.picker.pick(&req) {
            PickResult::Fail(status) => {
                assert_eq!(status.code(), tonic::Code::Unavailable);
                assert!(status.message().contains("empty address list"));
            }
            other => panic!("unexpected pick result {}", other),
        }
    }

    #[tokio::test]
    async fn roundrobin_all_transient_failure_reports_last_error() {
        let (mut rx_events, mut lb_policy, mut tcc) = setup();
        send_resolver_update_to_policy(lb_policy.as_mut(), create_endpoints(1), &mut tcc);
        let subchannels = verify_subchannel_creation(&mut rx_events, 1).await;

        lb_policy.subchannel_update(
            &subchannels[0],
            &SubchannelState {
                connectivity_state: ConnectivityState::TransientFailure,
                last_connection_error: Some(Arc::from(Box::from("connection refused".to_owned()))),
            },
            &mut tcc,
        );

        let mut update = next_picker_update(&mut rx_events).await;
        while update.connectivity_state != ConnectivityState::TransientFailure {
            update = next_picker_update(&mut rx_events).await;
        }
        let req = test_utils::new_request();
        match update.picker.pick(&req) {
            PickResult::Fail(status) => {
                assert!(status.message().contains("connection refused"));
            }
            other => panic!("unexpected pick result {}", other),
        }
    }
}
