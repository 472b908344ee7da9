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

//! Load balancing for gRPC.
//!
//! LB policies are responsible for creating connections (modeled as
//! Subchannels) and producing Picker instances for picking connections for
//! RPCs.

use std::error::Error;
use std::fmt::Display;
use std::sync::Arc;

use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::client::name_resolution::{Address, ResolverUpdate};
use crate::client::service_config::LbConfig;
use crate::client::ConnectivityState;
use crate::service::Request;
use crate::xds::orca::BackendMetricReport;

mod registry;
pub mod round_robin;
pub use registry::{LbPolicyRegistry, GLOBAL_LB_REGISTRY};

#[cfg(test)]
pub(crate) mod test_utils;

/// A collection of data configured on the channel that is constructing this
/// LbPolicy.
pub struct LbPolicyOptions {
    /// A hook into the channel's work scheduler that allows the LbPolicy to
    /// request the ability to perform operations on the ChannelController.
    pub work_scheduler: Arc<dyn WorkScheduler>,
}

/// Used to asynchronously request a call into a component's work method if
/// the component needs to provide an update without waiting for an update
/// from the channel first.
///
/// Calling `schedule_work` submits a task into the channel's serialization
/// domain; the channel later invokes the component's `work` method inside
/// that domain.  This is the only way for code outside the domain to enter
/// it, and re-entering from inside simply queues another serialized task.
pub trait WorkScheduler: Send + Sync {
    // Schedules a call into the component's work method.  If there is already
    // a pending work call that has not yet started, this may not schedule
    // another call.
    fn schedule_work(&self);
}

/// An LB policy factory that produces LbPolicy instances used by the channel
/// to manage connections and pick connections for RPCs.
pub trait LbPolicyBuilder: Send + Sync {
    /// Builds and returns a new LB policy instance.
    ///
    /// Note that build must not fail.  Any optional configuration is delivered
    /// via the LbPolicy's resolver_update method.
    ///
    /// An LbPolicy instance is assumed to begin in a Connecting state that
    /// queues RPCs until its first update.
    fn build(&self, options: LbPolicyOptions) -> Box<dyn LbPolicy>;

    /// Reports the name of the LB Policy.
    fn name(&self) -> &'static str;

    /// Parses the JSON LB policy configuration into an internal representation.
    ///
    /// LB policies do not need to accept a configuration, in which case the
    /// default implementation returns Ok(None).
    fn parse_config(
        &self,
        _config: &str,
    ) -> Result<Option<LbConfig>, Box<dyn Error + Send + Sync>> {
        Ok(None)
    }
}

/// An LB policy instance.
pub trait LbPolicy: Send {
    /// Called by the channel when the name resolver produces a new set of
    /// resolved addresses or a new service config.
    fn resolver_update(
        &mut self,
        update: ResolverUpdate,
        config: Option<&LbConfig>,
        channel_controller: &mut dyn ChannelController,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Called by the channel when a subchannel changes state.  The update may
    /// be for a subchannel another policy created; policies must ignore
    /// updates for subchannels they do not own.
    fn subchannel_update(
        &mut self,
        subchannel: &Arc<dyn Subchannel>,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    );

    /// Called by the channel, inside its serialization domain, in response to
    /// a call from the LB policy to the WorkScheduler's schedule_work method.
    fn work(&mut self, channel_controller: &mut dyn ChannelController);
}

/// Controls channel behaviors.
pub trait ChannelController: Send + Sync {
    /// Creates a new subchannel in IDLE state.
    fn new_subchannel(&mut self, address: &Address) -> Arc<dyn Subchannel>;

    /// Provides a new snapshot of the LB policy's state to the channel.
    fn update_picker(&mut self, update: LbState);

    /// Signals the name resolver to attempt to re-resolve addresses.  Typically
    /// used when connections fail, indicating a possible change in the overall
    /// network configuration.
    fn request_resolution(&mut self);
}

/// Represents the current state of a Subchannel.
#[derive(Clone)]
pub struct SubchannelState {
    /// The connectivity state of the subchannel.  See Subchannel for a
    /// description of the various states and their valid transitions.
    pub connectivity_state: ConnectivityState,
    /// Set if connectivity state is TransientFailure to describe the most
    /// recent connection error.  None for any other connectivity_state value.
    pub last_connection_error: Option<Arc<dyn Error + Send + Sync>>,
}

impl Default for SubchannelState {
    fn default() -> Self {
        Self {
            connectivity_state: ConnectivityState::Idle,
            last_connection_error: None,
        }
    }
}

/// A Subchannel represents a method of communicating with a server which may
/// be connected or disconnected many times across its lifetime.
///
/// - Subchannels start IDLE and transition to CONNECTING when connect() is
///   called.
///
/// - CONNECTING transitions to READY on success or TRANSIENT_FAILURE on error.
///
/// - READY transitions to IDLE when the connection is lost.
///
/// When the last reference to a Subchannel is dropped, it is disconnected, and
/// no subsequent state updates will be provided for it to the LB policy.
///
/// Subchannels are handled as `Arc<dyn Subchannel>`; their identity is the
/// identity of the allocation, compared with [`same_subchannel`].
pub trait Subchannel: Send + Sync + Display {
    /// The address this subchannel connects to.
    fn address(&self) -> Address;

    /// Begins connecting, if the subchannel is currently IDLE.
    fn connect(&self);
}

/// Reports whether two subchannel handles refer to the same subchannel.
pub fn same_subchannel(a: &Arc<dyn Subchannel>, b: &Arc<dyn Subchannel>) -> bool {
    Arc::ptr_eq(a, b)
}

/// A Picker is responsible for deciding what Subchannel to use for any given
/// request.  A Picker is only used once for any RPC.  If pick() returns Queue,
/// the channel will queue the RPC until a new Picker is produced by the
/// LbPolicy, and will call pick() on the new Picker for the request.
///
/// Pickers are immutable snapshots: the LB policy replaces the channel's
/// picker wholesale via [`ChannelController::update_picker`], and pick() may
/// be called from any thread, concurrently with LB policy operations.
pub trait Picker: Send + Sync {
    /// Picks a connection to use for the request.
    ///
    /// This function should not block.  If the Picker needs to do blocking or
    /// time-consuming work to service this request, it should return Queue,
    /// and the Pick call will be repeated by the channel when a new Picker is
    /// produced by the LbPolicy.
    fn pick(&self, request: &Request) -> PickResult;
}

pub enum PickResult {
    /// Indicates the Subchannel in the Pick should be used for the request.
    Pick(Pick),
    /// Indicates the LbPolicy is attempting to connect to a server to use for
    /// the request.
    Queue,
    /// Indicates that the request should fail with the included error status
    /// (with the code converted to UNAVAILABLE).  If the RPC is
    /// wait-for-ready, then it will not be terminated, but instead attempted
    /// on a new picker if one is produced before it is cancelled.
    Fail(Status),
    /// Indicates that the request should fail with the included status
    /// immediately, even if the RPC is wait-for-ready.  Used by policies that
    /// intentionally shed load, e.g. to enforce a server-dictated drop rate.
    Drop(Status),
}

impl Display for PickResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PickResult::Pick(pick) => write!(f, "Pick({})", pick.subchannel),
            PickResult::Queue => write!(f, "Queue"),
            PickResult::Fail(status) => write!(f, "Fail({status})"),
            PickResult::Drop(status) => write!(f, "Drop({status})"),
        }
    }
}

/// A collection of data used by the channel for routing a request.
pub struct Pick {
    /// The Subchannel for the request.
    pub subchannel: Arc<dyn Subchannel>,
    /// Metadata to be added to existing outgoing metadata.
    pub metadata: MetadataMap,
    /// Called by the channel when the RPC routed by this pick completes.
    /// Wrapping pickers chain onto this to observe call outcomes.
    pub on_complete: Option<OnComplete>,
}

/// Callback invoked with the outcome of a completed call.
pub type OnComplete = Arc<dyn Fn(&CallCompleted) + Send + Sync>;

/// The outcome of a call routed by a pick.
pub struct CallCompleted {
    /// The final status code of the call.
    pub status: tonic::Code,
    /// Backend metrics attached to the call's trailers, if the backend
    /// reported any.
    pub backend_metrics: Option<BackendMetricReport>,
}

/// Data provided by the LB policy.
#[derive(Clone)]
pub struct LbState {
    pub connectivity_state: ConnectivityState,
    pub picker: Arc<dyn Picker>,
}

impl LbState {
    /// Returns a generic initial LbState which is Connecting and a picker
    /// which queues all picks.
    pub fn initial() -> Self {
        Self {
            connectivity_state: ConnectivityState::Connecting,
            picker: Arc::new(QueuingPicker {}),
        }
    }
}

/// QueuingPicker always returns Queue.  LB policies that are not actively
/// Connecting should not use this picker.
pub struct QueuingPicker {}

impl Picker for QueuingPicker {
    fn pick(&self, _request: &Request) -> PickResult {
        PickResult::Queue
    }
}

/// A picker that fails every pick with UNAVAILABLE and the contained error
/// message.  Used when a policy has no usable connections.
pub struct FailingPicker {
    pub error: String,
}

impl Picker for FailingPicker {
    fn pick(&self, _request: &Request) -> PickResult {
        PickResult::Fail(Status::unavailable(self.error.clone()))
    }
}
