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

//! A name resolver for gRPC target names with the "xds-experimental" scheme.
//!
//! No address discovery happens here: the resolver emits an empty address
//! list together with a service config selecting the xds_experimental LB
//! policy (round_robin as the child policy) and the node identity from the
//! bootstrap file.  The xDS client discovers endpoints itself.

use std::sync::Once;

use serde_json::json;
use tracing::warn;

use crate::attributes::Attributes;
use crate::client::name_resolution::{
    ChannelController, NopResolver, Resolver, ResolverBuilder, ResolverOptions, ResolverUpdate,
    Target, GLOBAL_RESOLVER_REGISTRY,
};
use crate::xds::bootstrap::{Bootstrap, Node};

/// The URI scheme this resolver handles.
pub static XDS_SCHEME: &str = "xds-experimental";
static START: Once = Once::new();

/// Registers the xds-experimental resolver in the global resolver registry.
pub fn reg() {
    START.call_once(|| {
        GLOBAL_RESOLVER_REGISTRY.add_builder(Box::new(XdsResolverBuilder {}));
    });
}

/// The xDS node identity carried in the resolver's output attributes, for
/// consumption by the xDS client.
#[derive(Clone, Debug, PartialEq)]
pub struct XdsNode(pub Node);

pub struct XdsResolverBuilder {}

impl ResolverBuilder for XdsResolverBuilder {
    fn build(&self, target: &Target, _options: ResolverOptions) -> Box<dyn Resolver> {
        if target.authority_host().is_empty() {
            // Surfaced through the channel as build must not fail.
            return Box::new(NopResolver {
                update: ResolverUpdate {
                    endpoints: Err(format!("invalid xDS target {target}: authority is required")),
                    ..Default::default()
                },
            });
        }
        let bootstrap = match Bootstrap::from_env() {
            Ok(bootstrap) => Some(bootstrap),
            Err(err) => {
                warn!("unable to load xDS bootstrap config: {err}");
                None
            }
        };
        Box::new(XdsResolver::new(bootstrap))
    }

    fn scheme(&self) -> &str {
        XDS_SCHEME
    }

    /// The service authority is the authority portion of the target URI.
    fn default_authority(&self, target: &Target) -> String {
        target.authority_host_port()
    }

    fn is_valid_uri(&self, uri: &Target) -> bool {
        !uri.authority_host().is_empty()
    }
}

pub struct XdsResolver {
    service_config_json: String,
    node: Node,
}

impl XdsResolver {
    fn new(bootstrap: Option<Bootstrap>) -> Self {
        let (service_config_json, node) = match bootstrap {
            Some(bootstrap) => (
                service_config_json(Some(&bootstrap.server_uri)),
                bootstrap.node,
            ),
            None => (service_config_json(None), Node::default()),
        };
        Self {
            service_config_json,
            node,
        }
    }
}

impl Resolver for XdsResolver {
    fn resolve_now(&mut self) {
        // The result is fixed; there is nothing to re-resolve.
    }

    fn work(&mut self, channel_controller: &mut dyn ChannelController) {
        let service_config = match channel_controller.parse_service_config(&self.service_config_json)
        {
            Ok(service_config) => service_config,
            Err(err) => {
                // The config text is compile-time authored; failing to parse
                // it is a build bug.
                let _ = channel_controller.update(ResolverUpdate {
                    service_config: Err(format!("UNKNOWN: invalid service config: {err}")),
                    ..Default::default()
                });
                panic!("invalid hard-coded service config: {err}");
            }
        };
        let _ = channel_controller.update(ResolverUpdate {
            // The xDS client discovers endpoints itself.
            endpoints: Ok(vec![]),
            service_config: Ok(Some(service_config)),
            attributes: Attributes::new().add(XdsNode(self.node.clone())),
            resolution_note: None,
        });
    }
}

// The service config selecting the xds_experimental LB policy.  The balancer
// name is filled in from the bootstrap server URI when one is available.
fn service_config_json(balancer_name: Option<&str>) -> String {
    let policy = match balancer_name {
        Some(uri) => json!({
            "xds_experimental": {
                "balancer_name": uri,
                "childPolicy": [{"round_robin": {}}],
            }
        }),
        None => json!({
            "xds_experimental": {
                "childPolicy": [{"round_robin": {}}],
            }
        }),
    };
    json!({ "loadBalancingConfig": [policy] }).to_string()
}
