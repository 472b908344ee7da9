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

//! Client-side xDS load balancing for [gRPC], a high performance, open source,
//! universal RPC framework.
//!
//! This crate contains the data-plane half of the xDS client stack: a
//! [`LocalityStore`](xds::LocalityStore) that spreads RPCs across weighted
//! localities through per-locality round-robin children, applies
//! server-dictated drop policies, and records per-locality load for reporting
//! back to the management server, plus the `xds-experimental` name-resolver
//! facade that bootstraps the stack.
//!
//! The xDS wire protocol client that feeds the store is a separate component;
//! it drives the store through
//! [`update_locality_store`](xds::LocalityStore::update_locality_store) and
//! [`update_drop_percentage`](xds::LocalityStore::update_drop_percentage).
//!
//! [gRPC]: https://grpc.io

pub mod attributes;
pub mod client;
pub mod service;
pub mod xds;
