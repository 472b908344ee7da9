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

use tonic::metadata::MetadataMap;

/// A collection of data describing an outgoing RPC, handed to pickers so they
/// can route the call.
///
/// Pickers see the request before a connection is chosen, so only routing
/// inputs are available here: the full method name and the outgoing metadata.
#[derive(Debug)]
pub struct Request {
    method: String,
    /// Metadata that will be sent with the RPC.
    pub metadata: MetadataMap,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            metadata: MetadataMap::new(),
        }
    }

    /// The full method name of the RPC, e.g. `/package.Service/Method`.
    pub fn method(&self) -> &str {
        &self.method
    }
}
