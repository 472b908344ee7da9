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

use std::any::Any;
use std::sync::Arc;

/// An in-memory representation of a service config, usually provided to gRPC
/// as a JSON object.
#[derive(Debug, Default, Clone)]
pub struct ServiceConfig {
    raw: serde_json::Value,
}

impl ServiceConfig {
    /// Parses a service config from its JSON text form.
    pub fn parse(json: &str) -> Result<Self, String> {
        serde_json::from_str(json)
            .map(|raw| Self { raw })
            .map_err(|err| err.to_string())
    }

    /// The `loadBalancingConfig` section, if present.
    pub fn load_balancing_config(&self) -> Option<&serde_json::Value> {
        self.raw.get("loadBalancingConfig")
    }

    /// The full config document.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.raw
    }
}

/// A convenience wrapper for an LB policy's configuration object.
#[derive(Debug, Clone)]
pub struct LbConfig {
    config: Arc<dyn Any + Send + Sync>,
}

impl LbConfig {
    /// Create a new LbConfig wrapper containing the provided config.
    pub fn new(config: impl Any + Send + Sync) -> Self {
        LbConfig {
            config: Arc::new(config),
        }
    }

    /// Convenience method to extract the LB policy's configuration object.
    pub fn convert_to<T: 'static + Send + Sync>(&self) -> Option<Arc<T>> {
        self.config.clone().downcast::<T>().ok()
    }
}
