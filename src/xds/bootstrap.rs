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

//! Loading of the xDS bootstrap file.
//!
//! The bootstrap file names the management server to talk to and the node
//! identity this client presents to it.  Its location comes from the
//! `GRPC_XDS_BOOTSTRAP` environment variable; a missing or unreadable file is
//! not fatal to the client, which falls back to defaults.

use std::env;
use std::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::xds::locality::Locality;

/// Environment variable naming the bootstrap file.
pub const BOOTSTRAP_PATH_ENV: &str = "GRPC_XDS_BOOTSTRAP";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("environment variable {BOOTSTRAP_PATH_ENV} is not set")]
    NotConfigured,

    #[error("failed to read bootstrap file {path:?}: {source}")]
    Unreadable {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse bootstrap file: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("bootstrap file lists no xDS servers")]
    NoServers,
}

/// The identity this client presents to the management server.  Opaque to the
/// balancing core; the xDS client sends it verbatim on every stream.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Node {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub locality: Option<Locality>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BootstrapFile {
    #[serde(default)]
    xds_servers: Vec<ServerConfig>,
    #[serde(default)]
    node: Node,
}

#[derive(Debug, Deserialize)]
struct ServerConfig {
    server_uri: String,
}

/// The subset of the bootstrap file the balancing core consumes: the first
/// listed management server and the node identity.
#[derive(Clone, Debug)]
pub struct Bootstrap {
    pub server_uri: String,
    pub node: Node,
}

impl Bootstrap {
    /// Loads the bootstrap file named by `GRPC_XDS_BOOTSTRAP`.
    pub fn from_env() -> Result<Self, BootstrapError> {
        let path = env::var(BOOTSTRAP_PATH_ENV).map_err(|_| BootstrapError::NotConfigured)?;
        Self::from_file(&path)
    }

    pub fn from_file(path: &str) -> Result<Self, BootstrapError> {
        let contents = fs::read_to_string(path).map_err(|source| BootstrapError::Unreadable {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, BootstrapError> {
        let file: BootstrapFile = serde_json::from_str(contents)?;
        let server = file
            .xds_servers
            .into_iter()
            .next()
            .ok_or(BootstrapError::NoServers)?;
        Ok(Self {
            server_uri: server.server_uri,
            node: file.node,
        })
    }
}
