//! Deployment manifest (`fly.toml`) generated from the configuration.
//!
//! The manifest is regenerated on every deploy and never read back. It holds
//! no secret values: those go through the platform's secret store.

use std::collections::BTreeMap;

use ortho_config::toml;
use serde::Serialize;

use crate::config::Configuration;

/// Manifest file name inside the state directory.
pub(super) const MANIFEST_NAME: &str = "fly.toml";

#[derive(Debug, Serialize)]
pub(super) struct Manifest {
    app: String,
    primary_region: String,
    build: BuildSection,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    services: Vec<Service>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    vm: Vec<VmSection>,
}

#[derive(Debug, Serialize)]
struct BuildSection {
    dockerfile: String,
}

#[derive(Debug, Serialize)]
struct Service {
    internal_port: u16,
    protocol: &'static str,
    auto_stop_machines: &'static str,
    auto_start_machines: bool,
    min_machines_running: u32,
    ports: Vec<ServicePort>,
}

#[derive(Debug, Serialize)]
struct ServicePort {
    port: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    handlers: Vec<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    force_https: bool,
}

#[derive(Debug, Serialize)]
struct VmSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    cpus: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_mb: Option<u32>,
}

impl Manifest {
    /// Builds the manifest for `app`.
    ///
    /// The first port mapping is the editor and is published on 80/443 with
    /// TLS termination; further mappings are raw TCP on their host port.
    pub(super) fn new(
        app: &str,
        config: &Configuration,
        dockerfile: &str,
        env: BTreeMap<String, String>,
    ) -> Self {
        let services = config
            .ports
            .iter()
            .enumerate()
            .map(|(index, mapping)| Service {
                internal_port: mapping.container,
                protocol: "tcp",
                auto_stop_machines: "off",
                auto_start_machines: false,
                min_machines_running: 0,
                ports: if index == 0 {
                    vec![
                        ServicePort {
                            port: 80,
                            handlers: vec!["http"],
                            force_https: true,
                        },
                        ServicePort {
                            port: 443,
                            handlers: vec!["tls", "http"],
                            force_https: false,
                        },
                    ]
                } else {
                    vec![ServicePort {
                        port: mapping.host,
                        handlers: Vec::new(),
                        force_https: false,
                    }]
                },
            })
            .collect();

        let resources = &config.resources;
        let vm = if resources.cpus.is_some() || resources.memory_mb.is_some() {
            vec![VmSection {
                cpus: resources.cpus,
                memory_mb: resources.memory_mb,
            }]
        } else {
            Vec::new()
        };

        Self {
            app: app.to_owned(),
            primary_region: config.remote.region.clone(),
            build: BuildSection {
                dockerfile: dockerfile.to_owned(),
            },
            env,
            services,
            vm,
        }
    }

    /// Renders the manifest as TOML.
    pub(super) fn render(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
