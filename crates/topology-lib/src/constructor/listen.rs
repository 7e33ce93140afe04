//! Matching connections to the instances that listen on their destination
//!
//! Listens on a loopback address are keyed by the node name instead of the
//! IP, so processes on the same host can find each other across namespaces.
//! A lookup tries the proxied listen first, then the plain one, then the
//! address with port `0` (instances known only by IP).

use super::merge::merge_into;
use crate::model::{InstanceRef, Listen, Service, World};
use crate::net::{is_loopback, split_host_port};
use crate::timeseries::{Reducer, TimeSeries};
use std::collections::HashMap;
use tracing::debug;

/// Listen address -> instance, built once per pass
#[derive(Debug, Default)]
pub struct ListenIndex {
    by_listen: HashMap<Listen, InstanceRef>,
}

impl ListenIndex {
    /// Index every listen already recorded on the world's instances
    pub fn seeded(world: &World) -> Self {
        let mut index = Self::default();
        for r in world.instance_refs() {
            for listen in world.instance(r).tcp_listens.keys() {
                index.by_listen.insert(listen.clone(), r);
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.by_listen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_listen.is_empty()
    }

    pub fn register(&mut self, listen: Listen, instance: InstanceRef) {
        self.by_listen.insert(listen, instance);
    }

    /// Record a listen sample on `instance` and index it
    ///
    /// A loopback listen is indexed under the node name; without a known
    /// node it is recorded on the instance but not indexed.
    pub fn register_observed(
        &mut self,
        world: &mut World,
        instance: InstanceRef,
        listen: Listen,
        active: bool,
    ) {
        world.instance_mut(instance).add_listen(listen.clone(), active);

        if !is_loopback(&listen.ip) {
            self.register(listen, instance);
            return;
        }
        match world.instance_node(instance) {
            Some(node) => {
                let key = Listen::new(node.name.clone(), listen.port, listen.proxied);
                self.register(key, instance);
            }
            None => debug!(
                instance = %world.instance(instance).name,
                "Loopback listen on an instance without a node, not indexed"
            ),
        }
    }

    /// Instance listening on `ip:port`
    pub fn lookup(&self, ip: &str, port: &str) -> Option<InstanceRef> {
        let mut key = Listen::new(ip, port, true);
        if let Some(&r) = self.by_listen.get(&key) {
            return Some(r);
        }
        key.proxied = false;
        if let Some(&r) = self.by_listen.get(&key) {
            return Some(r);
        }
        key.port = "0".to_string();
        self.by_listen.get(&key).copied()
    }
}

/// Round-trip times observed by an instance, keyed by remote IP
///
/// Filled while loading latency samples and read when upstreams are resolved.
#[derive(Debug, Default)]
pub struct RttTable {
    by_instance: HashMap<InstanceRef, HashMap<String, TimeSeries>>,
}

impl RttTable {
    pub fn record(&mut self, instance: InstanceRef, remote_ip: &str, series: &TimeSeries) {
        let target = self
            .by_instance
            .entry(instance)
            .or_default()
            .entry(remote_ip.to_string())
            .or_default();
        merge_into(target, series, Reducer::Any);
    }

    pub fn get(&self, instance: InstanceRef, remote_ip: &str) -> Option<&TimeSeries> {
        self.by_instance.get(&instance)?.get(remote_ip)
    }
}

/// Owns the pass-local listen index and RTT table
#[derive(Debug, Default)]
pub struct ConnectionResolver {
    pub listens: ListenIndex,
    pub rtt: RttTable,
}

struct UpstreamUpdate {
    key: String,
    remote: Option<InstanceRef>,
    rtt: Option<TimeSeries>,
    service: Option<Service>,
}

impl ConnectionResolver {
    pub fn new(world: &World) -> Self {
        Self {
            listens: ListenIndex::seeded(world),
            rtt: RttTable::default(),
        }
    }

    /// Instance behind a post-proxy destination; loopback is never matched
    pub fn instance_by_destination(&self, actual_destination: &str) -> Option<InstanceRef> {
        let (ip, port) = split_host_port(actual_destination).ok()?;
        if is_loopback(&ip) {
            return None;
        }
        self.listens.lookup(&ip, &port)
    }

    /// Attach remote instance, RTT and service to every upstream
    ///
    /// Returns the number of connections left without a remote instance.
    pub fn resolve_upstreams(
        &self,
        world: &mut World,
        services: &HashMap<String, Service>,
    ) -> usize {
        let mut unresolved = 0;
        for r in world.instance_refs() {
            let node_name = world.instance_node(r).map(|n| n.name.clone());
            let updates: Vec<UpstreamUpdate> = world
                .instance(r)
                .upstreams
                .iter()
                .map(|(key, conn)| {
                    let (remote_ip, port) = conn.effective_remote();
                    let ip = match &node_name {
                        Some(name) if is_loopback(remote_ip) => name.as_str(),
                        _ => remote_ip,
                    };
                    let mut remote = self.listens.lookup(ip, port);

                    let service = services.get(&conn.service_remote_ip).cloned();
                    if remote.is_none() {
                        remote = service
                            .as_ref()
                            .and_then(|svc| service_instance(world, svc));
                    }
                    UpstreamUpdate {
                        key: key.clone(),
                        remote,
                        rtt: self.rtt.get(r, remote_ip).cloned(),
                        service,
                    }
                })
                .collect();

            let instance = world.instance_mut(r);
            for update in updates {
                let Some(conn) = instance.upstreams.get_mut(&update.key) else {
                    continue;
                };
                conn.remote_instance = update.remote;
                if update.remote.is_none() {
                    unresolved += 1;
                }
                if let Some(rtt) = update.rtt {
                    merge_into(&mut conn.rtt, &rtt, Reducer::Any);
                }
                if update.service.is_some() {
                    conn.service = update.service;
                }
            }
        }
        unresolved
    }
}

/// First instance of the application a service routes to
pub(crate) fn service_instance(world: &World, service: &Service) -> Option<InstanceRef> {
    let app = match &service.destination {
        Some(id) => world.application_index(id),
        None => world.application_by_ns_and_name(&service.namespace, &service.name),
    }?;
    if world.application(app).instances().is_empty() {
        return None;
    }
    Some(InstanceRef { app, instance: 0 })
}
