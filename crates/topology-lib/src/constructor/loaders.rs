//! Per-metric loaders of a construction pass

use super::external::{ExternalService, ExternalServiceSynthesizer};
use super::listen::ConnectionResolver;
use super::merge::{increase, merge_into};
use super::registry::{EntityRegistry, Target};
use super::traffic::classify_traffic;
use super::{ConstructionContext, PassStats};
use crate::error::{ResolveError, Result};
use crate::model::{
    is_request_status_failed, Bucket, Connection, ConnectionSeries, Container, ContainerSeries,
    DnsRequest, InstanceRef, Listen, MetricValues, Project, Protocol, World,
};
use crate::net::split_host_port;
use crate::timeseries::Reducer;
use ordered_float::OrderedFloat;
use tracing::{debug, warn};

/// Connections of this application are docker-proxy's and duplicate the
/// real client connections
const DOCKER_PROXY_APP: &str = "docker";

const CONTAINER_GAUGES: [(&str, ContainerSeries); 8] = [
    ("container_cpu_limit", ContainerSeries::CpuLimit),
    ("container_cpu_usage", ContainerSeries::CpuUsage),
    ("container_cpu_delay", ContainerSeries::CpuDelay),
    ("container_throttled_time", ContainerSeries::ThrottledTime),
    ("container_memory_rss", ContainerSeries::MemoryRss),
    ("container_memory_rss_for_trend", ContainerSeries::MemoryRssForTrend),
    ("container_memory_cache", ContainerSeries::MemoryCache),
    ("container_memory_limit", ContainerSeries::MemoryLimit),
];

const CONTAINER_COUNTERS: [(&str, ContainerSeries); 2] = [
    ("container_oom_kills_total", ContainerSeries::OomKills),
    ("container_restarts", ContainerSeries::Restarts),
];

const CONNECTION_COUNTERS: [(&str, ConnectionSeries); 7] = [
    ("container_net_tcp_successful_connects", ConnectionSeries::SuccessfulConnections),
    ("container_net_tcp_connection_time_seconds", ConnectionSeries::ConnectionTime),
    ("container_net_tcp_bytes_sent", ConnectionSeries::BytesSent),
    ("container_net_tcp_bytes_received", ConnectionSeries::BytesReceived),
    ("container_net_tcp_failed_connects", ConnectionSeries::FailedConnections),
    ("container_net_tcp_active_connections", ConnectionSeries::Active),
    ("container_net_tcp_retransmits", ConnectionSeries::Retransmissions),
];

fn l7_request_counts() -> [(&'static str, Protocol); 12] {
    [
        ("container_http_requests_count", Protocol::HTTP),
        ("container_postgres_queries_count", Protocol::POSTGRES),
        ("container_mysql_queries_count", Protocol::MYSQL),
        ("container_mongo_queries_count", Protocol::MONGODB),
        ("container_redis_queries_count", Protocol::REDIS),
        ("container_memcached_queries_count", Protocol::MEMCACHED),
        ("container_kafka_requests_count", Protocol::KAFKA),
        ("container_cassandra_queries_count", Protocol::CASSANDRA),
        ("container_rabbitmq_messages", Protocol::RABBITMQ),
        ("container_nats_messages", Protocol::NATS),
        ("container_clickhouse_queries_count", Protocol::CLICKHOUSE),
        ("container_zookeeper_requests_count", Protocol::ZOOKEEPER),
    ]
}

fn l7_latencies() -> [(&'static str, Protocol); 10] {
    [
        ("container_http_requests_latency_total", Protocol::HTTP),
        ("container_postgres_queries_latency_total", Protocol::POSTGRES),
        ("container_mysql_queries_latency_total", Protocol::MYSQL),
        ("container_mongo_queries_latency_total", Protocol::MONGODB),
        ("container_redis_queries_latency_total", Protocol::REDIS),
        ("container_memcached_queries_latency_total", Protocol::MEMCACHED),
        ("container_kafka_requests_latency_total", Protocol::KAFKA),
        ("container_cassandra_queries_latency_total", Protocol::CASSANDRA),
        ("container_clickhouse_queries_latency_total", Protocol::CLICKHOUSE),
        ("container_zookeeper_requests_latency_total", Protocol::ZOOKEEPER),
    ]
}

fn l7_histograms() -> [(&'static str, Protocol); 10] {
    [
        ("container_http_requests_histogram", Protocol::HTTP),
        ("container_postgres_queries_histogram", Protocol::POSTGRES),
        ("container_mysql_queries_histogram", Protocol::MYSQL),
        ("container_mongo_queries_histogram", Protocol::MONGODB),
        ("container_redis_queries_histogram", Protocol::REDIS),
        ("container_memcached_queries_histogram", Protocol::MEMCACHED),
        ("container_kafka_requests_histogram", Protocol::KAFKA),
        ("container_cassandra_queries_histogram", Protocol::CASSANDRA),
        ("container_clickhouse_queries_histogram", Protocol::CLICKHOUSE),
        ("container_zookeeper_requests_histogram", Protocol::ZOOKEEPER),
    ]
}

/// Histogram bucket boundary from an `le` label
pub(crate) fn parse_bucket(le: &str) -> Result<Bucket> {
    le.parse::<f32>()
        .map(OrderedFloat)
        .map_err(|_| ResolveError::InvalidBucket(le.to_string()))
}

/// Post-proxy destination if reported, the service destination otherwise
fn effective_destination(m: &MetricValues) -> &str {
    match m.actual_destination() {
        "" => m.destination(),
        actual => actual,
    }
}

/// State of one construction pass
///
/// The registry, listen index and RTT table live only as long as the pass.
pub(super) struct Pass<'a> {
    world: &'a mut World,
    ctx: &'a ConstructionContext,
    project: &'a Project,
    registry: EntityRegistry,
    resolver: ConnectionResolver,
    samples_skipped: usize,
}

impl<'a> Pass<'a> {
    pub(super) fn new(
        world: &'a mut World,
        ctx: &'a ConstructionContext,
        project: &'a Project,
    ) -> Self {
        let registry = EntityRegistry::new(world);
        let resolver = ConnectionResolver::new(world);
        Self {
            world,
            ctx,
            project,
            registry,
            resolver,
            samples_skipped: 0,
        }
    }

    pub(super) fn run(mut self) -> (PassStats, Vec<ExternalService>) {
        self.load_container_info();
        self.load_application_types();
        for (query, series) in CONTAINER_GAUGES {
            self.load_container_gauge(query, series);
        }
        for (query, series) in CONTAINER_COUNTERS {
            self.load_container_counter(query, series);
        }
        self.load_net_latency();
        self.load_listens();

        for (query, series) in CONNECTION_COUNTERS {
            self.load_connection_counter(query, series);
        }
        for (query, protocol) in l7_request_counts() {
            self.load_l7_requests(query, protocol);
        }
        for (query, protocol) in l7_latencies() {
            self.load_l7_latency(query, protocol);
        }
        for (query, protocol) in l7_histograms() {
            self.load_l7_histogram(query, protocol);
        }
        self.load_requests_by_destination();
        self.load_dns();
        self.load_volumes();
        self.load_gpus();

        let unresolved = self
            .resolver
            .resolve_upstreams(self.world, &self.ctx.services);
        let traffic = classify_traffic(self.world);
        let synthesizer = ExternalServiceSynthesizer {
            project: self.project,
            services: &self.ctx.services,
            ip_to_fqdn: &self.ctx.ip_to_fqdn,
        };
        let externals = synthesizer.synthesize(self.world, &mut self.resolver.listens);

        let stats = PassStats {
            samples: self.ctx.metrics.len(),
            samples_skipped: self.samples_skipped,
            instances_created: self.registry.instances_created(),
            connections: self
                .world
                .applications()
                .iter()
                .flat_map(|a| a.instances())
                .map(|i| i.upstreams.len())
                .sum(),
            unresolved_connections: unresolved,
            external_services: externals.len(),
            cross_zone_connections: traffic.cross_zone,
            internet_connections: traffic.internet,
        };
        (stats, externals)
    }

    /// Resolve every sample of `query` to its target, skipping the rest
    fn targets(&mut self, query: &str) -> Vec<(Target, &'a MetricValues)> {
        let ctx = self.ctx;
        let mut targets = Vec::new();
        for m in ctx.metrics.get(query) {
            match self.registry.resolve_metric(self.world, self.project, m) {
                Some(target) => targets.push((target, m)),
                None => self.samples_skipped += 1,
            }
        }
        targets
    }

    fn container_mut(&mut self, target: &Target) -> Option<&mut Container> {
        let id = target.container.as_deref()?;
        self.world
            .instance_mut(target.instance)
            .containers
            .get_mut(id)
    }

    /// Upstream of the target instance for this sample's destination
    fn connection_mut(
        &mut self,
        instance: InstanceRef,
        m: &MetricValues,
    ) -> Option<&mut Connection> {
        let instance = self.world.instance_mut(instance);
        if instance.owner.name == DOCKER_PROXY_APP {
            return None;
        }

        let key = m.connection_key();
        if !instance.upstreams.contains_key(&key) {
            let (service_ip, service_port) = match split_host_port(m.destination()) {
                Ok(addr) => addr,
                Err(e) => {
                    warn!(error = %e, "Skipping connection sample");
                    return None;
                }
            };
            let (actual_ip, actual_port) = match m.actual_destination() {
                "" => Default::default(),
                actual => match split_host_port(actual) {
                    Ok(addr) => addr,
                    Err(e) => {
                        warn!(error = %e, "Skipping connection sample");
                        return None;
                    }
                },
            };
            let conn = Connection {
                actual_remote_ip: actual_ip,
                actual_remote_port: actual_port,
                service_remote_ip: service_ip,
                service_remote_port: service_port,
                ..Default::default()
            };
            instance.upstreams.insert(key.clone(), conn);
        }

        let conn = instance.upstreams.get_mut(&key)?;
        if !m.label("region").is_empty() {
            conn.source_region = Some(m.label("region").to_string());
        }
        if !m.label("az").is_empty() {
            conn.source_az = Some(m.label("az").to_string());
        }
        Some(conn)
    }

    fn load_container_info(&mut self) {
        for (target, m) in self.targets("container_info") {
            let Some(container) = self.container_mut(&target) else {
                continue;
            };
            if let Some(image) = m.labels.get("image").filter(|i| !i.is_empty()) {
                container.image = image.clone();
            }
            if m.label("systemd_triggered_by").ends_with(".timer") {
                container.periodic_systemd_job = true;
            }
        }
    }

    fn load_application_types(&mut self) {
        for (target, m) in self.targets("container_application_type") {
            let app_type = m.label("application_type");
            if app_type.is_empty() {
                continue;
            }
            if let Some(container) = self.container_mut(&target) {
                container.application_types.insert(app_type.to_string());
            }
        }
    }

    fn load_container_gauge(&mut self, query: &str, series: ContainerSeries) {
        for (target, m) in self.targets(query) {
            if let Some(container) = self.container_mut(&target) {
                merge_into(container.series_mut(series), &m.values, Reducer::Any);
            }
        }
    }

    fn load_container_counter(&mut self, query: &str, series: ContainerSeries) {
        let ctx = self.ctx;
        for (target, m) in self.targets(query) {
            let increments = increase(&m.values, ctx.job_statuses.get(&m.labels));
            if let Some(container) = self.container_mut(&target) {
                merge_into(container.series_mut(series), &increments, Reducer::Any);
            }
        }
    }

    fn load_net_latency(&mut self) {
        for (target, m) in self.targets("container_net_latency") {
            self.resolver
                .rtt
                .record(target.instance, m.destination(), &m.values);
        }
    }

    fn load_listens(&mut self) {
        for (target, m) in self.targets("container_net_tcp_listen_info") {
            let (ip, port) = match split_host_port(m.label("listen_addr")) {
                Ok(addr) => addr,
                Err(e) => {
                    warn!(error = %e, "Skipping listen sample");
                    continue;
                }
            };
            let active = m.values.last() == Some(1.0);
            let listen = Listen::new(ip, port, !m.label("proxy").is_empty());
            self.resolver
                .listens
                .register_observed(self.world, target.instance, listen, active);
        }
    }

    fn load_connection_counter(&mut self, query: &str, series: ConnectionSeries) {
        for (target, m) in self.targets(query) {
            if let Some(conn) = self.connection_mut(target.instance, m) {
                merge_into(conn.series_mut(series), &m.values, Reducer::NanSum);
            }
        }
    }

    fn load_l7_requests(&mut self, query: &str, protocol: Protocol) {
        for (target, m) in self.targets(query) {
            let protocol = if protocol == Protocol::RABBITMQ || protocol == Protocol::NATS {
                protocol.with_method(m.label("method"))
            } else {
                protocol.clone()
            };
            if let Some(conn) = self.connection_mut(target.instance, m) {
                let by_status = conn.requests_count.entry(protocol).or_default();
                let series = by_status.entry(m.label("status").to_string()).or_default();
                merge_into(series, &m.values, Reducer::NanSum);
            }
        }
    }

    fn load_l7_latency(&mut self, query: &str, protocol: Protocol) {
        for (target, m) in self.targets(query) {
            if let Some(conn) = self.connection_mut(target.instance, m) {
                let series = conn.requests_latency.entry(protocol.clone()).or_default();
                merge_into(series, &m.values, Reducer::NanSum);
            }
        }
    }

    fn load_l7_histogram(&mut self, query: &str, protocol: Protocol) {
        for (target, m) in self.targets(query) {
            let bucket = match parse_bucket(m.label("le")) {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, query = %query, "Skipping histogram bucket");
                    continue;
                }
            };
            if let Some(conn) = self.connection_mut(target.instance, m) {
                let buckets = conn.requests_histogram.entry(protocol.clone()).or_default();
                merge_into(buckets.entry(bucket).or_default(), &m.values, Reducer::NanSum);
            }
        }
    }

    /// Requests reported against the destination instance rather than the client
    fn load_requests_by_destination(&mut self) {
        let ctx = self.ctx;
        for m in ctx.metrics.get("l7_requests_by_dest") {
            let destination = effective_destination(m);
            let Some(r) = self.resolver.instance_by_destination(destination) else {
                debug!(destination = %destination, "No instance behind destination");
                continue;
            };
            let requests = &mut self.world.instance_mut(r).requests;
            let series = if is_request_status_failed(m.label("status")) {
                &mut requests.failed
            } else {
                &mut requests.ok
            };
            merge_into(series, &m.values, Reducer::NanSum);
        }
        for m in ctx.metrics.get("l7_total_latency_by_dest") {
            if let Some(r) = self.resolver.instance_by_destination(effective_destination(m)) {
                let requests = &mut self.world.instance_mut(r).requests;
                merge_into(&mut requests.total_latency, &m.values, Reducer::NanSum);
            }
        }
    }

    fn load_dns(&mut self) {
        for (target, m) in self.targets("container_dns_requests_total") {
            let request = DnsRequest {
                request_type: m.label("request_type").to_string(),
                domain: m.label("domain").to_string(),
            };
            if request.request_type.is_empty() || request.domain.is_empty() {
                continue;
            }
            let app = self.world.application_mut(target.instance.app);
            let series = app
                .dns_requests
                .entry(request)
                .or_default()
                .entry(m.label("status").to_string())
                .or_default();
            merge_into(series, &m.values, Reducer::NanSum);
        }

        for (target, m) in self.targets("container_dns_requests_latency") {
            let bucket = match parse_bucket(m.label("le")) {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "Skipping DNS latency bucket");
                    continue;
                }
            };
            let app = self.world.application_mut(target.instance.app);
            let series = app.dns_requests_histogram.entry(bucket).or_default();
            merge_into(series, &m.values, Reducer::Any);
        }
    }

    fn load_volumes(&mut self) {
        for (query, capacity) in [
            ("container_volume_size", true),
            ("container_volume_used", false),
        ] {
            for (target, m) in self.targets(query) {
                let instance = self.world.instance_mut(target.instance);
                let volume = instance.get_or_create_volume(m.label("mount_point"));
                volume.name.update(&m.values, m.label("volume"));
                volume.device.update(&m.values, m.label("device"));
                let series = if capacity {
                    &mut volume.capacity_bytes
                } else {
                    &mut volume.used_bytes
                };
                merge_into(series, &m.values, Reducer::Any);
            }
        }
    }

    fn load_gpus(&mut self) {
        for (query, memory) in [
            ("container_gpu_usage_percent", false),
            ("container_gpu_memory_usage_percent", true),
        ] {
            for (target, m) in self.targets(query) {
                let uuid = m.label("gpu_uuid");
                let instance = self.world.instance_mut(target.instance);
                let usage = instance.gpu_usage.entry(uuid.to_string()).or_default();
                let series = if memory {
                    &mut usage.memory_usage_average
                } else {
                    &mut usage.usage_average
                };
                merge_into(series, &m.values, Reducer::Any);

                let name = instance.name.clone();
                let Some(node_id) = instance.node.clone() else {
                    continue;
                };
                if let Some(gpu) = self
                    .world
                    .node_mut(&node_id)
                    .and_then(|node| node.gpus.get_mut(uuid))
                {
                    gpu.instances.insert(name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bucket() {
        assert_eq!(parse_bucket("0.25").unwrap(), OrderedFloat(0.25));
        assert_eq!(parse_bucket("+Inf").unwrap(), OrderedFloat(f32::INFINITY));
        assert!(matches!(parse_bucket("fast"), Err(ResolveError::InvalidBucket(_))));
        assert!(parse_bucket("").is_err());
    }
}
