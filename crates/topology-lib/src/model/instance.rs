//! Instances and the entities they own: containers, upstream connections,
//! volumes and GPU usage.

use super::application::{ApplicationId, Bucket};
use super::world::{InstanceRef, NodeId, Service};
use crate::timeseries::{TimeSeries, Timestamp};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Socket an instance was observed listening on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Listen {
    pub ip: String,
    pub port: String,
    pub proxied: bool,
}

impl Listen {
    pub fn new(ip: impl Into<String>, port: impl Into<String>, proxied: bool) -> Self {
        Self {
            ip: ip.into(),
            port: port.into(),
            proxied,
        }
    }
}

/// Application-layer protocol of a connection's requests
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Protocol(Cow<'static, str>);

impl Protocol {
    pub const HTTP: Protocol = Protocol(Cow::Borrowed("http"));
    pub const POSTGRES: Protocol = Protocol(Cow::Borrowed("postgres"));
    pub const MYSQL: Protocol = Protocol(Cow::Borrowed("mysql"));
    pub const MONGODB: Protocol = Protocol(Cow::Borrowed("mongodb"));
    pub const REDIS: Protocol = Protocol(Cow::Borrowed("redis"));
    pub const MEMCACHED: Protocol = Protocol(Cow::Borrowed("memcached"));
    pub const KAFKA: Protocol = Protocol(Cow::Borrowed("kafka"));
    pub const CASSANDRA: Protocol = Protocol(Cow::Borrowed("cassandra"));
    pub const RABBITMQ: Protocol = Protocol(Cow::Borrowed("rabbitmq"));
    pub const NATS: Protocol = Protocol(Cow::Borrowed("nats"));
    pub const CLICKHOUSE: Protocol = Protocol(Cow::Borrowed("clickhouse"));
    pub const ZOOKEEPER: Protocol = Protocol(Cow::Borrowed("zookeeper"));

    /// Messaging protocols are split by method, e.g. `rabbitmq-publish`
    pub fn with_method(&self, method: &str) -> Protocol {
        Protocol(Cow::Owned(format!("{}-{}", self.0, method)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A status is failed when the peer reported an error or a 5xx
pub fn is_request_status_failed(status: &str) -> bool {
    status == "failed" || status.starts_with('5')
}

/// Per-container time series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerSeries {
    CpuLimit,
    CpuUsage,
    CpuDelay,
    ThrottledTime,
    MemoryRss,
    MemoryRssForTrend,
    MemoryCache,
    MemoryLimit,
    OomKills,
    Restarts,
}

#[derive(Debug, Clone, Default)]
pub struct Container {
    /// Raw platform container id
    pub id: String,
    pub name: String,
    pub image: String,
    pub periodic_systemd_job: bool,
    pub application_types: BTreeSet<String>,

    pub cpu_limit: TimeSeries,
    pub cpu_usage: TimeSeries,
    pub cpu_delay: TimeSeries,
    pub throttled_time: TimeSeries,
    pub memory_rss: TimeSeries,
    pub memory_rss_for_trend: TimeSeries,
    pub memory_cache: TimeSeries,
    pub memory_limit: TimeSeries,
    pub oom_kills: TimeSeries,
    pub restarts: TimeSeries,
}

impl Container {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn series_mut(&mut self, series: ContainerSeries) -> &mut TimeSeries {
        match series {
            ContainerSeries::CpuLimit => &mut self.cpu_limit,
            ContainerSeries::CpuUsage => &mut self.cpu_usage,
            ContainerSeries::CpuDelay => &mut self.cpu_delay,
            ContainerSeries::ThrottledTime => &mut self.throttled_time,
            ContainerSeries::MemoryRss => &mut self.memory_rss,
            ContainerSeries::MemoryRssForTrend => &mut self.memory_rss_for_trend,
            ContainerSeries::MemoryCache => &mut self.memory_cache,
            ContainerSeries::MemoryLimit => &mut self.memory_limit,
            ContainerSeries::OomKills => &mut self.oom_kills,
            ContainerSeries::Restarts => &mut self.restarts,
        }
    }
}

/// Per-connection TCP series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSeries {
    SuccessfulConnections,
    ConnectionTime,
    BytesSent,
    BytesReceived,
    FailedConnections,
    Active,
    Retransmissions,
}

/// Traffic from one instance to one remote endpoint
#[derive(Debug, Clone, Default)]
pub struct Connection {
    pub actual_remote_ip: String,
    pub actual_remote_port: String,
    pub service_remote_ip: String,
    pub service_remote_port: String,

    pub remote_instance: Option<InstanceRef>,
    pub service: Option<Service>,

    /// Source placement from sample labels, used when the node is unknown
    pub source_region: Option<String>,
    pub source_az: Option<String>,

    pub successful_connections: TimeSeries,
    pub connection_time: TimeSeries,
    pub bytes_sent: TimeSeries,
    pub bytes_received: TimeSeries,
    pub failed_connections: TimeSeries,
    pub active: TimeSeries,
    pub retransmissions: TimeSeries,
    pub rtt: TimeSeries,

    pub requests_count: HashMap<Protocol, HashMap<String, TimeSeries>>,
    pub requests_latency: HashMap<Protocol, TimeSeries>,
    pub requests_histogram: HashMap<Protocol, BTreeMap<Bucket, TimeSeries>>,
}

impl Connection {
    pub fn series_mut(&mut self, series: ConnectionSeries) -> &mut TimeSeries {
        match series {
            ConnectionSeries::SuccessfulConnections => &mut self.successful_connections,
            ConnectionSeries::ConnectionTime => &mut self.connection_time,
            ConnectionSeries::BytesSent => &mut self.bytes_sent,
            ConnectionSeries::BytesReceived => &mut self.bytes_received,
            ConnectionSeries::FailedConnections => &mut self.failed_connections,
            ConnectionSeries::Active => &mut self.active,
            ConnectionSeries::Retransmissions => &mut self.retransmissions,
        }
    }

    /// Post-proxy address if known, the service address otherwise
    pub fn effective_remote(&self) -> (&str, &str) {
        if self.actual_remote_ip.is_empty() {
            (&self.service_remote_ip, &self.service_remote_port)
        } else {
            (&self.actual_remote_ip, &self.actual_remote_port)
        }
    }
}

/// Label value as of the most recent sample that carried it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelLastValue {
    value: String,
    time: Timestamp,
}

impl LabelLastValue {
    pub fn update(&mut self, series: &TimeSeries, value: &str) {
        if value.is_empty() {
            return;
        }
        let Some(t) = series.last_time() else {
            return;
        };
        if self.value.is_empty() || t >= self.time {
            self.value = value.to_string();
            self.time = t;
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

#[derive(Debug, Clone, Default)]
pub struct Volume {
    pub mount_point: String,
    pub name: LabelLastValue,
    pub device: LabelLastValue,
    pub capacity_bytes: TimeSeries,
    pub used_bytes: TimeSeries,
}

#[derive(Debug, Clone, Default)]
pub struct InstanceGpuUsage {
    pub usage_average: TimeSeries,
    pub memory_usage_average: TimeSeries,
}

/// Requests addressed to this instance, as seen by its clients
#[derive(Debug, Clone, Default)]
pub struct InstanceRequests {
    pub ok: TimeSeries,
    pub failed: TimeSeries,
    pub total_latency: TimeSeries,
}

/// One running copy of an application
#[derive(Debug, Clone)]
pub struct Instance {
    pub name: String,
    /// Owning application, fixed at creation
    pub owner: ApplicationId,
    pub node: Option<NodeId>,
    pub containers: HashMap<String, Container>,
    /// Outbound connections keyed by connection key
    pub upstreams: BTreeMap<String, Connection>,
    /// Listen address -> active
    pub tcp_listens: HashMap<Listen, bool>,
    pub volumes: Vec<Volume>,
    pub gpu_usage: HashMap<String, InstanceGpuUsage>,
    pub requests: InstanceRequests,
}

impl Instance {
    pub fn new(name: impl Into<String>, owner: ApplicationId, node: Option<NodeId>) -> Self {
        Self {
            name: name.into(),
            owner,
            node,
            containers: HashMap::new(),
            upstreams: BTreeMap::new(),
            tcp_listens: HashMap::new(),
            volumes: Vec::new(),
            gpu_usage: HashMap::new(),
            requests: InstanceRequests::default(),
        }
    }

    pub fn get_or_create_container(&mut self, id: &str, name: &str) -> &mut Container {
        self.containers
            .entry(id.to_string())
            .or_insert_with(|| Container::new(id, name))
    }

    pub fn get_or_create_volume(&mut self, mount_point: &str) -> &mut Volume {
        let idx = match self.volumes.iter().position(|v| v.mount_point == mount_point) {
            Some(idx) => idx,
            None => {
                self.volumes.push(Volume {
                    mount_point: mount_point.to_string(),
                    ..Default::default()
                });
                self.volumes.len() - 1
            }
        };
        &mut self.volumes[idx]
    }

    /// Record a listen; an active flag is never cleared once set
    pub fn add_listen(&mut self, listen: Listen, active: bool) {
        let flag = self.tcp_listens.entry(listen).or_insert(false);
        if !*flag {
            *flag = active;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ApplicationKind;

    fn instance() -> Instance {
        Instance::new(
            "web-1",
            ApplicationId::new("default", ApplicationKind::Deployment, "web"),
            None,
        )
    }

    #[test]
    fn test_listen_activity_is_sticky() {
        let mut i = instance();
        let l = Listen::new("10.0.0.1", "80", false);

        i.add_listen(l.clone(), false);
        assert!(!i.tcp_listens[&l]);

        i.add_listen(l.clone(), true);
        assert!(i.tcp_listens[&l]);

        i.add_listen(l.clone(), false);
        assert!(i.tcp_listens[&l]);
    }

    #[test]
    fn test_volume_matched_by_mount_point() {
        let mut i = instance();
        i.get_or_create_volume("/data");
        i.get_or_create_volume("/data");
        i.get_or_create_volume("/logs");
        assert_eq!(i.volumes.len(), 2);
    }

    #[test]
    fn test_label_last_value_tracks_latest_sample() {
        let mut lv = LabelLastValue::default();
        let early = TimeSeries::from_values(0, 30, &[Some(1.0), None]);
        let late = TimeSeries::from_values(0, 30, &[Some(1.0), Some(1.0)]);

        lv.update(&late, "pvc-new");
        lv.update(&early, "pvc-old");
        assert_eq!(lv.value(), "pvc-new");
    }

    #[test]
    fn test_protocol_with_method() {
        assert_eq!(Protocol::RABBITMQ.with_method("publish").as_str(), "rabbitmq-publish");
        assert!(is_request_status_failed("503"));
        assert!(is_request_status_failed("failed"));
        assert!(!is_request_status_failed("200"));
    }
}
