//! Applications and their identity

use super::instance::Instance;
use super::world::NodeId;
use crate::timeseries::TimeSeries;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Histogram bucket boundary (`le` label)
pub type Bucket = OrderedFloat<f32>;

/// Workload kind an application was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ApplicationKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    NomadJobGroup,
    DockerSwarmService,
    ExternalService,
    Unknown,
}

impl ApplicationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationKind::Deployment => "Deployment",
            ApplicationKind::StatefulSet => "StatefulSet",
            ApplicationKind::DaemonSet => "DaemonSet",
            ApplicationKind::Job => "Job",
            ApplicationKind::CronJob => "CronJob",
            ApplicationKind::NomadJobGroup => "NomadJobGroup",
            ApplicationKind::DockerSwarmService => "DockerSwarmService",
            ApplicationKind::ExternalService => "ExternalService",
            ApplicationKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ApplicationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique application identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId {
    pub namespace: String,
    pub kind: ApplicationKind,
    pub name: String,
}

impl ApplicationId {
    pub fn new(
        namespace: impl Into<String>,
        kind: ApplicationKind,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.kind, self.name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationCategory {
    #[default]
    Application,
    External,
}

/// Cross-zone and internet traffic aggregates, bytes
#[derive(Debug, Clone, Default)]
pub struct TrafficStats {
    pub cross_az_ingress: TimeSeries,
    pub cross_az_egress: TimeSeries,
    pub internet_egress: TimeSeries,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DnsRequest {
    pub request_type: String,
    pub domain: String,
}

/// A logical application and its running instances
#[derive(Debug, Clone)]
pub struct Application {
    pub id: ApplicationId,
    /// Named through a user override
    pub custom: bool,
    pub category: ApplicationCategory,
    pub traffic_stats: TrafficStats,
    /// Request counts by `(type, domain)` then status
    pub dns_requests: HashMap<DnsRequest, HashMap<String, TimeSeries>>,
    pub dns_requests_histogram: BTreeMap<Bucket, TimeSeries>,
    instances: Vec<Instance>,
}

impl Application {
    pub fn new(id: ApplicationId, custom: bool) -> Self {
        let category = if id.kind == ApplicationKind::ExternalService {
            ApplicationCategory::External
        } else {
            ApplicationCategory::Application
        };
        Self {
            id,
            custom,
            category,
            traffic_stats: TrafficStats::default(),
            dns_requests: HashMap::new(),
            dns_requests_histogram: BTreeMap::new(),
            instances: Vec::new(),
        }
    }

    /// Instances in creation order
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut [Instance] {
        &mut self.instances
    }

    pub fn find_instance(&self, name: &str, node: Option<&NodeId>) -> Option<usize> {
        self.instances
            .iter()
            .position(|i| i.name == name && i.node.as_ref() == node)
    }

    pub(crate) fn push_instance(&mut self, instance: Instance) -> usize {
        self.instances.push(instance);
        self.instances.len() - 1
    }
}
