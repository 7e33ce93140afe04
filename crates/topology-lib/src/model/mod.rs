//! Topology data model
//!
//! Applications own instances; instances own containers, upstream
//! connections, volumes and GPU usage. Cross references (connection to
//! remote instance) are [`InstanceRef`] indices into the owning [`World`].

mod application;
mod instance;
mod metrics;
mod snapshot;
mod world;

pub use application::{
    Application, ApplicationCategory, ApplicationId, ApplicationKind, Bucket, DnsRequest,
    TrafficStats,
};
pub use instance::{
    is_request_status_failed, Connection, ConnectionSeries, Container, ContainerSeries, Instance,
    InstanceGpuUsage, InstanceRequests, LabelLastValue, Listen, Protocol, Volume,
};
pub use metrics::{MetricBatch, MetricValues, NodeContainerId, ScrapeJobStatus, ScrapeJobStatuses};
pub use snapshot::{ApplicationSnapshot, InstanceSnapshot, ListenSnapshot, WorldSnapshot};
pub use world::{
    Gpu, InstanceRef, IntegrationStatus, Node, NodeId, Project, ProjectSettings, Service, World,
};
