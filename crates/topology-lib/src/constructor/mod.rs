//! Topology construction
//!
//! A pass turns one batch of label-keyed metric samples into entities and
//! edges of a [`World`]. Loaders run in a fixed order: container metrics,
//! then connection metrics, then cross-instance resolution, traffic
//! classification and external service synthesis, since each stage reads
//! the lookup state built by the ones before it.

mod external;
mod identifier;
mod listen;
mod loaders;
mod merge;
mod registry;
mod traffic;


pub use external::{
    external_service_name, has_activity, ExternalService, ExternalServiceSynthesizer,
};
pub use identifier::{ApplicationRef, ContainerIdentity, ResolvedIdentity, NO_NAMESPACE};
pub use listen::{ConnectionResolver, ListenIndex, RttTable};
pub use merge::{increase, merge, merge_into};
pub use registry::{EntityRegistry, Target};
pub use traffic::{classify, classify_traffic, Placement, TrafficClass, TrafficSummary};

use crate::model::{MetricBatch, Project, ScrapeJobStatuses, Service, World};
use crate::observability::{ConstructorMetrics, StructuredLogger};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

/// Read-only inputs of one pass
#[derive(Debug, Clone, Default)]
pub struct ConstructionContext {
    pub metrics: MetricBatch,
    pub job_statuses: ScrapeJobStatuses,
    /// Services keyed by cluster IP
    pub services: HashMap<String, Service>,
    /// Reverse DNS names per IP
    pub ip_to_fqdn: HashMap<String, BTreeSet<String>>,
}

impl ConstructionContext {
    pub fn new(metrics: MetricBatch) -> Self {
        Self {
            metrics,
            ..Default::default()
        }
    }

    /// Index services by their cluster IP
    pub fn with_services(mut self, services: impl IntoIterator<Item = Service>) -> Self {
        for svc in services {
            self.services.insert(svc.cluster_ip.clone(), svc);
        }
        self
    }
}

/// Outcome counters of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStats {
    pub samples: usize,
    /// Samples that could not be attributed to an instance
    pub samples_skipped: usize,
    pub instances_created: usize,
    pub connections: usize,
    /// Connections without a remote instance after listen and service lookup
    pub unresolved_connections: usize,
    pub external_services: usize,
    pub cross_zone_connections: usize,
    pub internet_connections: usize,
}

/// Builds topology for one project
pub struct Constructor {
    project: Project,
    metrics: ConstructorMetrics,
    logger: StructuredLogger,
}

impl Constructor {
    pub fn new(project: Project) -> Self {
        let logger = StructuredLogger::new(project.id.clone());
        Self {
            project,
            metrics: ConstructorMetrics::new(),
            logger,
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Run one construction pass, mutating `world` in place
    pub fn construct(&self, world: &mut World, ctx: &ConstructionContext) -> PassStats {
        let start = Instant::now();
        self.logger
            .log_pass_started(ctx.metrics.len(), world.applications().len());

        let (stats, externals) = loaders::Pass::new(world, ctx, &self.project).run();

        for service in &externals {
            self.logger.log_external_service(service);
        }
        let elapsed = start.elapsed();
        self.metrics.observe_pass(elapsed.as_secs_f64(), &stats);
        self.logger.log_pass_finished(&stats, elapsed.as_millis());
        stats
    }
}
