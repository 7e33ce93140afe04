//! Container identifier parsing
//!
//! The collection agent labels every container-scoped series with an opaque
//! slash-delimited identifier whose layout depends on the platform that
//! started the container:
//! - `/k8s/<namespace>/<pod>/<container>`
//! - `/k8s-cronjob/<namespace>/<job>/<container>`
//! - `/nomad/<namespace>/<job>/<group>/<allocation>/<task>`
//! - `/swarm/<namespace>/<service>/<task>`
//! - anything else is a systemd unit or cgroup path, named by its last segment

use crate::error::{ResolveError, Result};
use crate::model::{ApplicationId, ApplicationKind};

/// Namespace used in instance keys for workloads without one
pub const NO_NAMESPACE: &str = "_";

/// Parsed container identifier, one variant per platform convention
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerIdentity {
    KubernetesPod {
        namespace: String,
        pod: String,
        container: String,
    },
    KubernetesCronJob {
        namespace: String,
        job: String,
        container: String,
    },
    NomadTask {
        namespace: String,
        job: String,
        group: String,
        allocation: String,
        task: String,
    },
    SwarmTask {
        namespace: String,
        service: String,
        task: String,
    },
    Unit {
        name: String,
    },
}

/// Where a container belongs in the topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub namespace: String,
    /// Application to create the instance under; `None` means the instance
    /// must already exist (pods are discovered from the orchestrator)
    pub application: Option<ApplicationId>,
    pub instance_name: String,
    pub container_name: String,
}

fn segments(id: &str) -> Result<Vec<&str>> {
    match id.strip_prefix('/') {
        Some(rest) if !rest.is_empty() => Ok(rest.split('/').collect()),
        _ => Err(ResolveError::InvalidIdentifier(id.to_string())),
    }
}

fn expect_segments(id: &str, parts: &[&str], platform: &'static str, count: usize) -> Result<()> {
    if parts.len() != count {
        return Err(ResolveError::SegmentCount {
            platform,
            count: parts.len(),
            id: id.to_string(),
        });
    }
    if parts.iter().any(|p| p.is_empty()) {
        return Err(ResolveError::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}

impl ContainerIdentity {
    /// Parse a container identifier
    pub fn parse(id: &str) -> Result<Self> {
        let parts = segments(id)?;
        let owned = |i: usize| parts[i].to_string();

        match parts[0] {
            "k8s" => {
                expect_segments(id, &parts, "k8s", 4)?;
                Ok(ContainerIdentity::KubernetesPod {
                    namespace: owned(1),
                    pod: owned(2),
                    container: owned(3),
                })
            }
            "k8s-cronjob" => {
                expect_segments(id, &parts, "k8s-cronjob", 4)?;
                Ok(ContainerIdentity::KubernetesCronJob {
                    namespace: owned(1),
                    job: owned(2),
                    container: owned(3),
                })
            }
            "nomad" => {
                expect_segments(id, &parts, "nomad", 6)?;
                Ok(ContainerIdentity::NomadTask {
                    namespace: owned(1),
                    job: owned(2),
                    group: owned(3),
                    allocation: owned(4),
                    task: owned(5),
                })
            }
            "swarm" => {
                expect_segments(id, &parts, "swarm", 4)?;
                Ok(ContainerIdentity::SwarmTask {
                    namespace: owned(1),
                    service: owned(2),
                    task: owned(3),
                })
            }
            _ => {
                let last = parts.last().copied().unwrap_or_default();
                let name = last.strip_suffix(".service").unwrap_or(last);
                let name = name.strip_suffix(".slice").unwrap_or(name);
                if name.is_empty() {
                    return Err(ResolveError::InvalidIdentifier(id.to_string()));
                }
                Ok(ContainerIdentity::Unit {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Containers managed by the orchestrator need kube-state-metrics
    pub fn is_orchestrated(&self) -> bool {
        matches!(
            self,
            ContainerIdentity::KubernetesPod { .. } | ContainerIdentity::KubernetesCronJob { .. }
        )
    }

    /// Derive the instance identity for a container seen on `node_name`
    pub fn resolve(&self, node_name: &str) -> ResolvedIdentity {
        match self {
            ContainerIdentity::KubernetesPod {
                namespace,
                pod,
                container,
            } => ResolvedIdentity {
                namespace: namespace.clone(),
                application: None,
                instance_name: pod.clone(),
                container_name: container.clone(),
            },
            ContainerIdentity::KubernetesCronJob {
                namespace,
                job,
                container,
            } => ResolvedIdentity {
                namespace: namespace.clone(),
                application: Some(ApplicationId::new(
                    namespace.as_str(),
                    ApplicationKind::CronJob,
                    job.as_str(),
                )),
                instance_name: format!("{}@{}", job, node_name),
                container_name: container.clone(),
            },
            ContainerIdentity::NomadTask {
                namespace,
                job,
                group,
                allocation,
                task,
            } => ResolvedIdentity {
                namespace: namespace.clone(),
                application: Some(ApplicationId::new(
                    namespace.as_str(),
                    ApplicationKind::NomadJobGroup,
                    format!("{}.{}", job, group),
                )),
                instance_name: format!("{}-{}", group, allocation),
                container_name: task.clone(),
            },
            ContainerIdentity::SwarmTask {
                namespace,
                service,
                task,
            } => ResolvedIdentity {
                namespace: namespace.clone(),
                application: Some(ApplicationId::new(
                    namespace.as_str(),
                    ApplicationKind::DockerSwarmService,
                    service.as_str(),
                )),
                instance_name: format!("{}.{}", service, task),
                container_name: service.clone(),
            },
            ContainerIdentity::Unit { name } => ResolvedIdentity {
                namespace: NO_NAMESPACE.to_string(),
                application: Some(ApplicationId::new("", ApplicationKind::Unknown, name.as_str())),
                instance_name: format!("{}@{}", name, node_name),
                container_name: name.clone(),
            },
        }
    }
}

/// Compact application identifier (`app_id` label), e.g. `/k8s/shop/api`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRef {
    pub namespace: String,
    pub name: String,
}

impl ApplicationRef {
    pub fn parse(id: &str) -> Result<Self> {
        let parts = segments(id)?;
        match parts[0] {
            "k8s" | "k8s-cronjob" => {
                expect_segments(id, &parts, "application", 3)?;
                Ok(ApplicationRef {
                    namespace: parts[1].to_string(),
                    name: parts[2].to_string(),
                })
            }
            _ => Err(ResolveError::UnknownPlatform(id.to_string())),
        }
    }
}
