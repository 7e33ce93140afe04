//! Placeholder applications for peers no known instance listens on

use super::listen::{service_instance, ListenIndex};
use crate::model::{
    ApplicationId, ApplicationKind, Connection, InstanceRef, Listen, Project, Service, World,
};
use crate::net::parse_ip;
use crate::timeseries::{Reducer, TimeSeries};
use std::collections::{BTreeSet, HashMap};

/// Namespace of every synthesized application
pub const EXTERNAL_NAMESPACE: &str = "external";

/// Name for an unknown peer on a well-known port
pub fn external_service_name(port: &str) -> String {
    let service = match port {
        "5432" => "postgres",
        "3306" => "mysql",
        "11211" => "memcached",
        "2181" => "zookeeper",
        "9092" | "9093" | "9094" => "kafka",
        "6379" => "redis",
        "9042" | "9160" | "9142" | "7000" | "7001" | "7199" => "cassandra",
        "27017" | "27018" => "mongodb",
        "9200" | "9300" => "elasticsearch",
        "80" | "443" | "8080" => "http",
        _ => return format!("external:{}", port),
    };
    format!("external-{}", service)
}

fn is_idle(series: &TimeSeries) -> bool {
    series.reduce(Reducer::NanSum).map_or(true, |sum| sum == 0.0)
}

/// Connections with no connect, active or failed samples are noise
pub fn has_activity(conn: &Connection) -> bool {
    !(is_idle(&conn.successful_connections)
        && is_idle(&conn.active)
        && is_idle(&conn.failed_connections))
}

/// A synthesized (or reused) external application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalService {
    pub application: ApplicationId,
    pub instance: String,
    pub custom: bool,
}

/// How an unresolved connection was settled
enum Outcome {
    Skip,
    Service(InstanceRef, Service),
    External {
        name: String,
        custom: bool,
        service: Option<Service>,
    },
}

/// Creates external-service applications for unresolved upstreams
pub struct ExternalServiceSynthesizer<'a> {
    pub project: &'a Project,
    pub services: &'a HashMap<String, Service>,
    pub ip_to_fqdn: &'a HashMap<String, BTreeSet<String>>,
}

impl<'a> ExternalServiceSynthesizer<'a> {
    /// Name an unresolved peer, highest priority first: user override,
    /// service name, hostname, reverse DNS, well-known port
    fn name(
        &self,
        conn: &Connection,
        instance_name: &str,
        service: Option<&Service>,
    ) -> (String, bool) {
        if let Some(custom) = self.project.custom_application_name(instance_name) {
            return (custom.to_string(), true);
        }
        if let Some(svc) = service {
            return (svc.name.clone(), false);
        }
        let ip = &conn.service_remote_ip;
        let port = &conn.service_remote_port;
        if parse_ip(ip).is_none() {
            return (ip.clone(), false);
        }
        if let Some(fqdn) = self.ip_to_fqdn.get(ip).and_then(|names| names.iter().next()) {
            return (format!("{}:{}", fqdn, port), false);
        }
        (external_service_name(port), false)
    }

    fn settle(&self, world: &World, conn: &Connection) -> Outcome {
        if !has_activity(conn) {
            return Outcome::Skip;
        }
        let service = self.services.get(&conn.service_remote_ip).cloned();
        if let Some(svc) = &service {
            if let Some(r) = service_instance(world, svc) {
                return Outcome::Service(r, svc.clone());
            }
        }
        let instance_name = format!("{}:{}", conn.service_remote_ip, conn.service_remote_port);
        let (name, custom) = self.name(conn, &instance_name, service.as_ref());
        Outcome::External {
            name,
            custom,
            service,
        }
    }

    /// Give every unresolved, active upstream a remote instance
    ///
    /// Each synthetic instance listens on the connection's effective remote
    /// address and is added to `listens`, so later connections to the same
    /// peer share it.
    pub fn synthesize(&self, world: &mut World, listens: &mut ListenIndex) -> Vec<ExternalService> {
        let mut created = Vec::new();
        for r in world.instance_refs() {
            let keys: Vec<String> = world
                .instance(r)
                .upstreams
                .iter()
                .filter(|(_, conn)| conn.remote_instance.is_none())
                .map(|(key, _)| key.clone())
                .collect();

            for key in keys {
                let Some(conn) = world.instance(r).upstreams.get(&key) else {
                    continue;
                };
                let instance_name =
                    format!("{}:{}", conn.service_remote_ip, conn.service_remote_port);
                let (remote_ip, remote_port) = conn.effective_remote();
                let listen = Listen::new(remote_ip, remote_port, false);

                let (remote, service) = match self.settle(world, conn) {
                    Outcome::Skip => continue,
                    Outcome::Service(remote, svc) => (remote, Some(svc)),
                    Outcome::External {
                        name,
                        custom,
                        service,
                    } => {
                        let id = ApplicationId::new(
                            EXTERNAL_NAMESPACE,
                            ApplicationKind::ExternalService,
                            name,
                        );
                        let app = world.get_or_create_application(id.clone(), custom);
                        let remote = world.get_or_create_instance(app, &instance_name, None);
                        world.instance_mut(remote).add_listen(listen.clone(), true);
                        listens.register(listen, remote);
                        created.push(ExternalService {
                            application: id,
                            instance: instance_name,
                            custom,
                        });
                        (remote, service)
                    }
                };

                if let Some(conn) = world.instance_mut(r).upstreams.get_mut(&key) {
                    conn.remote_instance = Some(remote);
                    if service.is_some() {
                        conn.service = service;
                    }
                }
            }
        }
        created
    }
}
