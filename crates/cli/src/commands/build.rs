//! Topology build command

use anyhow::{Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tabled::Tabled;
use tracing::info;

use topology_lib::{
    ConstructionContext, Constructor, ConstructorMetrics, MetricBatch, PassStats, Project, Reducer,
    ScrapeJobStatuses, Service, World, WorldSnapshot,
};

use crate::config::Config;
use crate::output::{
    color_category, color_remote, format_bytes, format_timestamp, print_info, print_json,
    print_success, print_table, print_warning, OutputFormat,
};

/// One tenant's construction input
#[derive(Debug, Default, Deserialize)]
pub struct Batch {
    #[serde(default)]
    pub project: Option<Project>,
    #[serde(default)]
    pub world: WorldSnapshot,
    #[serde(default)]
    pub metrics: MetricBatch,
    #[serde(default)]
    pub job_statuses: ScrapeJobStatuses,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub ip_to_fqdn: HashMap<String, BTreeSet<String>>,
}

impl Batch {
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse batch file {}", path.display()))
    }

    /// Resolve the project; config overrides never replace the batch's own
    fn project(&mut self, path: &Path, config: &Config) -> Project {
        let mut project = self.project.take().unwrap_or_else(|| {
            let id = config.project_id.clone().unwrap_or_else(|| {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            Project::new(id)
        });
        for (instance, app) in &config.custom_applications {
            project
                .settings
                .custom_applications
                .entry(instance.clone())
                .or_insert_with(|| app.clone());
        }
        project
    }
}

/// Row for the applications table
#[derive(Debug, Serialize, Tabled)]
pub struct ApplicationRow {
    #[tabled(rename = "Application")]
    pub application: String,
    #[tabled(rename = "Category")]
    pub category: String,
    #[tabled(rename = "Instances")]
    pub instances: usize,
    #[tabled(rename = "Containers")]
    pub containers: usize,
    #[tabled(rename = "Upstreams")]
    pub upstreams: usize,
}

/// Row for the connections table
#[derive(Debug, Serialize, Tabled)]
pub struct ConnectionRow {
    #[tabled(rename = "Source")]
    pub source: String,
    #[tabled(rename = "Destination")]
    pub destination: String,
    #[tabled(rename = "Remote")]
    pub remote: String,
    #[tabled(rename = "Service")]
    pub service: String,
    #[tabled(rename = "Sent")]
    #[serde(skip)]
    pub sent: String,
    #[tabled(skip)]
    pub bytes_sent: Option<f32>,
    #[tabled(rename = "RTT")]
    pub rtt: String,
}

/// Result of one construction pass
#[derive(Debug, Serialize)]
pub struct BuildReport {
    pub file: PathBuf,
    pub project: String,
    pub last_sample: Option<i64>,
    pub stats: PassStats,
    pub applications: Vec<ApplicationRow>,
    pub connections: Vec<ConnectionRow>,
}

fn application_rows(world: &World) -> Vec<ApplicationRow> {
    let mut rows: Vec<ApplicationRow> = world
        .applications()
        .iter()
        .map(|app| ApplicationRow {
            application: app.id.to_string(),
            category: serde_json::to_value(app.category)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            instances: app.instances().len(),
            containers: app.instances().iter().map(|i| i.containers.len()).sum(),
            upstreams: app.instances().iter().map(|i| i.upstreams.len()).sum(),
        })
        .collect();
    rows.sort_by(|a, b| a.application.cmp(&b.application));
    rows
}

fn connection_rows(world: &World) -> Vec<ConnectionRow> {
    let mut rows = Vec::new();
    for r in world.instance_refs() {
        let instance = world.instance(r);
        for (key, conn) in &instance.upstreams {
            let remote = conn
                .remote_instance
                .map(|remote| {
                    format!(
                        "{}/{}",
                        world.application(remote.app).id,
                        world.instance(remote).name
                    )
                })
                .unwrap_or_else(|| "-".to_string());
            let bytes_sent = conn.bytes_sent.reduce(Reducer::NanSum);
            rows.push(ConnectionRow {
                source: format!("{}/{}", instance.owner, instance.name),
                destination: key.clone(),
                remote,
                service: conn
                    .service
                    .as_ref()
                    .map(|s| format!("{}/{}", s.namespace, s.name))
                    .unwrap_or_default(),
                sent: bytes_sent.map(|b| format_bytes(b as f64)).unwrap_or_default(),
                bytes_sent,
                rtt: conn
                    .rtt
                    .last()
                    .map(|v| format!("{:.1}ms", v * 1000.0))
                    .unwrap_or_default(),
            });
        }
    }
    rows
}

fn last_sample(world: &World) -> Option<i64> {
    world
        .instance_refs()
        .into_iter()
        .flat_map(|r| {
            world
                .instance(r)
                .containers
                .values()
                .filter_map(|c| c.cpu_usage.last_time())
                .collect::<Vec<_>>()
        })
        .max()
}

/// Run one pass over a batch file
pub fn build_one(path: PathBuf, config: &Config) -> Result<BuildReport> {
    let mut batch = Batch::read(&path)?;
    let project = batch.project(&path, config);
    let mut world = std::mem::take(&mut batch.world).into_world();

    let ctx = ConstructionContext {
        metrics: std::mem::take(&mut batch.metrics),
        job_statuses: std::mem::take(&mut batch.job_statuses),
        ip_to_fqdn: std::mem::take(&mut batch.ip_to_fqdn),
        ..Default::default()
    }
    .with_services(std::mem::take(&mut batch.services));

    let constructor = Constructor::new(project);
    let stats = constructor.construct(&mut world, &ctx);
    info!(file = %path.display(), project = %constructor.project().id, "Batch constructed");

    Ok(BuildReport {
        project: constructor.project().id.clone(),
        last_sample: last_sample(&world),
        stats,
        applications: application_rows(&world),
        connections: connection_rows(&world),
        file: path,
    })
}

/// Build topologies for all batch files, one blocking task per file
pub async fn build(
    files: Vec<PathBuf>,
    config: Config,
    print_metrics: bool,
    format: OutputFormat,
) -> Result<()> {
    let handles: Vec<_> = files
        .into_iter()
        .map(|path| {
            let config = config.clone();
            tokio::task::spawn_blocking(move || build_one(path, &config))
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        reports.push(handle.await.context("Construction task failed")??);
    }

    match format {
        OutputFormat::Json => print_json(&reports)?,
        OutputFormat::Table => {
            for report in &reports {
                print_report(report);
            }
            print_success(&format!("Built {} topologies", reports.len()));
        }
    }

    if print_metrics {
        print!("{}", ConstructorMetrics::new().gather_text());
    }

    Ok(())
}

fn print_report(report: &BuildReport) {
    println!(
        "{} {} ({})",
        "Project:".bold(),
        report.project.cyan(),
        report.file.display()
    );
    println!("{}", "=".repeat(50));
    if let Some(ts) = report.last_sample {
        println!("Last sample:            {}", format_timestamp(ts));
    }
    println!("Samples:                {}", report.stats.samples);
    println!("Instances created:      {}", report.stats.instances_created);
    println!("Connections:            {}", report.stats.connections);
    println!();

    println!("{}", "Applications".bold());
    let apps: Vec<ApplicationRow> = report
        .applications
        .iter()
        .map(|row| ApplicationRow {
            application: row.application.clone(),
            category: color_category(&row.category),
            instances: row.instances,
            containers: row.containers,
            upstreams: row.upstreams,
        })
        .collect();
    print_table(&apps, "No applications found");
    println!();

    println!("{}", "Connections".bold());
    let conns: Vec<ConnectionRow> = report
        .connections
        .iter()
        .map(|row| ConnectionRow {
            remote: color_remote(&row.remote),
            source: row.source.clone(),
            destination: row.destination.clone(),
            service: row.service.clone(),
            sent: row.sent.clone(),
            bytes_sent: row.bytes_sent,
            rtt: row.rtt.clone(),
        })
        .collect();
    print_table(&conns, "No connections found");
    println!();

    if report.stats.external_services > 0 {
        print_info(&format!(
            "{} connections attributed to external services",
            report.stats.external_services
        ));
    }
    if report.stats.samples_skipped > 0 {
        print_warning(&format!(
            "{} samples could not be attributed to an instance",
            report.stats.samples_skipped
        ));
    }
    if report.stats.unresolved_connections > 0 {
        print_warning(&format!(
            "{} connections had no known remote before external synthesis",
            report.stats.unresolved_connections
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const BATCH: &str = r#"{
        "world": {"nodes": [{"id": {"machine_id": "m1"}, "name": "node-1"}]},
        "metrics": {
            "container_net_tcp_active_connections": [
                {"labels": {"container_id": "/nomad/default/billing/web/4f2a/server", "machine_id": "m1", "destination": "10.0.0.5:6379"},
                 "values": {"from": 0, "step": 30, "values": [1, 1]}}
            ]
        }
    }"#;

    #[test]
    fn test_build_one_applies_config_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tenant-a.json");
        fs::write(&path, BATCH).unwrap();

        let mut config = Config::default();
        config
            .custom_applications
            .insert("web-4f2a".to_string(), "billing-web".to_string());

        let report = build_one(path, &config).unwrap();
        assert_eq!(report.project, "tenant-a");
        assert!(report
            .applications
            .iter()
            .any(|a| a.application == "default:NomadJobGroup:billing-web"));
        assert!(report
            .applications
            .iter()
            .any(|a| a.application == "external:ExternalService:external-redis"
                && a.category == "external"));
        assert_eq!(report.connections.len(), 1);
        assert_ne!(report.connections[0].remote, "-");
    }

    #[test]
    fn test_build_one_reports_parse_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();

        let err = build_one(path, &Config::default()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse batch file"));
    }
}
