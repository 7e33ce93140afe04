//! CLI integration tests

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const BATCH: &str = r#"{
    "project": {"id": "shop"},
    "world": {
        "nodes": [
            {"id": {"machine_id": "m1"}, "name": "node-1", "region": "us-east-1", "availability_zone": "us-east-1a"},
            {"id": {"machine_id": "m2"}, "name": "node-2", "region": "us-east-1", "availability_zone": "us-east-1b"}
        ],
        "applications": [{
            "id": {"namespace": "shop", "kind": "StatefulSet", "name": "postgres"},
            "instances": [{
                "name": "postgres-0",
                "node": {"machine_id": "m2"},
                "tcp_listens": [{"ip": "10.1.0.9", "port": "5432", "active": true}]
            }]
        }]
    },
    "metrics": {
        "container_net_tcp_active_connections": [
            {"labels": {"container_id": "/swarm/shop/api/1", "machine_id": "m1", "destination": "10.1.0.9:5432"},
             "values": {"from": 1700000000, "step": 30, "values": [3, 4]}},
            {"labels": {"container_id": "/swarm/shop/api/1", "machine_id": "m1", "destination": "10.0.0.5:6379"},
             "values": {"from": 1700000000, "step": 30, "values": [1, 1]}}
        ],
        "container_net_tcp_bytes_sent": [
            {"labels": {"container_id": "/swarm/shop/api/1", "machine_id": "m1", "destination": "10.1.0.9:5432"},
             "values": {"from": 1700000000, "step": 30, "values": [100, 200]}}
        ]
    }
}"#;

fn topo(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_topo"))
        .args(args)
        .env("HOME", home)
        .env("RUST_LOG", "warn")
        .env_remove("TOPO_CONFIG")
        .env_remove("TOPO_PROJECT_ID")
        .output()
        .expect("Failed to execute command")
}

fn write_batch(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let home = TempDir::new().unwrap();
    let output = topo(home.path(), &["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("build"), "Should show build command");
    assert!(stdout.contains("resolve-id"), "Should show resolve-id command");
    assert!(stdout.contains("--format"), "Should show format option");
}

#[test]
fn test_build_json_output() {
    let home = TempDir::new().unwrap();
    let path = write_batch(&home, "batch.json", BATCH);

    let output = topo(home.path(), &["--format", "json", "build", &path]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let report = &reports[0];
    assert_eq!(report["project"], "shop");
    assert_eq!(report["stats"]["connections"], 2);
    assert_eq!(report["stats"]["external_services"], 1);
    assert_eq!(report["stats"]["cross_zone_connections"], 1);

    let apps: Vec<&str> = report["applications"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["application"].as_str().unwrap())
        .collect();
    assert!(apps.contains(&"shop:DockerSwarmService:api"));
    assert!(apps.contains(&"external:ExternalService:external-redis"));

    let to_postgres = report["connections"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["destination"] == "10.1.0.9:5432")
        .unwrap();
    assert_eq!(to_postgres["remote"], "shop:StatefulSet:postgres/postgres-0");
    assert_eq!(to_postgres["bytes_sent"], 300.0);
}

#[test]
fn test_build_table_output() {
    let home = TempDir::new().unwrap();
    let path = write_batch(&home, "batch.json", BATCH);

    let output = topo(home.path(), &["build", &path, "--print-metrics"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("Applications"));
    assert!(stdout.contains("postgres-0"));
    assert!(stdout.contains("Built 1 topologies"));
    assert!(stdout.contains("topology_passes_total"));
}

#[test]
fn test_build_multiple_tenants_with_config() {
    let home = TempDir::new().unwrap();
    let first = write_batch(&home, "first.json", BATCH);
    let second = write_batch(
        &home,
        "tenant-b.json",
        r#"{"metrics": {"container_cpu_usage": [
            {"labels": {"container_id": "/swarm/shop/api/1", "machine_id": ""},
             "values": {"from": 0, "step": 30, "values": [0.5]}}
        ]}}"#,
    );
    let config = home.path().join("topo.toml");
    fs::write(&config, "[custom_applications]\n\"api.1\" = \"storefront\"\n").unwrap();

    let output = topo(
        home.path(),
        &[
            "--config",
            config.to_str().unwrap(),
            "--format",
            "json",
            "build",
            &first,
            &second,
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(reports.as_array().unwrap().len(), 2);
    assert_eq!(reports[1]["project"], "tenant-b");
    for report in reports.as_array().unwrap() {
        assert!(report["applications"]
            .as_array()
            .unwrap()
            .iter()
            .any(|a| a["application"] == "shop:DockerSwarmService:storefront"));
    }
}

#[test]
fn test_build_missing_file() {
    let home = TempDir::new().unwrap();
    let missing = home.path().join("missing.json");

    let output = topo(home.path(), &["build", missing.to_str().unwrap()]);
    assert!(!output.status.success(), "Missing batch file should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read batch file"));
}

#[test]
fn test_resolve_id_json() {
    let home = TempDir::new().unwrap();
    let output = topo(
        home.path(),
        &[
            "-f",
            "json",
            "resolve-id",
            "/nomad/default/billing/web/4f2a/server",
            "--node",
            "node-1",
        ],
    );
    assert!(output.status.success());

    let view: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(view["application"], "default:NomadJobGroup:billing.web");
    assert_eq!(view["instance"], "web-4f2a");
    assert_eq!(view["container"], "server");
}

#[test]
fn test_resolve_id_invalid() {
    let home = TempDir::new().unwrap();
    let output = topo(home.path(), &["resolve-id", "/k8s/shop/api"]);

    assert!(!output.status.success(), "Invalid identifier should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid container identifier"));
}

/// Test missing required argument error handling
#[test]
fn test_missing_argument() {
    let home = TempDir::new().unwrap();
    let output = topo(home.path(), &["build"]);

    assert!(!output.status.success(), "Missing argument should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("required") || stderr.contains("error"),
        "Should show error about missing argument"
    );
}
