//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Command line runs against a temporary data directory."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use assert_cmd::Command;
use tempfile::{tempdir, TempDir};

const REQUEST: &str = r#"{
    "start_date": "2022-01-01",
    "n_days": 365,
    "project_lifetime": 20,
    "wacc": 0.0,
    "hv_cable": {"capex": 10, "lifetime": 20},
    "lv_cable": {"capex": 4, "lifetime": 20},
    "connection": {"capex": 140, "lifetime": 20},
    "pole": {"capex": 800, "lifetime": 10, "max_connections": 4},
    "optimization": {"n_relaxation_steps": 5, "first_guess_strategy": "k_means"}
}"#;

const DOCUMENT: &str = r#"{
    "nodes": [
        {"id": "a", "latitude": -3.0000, "longitude": 30.0000, "role": "consumer"},
        {"id": "b", "latitude": -3.0001, "longitude": 30.0000, "role": "consumer"},
        {"id": "c", "latitude": -3.0000, "longitude": 30.0001, "role": "consumer"},
        {"id": "d", "latitude": -3.0001, "longitude": 30.0001, "role": "consumer"}
    ],
    "links": []
}"#;

fn workspace() -> TempDir {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("request.json"), REQUEST).unwrap();
    fs::write(dir.path().join("grid.json"), DOCUMENT).unwrap();
    fs::write(
        dir.path().join("gridplan.toml"),
        "[logging]\ndirectory = \"logs\"\n\n[storage]\ndata_dir = \"data\"\nreport_dir = \"reports\"\n",
    )
    .unwrap();
    dir
}

fn gridplanctl(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("gridplanctl").unwrap();
    cmd.current_dir(dir)
        .env_remove("GRIDPLAN_CONFIG")
        .env("GRIDPLAN_LOG", "warn");
    cmd
}

#[test]
fn import_then_optimize_writes_tables_and_reports() {
    let dir = workspace();
    gridplanctl(dir.path())
        .args(["import", "--file", "grid.json"])
        .assert()
        .success();
    assert!(dir.path().join("data/nodes.csv").is_file());

    gridplanctl(dir.path())
        .args(["optimize", "--request", "request.json"])
        .assert()
        .success();

    let nodes = fs::read_to_string(dir.path().join("data/nodes.csv")).unwrap();
    assert!(nodes.contains("pole"));
    let links = fs::read_to_string(dir.path().join("data/links.csv")).unwrap();
    assert_eq!(links.matches("distribution").count(), 4);
    assert!(dir.path().join("reports/run.json").is_file());
    assert!(dir.path().join("reports/layout.json").is_file());

    let output = gridplanctl(dir.path())
        .args(["summary", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("\"n_consumers\": 4"));
}

#[test]
fn import_rejects_dangling_links() {
    let dir = workspace();
    fs::write(
        dir.path().join("broken.json"),
        r#"{"nodes": [{"id": "a", "latitude": 0.0, "longitude": 0.0, "role": "consumer"}],
            "links": [{"from_id": "a", "to_id": "ghost", "link_type": "distribution",
                       "lat_from": 0.0, "lon_from": 0.0, "lat_to": 0.0, "lon_to": 0.001}]}"#,
    )
    .unwrap();
    gridplanctl(dir.path())
        .args(["import", "--file", "broken.json"])
        .assert()
        .failure();
    assert!(!dir.path().join("data/nodes.csv").exists());
}

#[test]
fn boundary_removal_and_document_export() {
    let dir = workspace();
    fs::write(
        dir.path().join("boundary.json"),
        "[[-3.00005, 29.99995], [-3.00005, 30.00005], [-2.99995, 30.00005], [-2.99995, 29.99995]]",
    )
    .unwrap();
    gridplanctl(dir.path())
        .args(["import", "--file", "grid.json"])
        .assert()
        .success();
    gridplanctl(dir.path())
        .args(["remove-boundary", "--boundary", "boundary.json"])
        .assert()
        .success();
    gridplanctl(dir.path())
        .args(["export", "--document", "out.json"])
        .assert()
        .success();

    let exported: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("out.json")).unwrap()).unwrap();
    let ids: Vec<_> = exported["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(ids, vec!["b", "c", "d"]);
}

#[test]
fn missing_explicit_config_fails() {
    let dir = workspace();
    gridplanctl(dir.path())
        .args(["--config", "absent.toml", "summary"])
        .assert()
        .failure();
}
