//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Configuration discovery against files on disk."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;

use gridplan_common::PlannerConfig;
use tempfile::tempdir;

#[test]
fn first_existing_candidate_wins() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.toml");
    let present = dir.path().join("gridplan.toml");
    fs::write(&present, "[storage]\ndata_dir = \"village-a\"\n").unwrap();

    let loaded = PlannerConfig::load_with_source(&[&missing, &present]).unwrap();
    assert_eq!(loaded.source.as_deref(), Some(present.as_path()));
    assert_eq!(
        loaded.config.storage.links_path(),
        std::path::PathBuf::from("village-a/links.csv")
    );
}

#[test]
fn missing_candidates_are_reported() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nowhere.toml");
    let err = PlannerConfig::load_with_source(&[&missing]).unwrap_err();
    assert!(err.to_string().contains("nowhere.toml"));
}

#[test]
fn invalid_file_names_its_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[api]\nrequest_timeout = 0\n").unwrap();
    let err = PlannerConfig::from_path(&path).unwrap_err();
    assert!(format!("{err:#}").contains("broken.toml"));
}
