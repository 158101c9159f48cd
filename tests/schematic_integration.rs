//! Integration tests for schematic files and configuration.
//!
//! Schematics are loaded from disk and previewed through a fully wired
//! [`Workbench`]. Previewing stages the build context with `cp` only, so no
//! docker daemon is required.

use dockwright::config::OversizedContextPolicy;
use dockwright::schematic::SchematicFile;
use dockwright::storage::StorageResolver;
use dockwright::{DockwrightConfig, MountRequest, Workbench};
use serial_test::serial;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use test_tag::tag;

const SCHEMATIC: &str = r#"
base_image = "python:3.12-slim"
name = "Trainer"
tag = "registry.local/trainer:dev"
scripts = ["export PYTHONUNBUFFERED=1"]

[[steps]]
type = "line"
text = "RUN pip install numpy"

[[steps]]
type = "copy"
src = "settings.toml"
dst = "/etc/trainer/settings.toml"

[[mounts]]
kind = "cache"
name = "pip"
mount_point = "/root/.cache/pip"

[[mounts]]
kind = "resource"
id = "mnist"
mount_point = "/resources/mnist"
excludes = ["*.tmp"]

[storage]
mnist = "data/mnist"
"#;

#[tokio::test]
#[serial]
#[tag(integration)]
async fn test_schematic_file_previews_through_workbench() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("settings.toml"), "epochs = 3\n").unwrap();
    let path = dir.path().join("trainer.toml");
    fs::write(&path, SCHEMATIC).unwrap();

    let (schematic, storage, tag) = SchematicFile::load(&path).unwrap();
    assert_eq!(tag.as_deref(), Some("registry.local/trainer:dev"));
    assert_eq!(schematic.builder.scripts, vec!["export PYTHONUNBUFFERED=1"]);
    assert_eq!(schematic.mount_requests.len(), 2);
    assert_eq!(
        storage.locate("mnist").await.unwrap(),
        dir.path().join("data/mnist")
    );
    assert!(matches!(
        &schematic.mount_requests[1],
        MountRequest::Resolve { excludes, .. } if excludes == &vec!["*.tmp".to_string()]
    ));

    let bench = Workbench::from_config(&DockwrightConfig::default(), Arc::new(storage));
    let env = bench.docker_env(&schematic, tag);
    assert_eq!(env.tag(), "registry.local/trainer:dev");

    let dockerfile = env.preview().await.unwrap();
    let lines: Vec<&str> = dockerfile.lines().collect();
    assert_eq!(lines[0], "FROM python:3.12-slim AS base");
    assert_eq!(lines[1], "RUN pip install numpy");
    assert!(lines[2].starts_with("COPY ") && lines[2].ends_with(" /etc/trainer/settings.toml"));
    assert!(dockerfile.contains(" /usr/local/bin/base64_runner.sh\n"));
    assert!(dockerfile.contains(" /entrypoint.sh\n"));
}

#[tokio::test]
#[serial]
#[tag(integration)]
async fn test_missing_copy_source_fails_preview() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(
        &path,
        r#"
base_image = "alpine"

[[steps]]
type = "copy"
src = "does-not-exist"
dst = "/x"
"#,
    )
    .unwrap();

    let (schematic, storage, _) = SchematicFile::load(&path).unwrap();
    let bench = Workbench::from_config(&DockwrightConfig::default(), Arc::new(storage));
    let err = bench.docker_env(&schematic, None).preview().await.unwrap_err();
    assert!(err.is_command_failure());
}

#[test]
fn test_config_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dockwright.toml");
    fs::write(
        &path,
        r#"
[docker]
host = "gpu-box"
image_repo = "registry.local/ml"
gpus = "all"

[placement]
cache_root = "/scratch/cache"

[sync]
concurrency = 8

[build]
oversized_context = "error"
"#,
    )
    .unwrap();

    let config = DockwrightConfig::from_toml_file(&path).unwrap();
    assert_eq!(config.docker.host.as_deref(), Some("gpu-box"));
    assert_eq!(config.docker.image_repo, "registry.local/ml");
    assert_eq!(config.docker.shm_size.as_deref(), Some("10g"));
    assert_eq!(config.placement.cache_root, PathBuf::from("/scratch/cache"));
    assert_eq!(
        config.placement.resource_root,
        PathBuf::from("/tmp/dockwright/resources")
    );
    assert_eq!(config.sync.concurrency, 8);
    assert_eq!(config.sync.host_command_concurrency, 5);
    assert_eq!(config.build.oversized_context, OversizedContextPolicy::Error);

    let reparsed = DockwrightConfig::from_toml_str(&config.to_toml_string()).unwrap();
    assert_eq!(reparsed, config);
}

#[test]
fn test_invalid_config_is_an_error() {
    let err = DockwrightConfig::from_toml_str("[docker]\nuse_cache = \"maybe\"\n").unwrap_err();
    assert!(err.to_string().to_lowercase().contains("toml"));
}
