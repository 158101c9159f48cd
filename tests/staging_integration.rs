//! Integration tests for build-context staging and directory synchronization.
//!
//! These run real `sh`, `cp` and `rsync` on the local machine against
//! temporary directories. No docker daemon is needed. Tests that need rsync are
//! skipped when it is not installed.

use dockwright::config::{BuildSettings, OversizedContextPolicy};
use dockwright::hash::staging_name;
use dockwright::macros::MacroResolver;
use dockwright::shell::{HostShell, ShellExecutor};
use dockwright::{DockwrightError, Macro, RemoteSync, SyncLocation, SyncRequest};
use serial_test::serial;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use test_tag::tag;
use walkdir::WalkDir;

fn rsync_available() -> bool {
    which::which("rsync").is_ok()
}

fn local_parts() -> (Arc<dyn ShellExecutor>, RemoteSync) {
    let shell: Arc<dyn ShellExecutor> = Arc::new(HostShell::new());
    let sync = RemoteSync::new(shell.clone(), 3);
    (shell, sync)
}

fn files_named(root: &Path, name: &str) -> usize {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name() == name)
        .count()
}

#[tokio::test]
#[serial]
#[tag(integration)]
async fn test_sync_mirrors_and_excludes() {
    if !rsync_available() {
        eprintln!("Skipping sync test (rsync not installed)");
        return;
    }

    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    fs::create_dir_all(src.path().join("pkg")).unwrap();
    fs::write(src.path().join("pkg/module.py"), "print('hi')\n").unwrap();
    fs::write(src.path().join("debug.log"), "noise\n").unwrap();
    fs::write(dst.path().join("stale.txt"), "old\n").unwrap();

    let (_, sync) = local_parts();
    let request = SyncRequest::new(src.path(), SyncLocation::local(dst.path()))
        .with_excludes(["*.log"])
        .mirror();
    sync.sync(&request).await.unwrap();

    assert_eq!(
        fs::read_to_string(dst.path().join("pkg/module.py")).unwrap(),
        "print('hi')\n"
    );
    assert!(!dst.path().join("debug.log").exists());
    assert!(!dst.path().join("stale.txt").exists());
}

#[tokio::test]
#[serial]
#[tag(integration)]
async fn test_missing_source_reports_rsync_exit_code() {
    if !rsync_available() {
        eprintln!("Skipping sync test (rsync not installed)");
        return;
    }

    let dst = tempfile::tempdir().unwrap();
    let (_, sync) = local_parts();
    let request = SyncRequest::new(
        Path::new("/nonexistent/dockwright/source"),
        SyncLocation::local(dst.path()),
    );

    let err = sync.sync(&request).await.unwrap_err();
    assert!(err.is_command_failure());
    assert!(err.exit_code().is_some_and(|code| code != 0));
}

#[tokio::test]
#[serial]
#[tag(integration)]
async fn test_resolved_context_holds_copies_and_syncs() {
    if !rsync_available() {
        eprintln!("Skipping staging test (rsync not installed)");
        return;
    }

    let project = tempfile::tempdir().unwrap();
    fs::write(project.path().join("config.toml"), "debug = true\n").unwrap();
    let sources = project.path().join("src");
    fs::create_dir_all(&sources).unwrap();
    fs::write(sources.join("main.py"), "import sys\n").unwrap();
    fs::write(sources.join("cache.pyc"), "\0").unwrap();

    let (shell, sync) = local_parts();
    let resolver = MacroResolver::new(shell, sync, BuildSettings::default());
    let macros = vec![
        Macro::line("FROM alpine AS base"),
        Macro::copy(project.path().join("config.toml"), "/etc/app/config.toml"),
        Macro::sync(
            SyncRequest::new(sources.as_path(), SyncLocation::local("/app/src"))
                .with_excludes(["*.pyc"]),
        ),
        Macro::inline_file("/usr/local/bin/hello.sh", "#!/bin/sh\necho hello\n", true),
    ];

    let staged_dir = resolver
        .with_resolved(&macros, |resolved| async move {
            let dir = resolved.build_dir.clone();
            assert_eq!(
                fs::read_to_string(dir.join("Dockerfile")).unwrap(),
                resolved.dockerfile
            );
            assert_eq!(
                fs::read_to_string(dir.join(staging_name(Path::new("/etc/app/config.toml"))))
                    .unwrap(),
                "debug = true\n"
            );
            assert_eq!(files_named(&dir, "main.py"), 1);
            assert_eq!(files_named(&dir, "cache.pyc"), 0);
            assert!(resolved.dockerfile.contains(" /etc/app/config.toml\n"));
            assert!(resolved.dockerfile.contains(" /app/src\n"));
            assert!(resolved.dockerfile.contains("RUN chmod +x /usr/local/bin/hello.sh\n"));
            Ok::<_, DockwrightError>(dir)
        })
        .await
        .unwrap();

    assert!(!staged_dir.exists());
}

#[tokio::test]
#[serial]
#[tag(integration)]
async fn test_oversized_context_is_rejected_under_error_policy() {
    let project = tempfile::tempdir().unwrap();
    fs::write(project.path().join("blob.bin"), vec![0u8; 2 * 1024 * 1024]).unwrap();

    let (shell, sync) = local_parts();
    let settings = BuildSettings {
        context_size_limit_mb: 1,
        oversized_context: OversizedContextPolicy::Error,
        large_file_threshold_mb: 1,
    };
    let resolver = MacroResolver::new(shell, sync, settings);
    let macros = vec![
        Macro::line("FROM alpine AS base"),
        Macro::copy(project.path().join("blob.bin"), "/blob.bin"),
    ];

    let err = resolver.preview(&macros).await.unwrap_err();
    assert!(matches!(err, DockwrightError::ContextTooLarge { limit_mb: 1, .. }));
}
