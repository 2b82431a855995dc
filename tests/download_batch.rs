//! Download batches against a fake aria2c
//!
//! ```bash
//! cargo test --test download_batch
//! ```

#![cfg(unix)]

mod common;

use common::{download_config, drain_events, fake_aria2c, write_script};
use podkit::{ArtifactDescriptor, DownloadBatchCoordinator, Error, Event};
use std::path::Path;
use std::sync::Arc;

fn read_log(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

struct Harness {
    dir: tempfile::TempDir,
    log: std::path::PathBuf,
    coordinator: DownloadBatchCoordinator<Vec<u8>>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("backend.log");
    let aria2c = fake_aria2c(dir.path(), &log);
    let helper = write_script(
        dir.path(),
        "drive_helper",
        &format!(r#"echo "$@" >> "{}"; echo "Downloaded from drive""#, log.display()),
    );
    let config = download_config(dir.path(), &aria2c, &helper);
    Harness {
        coordinator: DownloadBatchCoordinator::new(Arc::new(config), Vec::new()),
        dir,
        log,
    }
}

fn console(coordinator: &DownloadBatchCoordinator<Vec<u8>>) -> String {
    String::from_utf8_lossy(coordinator.get_ref()).into_owned()
}

#[tokio::test]
async fn test_second_failure_skips_third() {
    let mut h = harness();
    let mut events = h.coordinator.subscribe();
    let batch = [
        ArtifactDescriptor::new("one", "https://example.com/one.safetensors", "checkpoints"),
        ArtifactDescriptor::new("two", "https://example.com/BROKEN-ARTIFACT/two.bin", "loras"),
        ArtifactDescriptor::new("three", "https://example.com/three.safetensors", "vae"),
    ];

    match h.coordinator.run(&batch).await {
        Err(Error::DownloadProcessFailed { name, exit_code }) => {
            assert_eq!(name, "two");
            assert_eq!(exit_code, Some(3));
        }
        other => panic!("expected DownloadProcessFailed, got {other:?}"),
    }

    let log = read_log(&h.log);
    assert_eq!(log.len(), 2, "backend runs: {log:?}");
    assert!(log[0].contains("one.safetensors"));
    assert!(log[1].contains("two.bin"));
    assert!(!log.iter().any(|line| line.contains("three")));

    let out = console(&h.coordinator);
    assert!(out.contains("Starting download: one\n"));
    assert!(out.contains("Download completed: one\n"));
    assert!(out.contains("Starting download: two\n"));
    assert!(out.contains("errorCode=3 Resource not found\n"));
    assert!(!out.contains("Download completed: two"));
    assert!(!out.contains("three"));

    let events = drain_events(&mut events);
    assert_eq!(
        events,
        vec![
            Event::DownloadStarted { name: "one".into() },
            Event::DownloadComplete { name: "one".into() },
            Event::DownloadStarted { name: "two".into() },
            Event::DownloadFailed {
                name: "two".into(),
                error: "download failed for two (exit status: 3)".into(),
            },
        ]
    );
}

#[tokio::test]
async fn test_full_batch_succeeds_in_order() {
    let mut h = harness();
    let mut events = h.coordinator.subscribe();
    let batch = [
        ArtifactDescriptor::new("base", "https://example.com/base.safetensors", "checkpoints"),
        ArtifactDescriptor::new("upscaler", "https://example.com/4x.pth", "upscale_models"),
    ];

    let report = h.coordinator.run(&batch).await.unwrap();
    assert_eq!(report.len(), 2);
    assert_eq!(report.completed[0].name, "base");
    assert!(report.completed[0].destination.ends_with("models/ckpts"));
    assert!(report.completed[1].destination.ends_with("models/upscale_models"));
    assert!(report.completed[0].destination.is_dir());

    let out = console(&h.coordinator);
    let first = out.find("Download completed: base").unwrap();
    let second = out.find("Starting download: upscaler").unwrap();
    assert!(first < second);
    assert!(out.contains("Download progress [#2089b0 1.0MiB/1.0MiB(100%) CN:1 DL:4.2MiB]\n"));
    assert!(!out.contains("[COMPLETED]"));

    let events = drain_events(&mut events);
    assert_eq!(events.last(), Some(&Event::BatchComplete { count: 2 }));
}

#[tokio::test]
async fn test_unknown_kind_spawns_nothing() {
    let mut h = harness();
    let batch = [
        ArtifactDescriptor::new("ok", "https://example.com/ok.bin", "loras"),
        ArtifactDescriptor::new("bad", "https://example.com/bad.bin", "lora"),
    ];

    assert!(matches!(
        h.coordinator.run(&batch).await,
        Err(Error::UnknownArtifactKind { .. })
    ));
    assert!(!h.log.exists());
    assert!(!h.dir.path().join("models").exists());
    assert!(console(&h.coordinator).is_empty());
}

#[tokio::test]
async fn test_drive_url_uses_helper() {
    let mut h = harness();
    let url = "https://drive.google.com/file/d/1AbCdEf/view?usp=sharing";
    let batch = [ArtifactDescriptor::new("drive model", url, "controlnet")];

    h.coordinator.run(&batch).await.unwrap();

    let log = read_log(&h.log);
    assert_eq!(log.len(), 1);
    let dest = h.dir.path().join("models").join("controlnet");
    assert_eq!(log[0], format!("--path {} --url {}", dest.display(), url));
    assert!(console(&h.coordinator).contains("Downloaded from drive\n"));
}

#[tokio::test]
async fn test_missing_backend_fails_batch() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-aria2c");
    let config = download_config(dir.path(), &missing, &missing);
    let mut coordinator = DownloadBatchCoordinator::new(Arc::new(config), Vec::new());

    let batch = [ArtifactDescriptor::new("x", "https://example.com/x.bin", "vae")];
    assert!(matches!(
        coordinator.run(&batch).await,
        Err(Error::ExternalTool(_))
    ));
}
