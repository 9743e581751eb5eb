//! Configuration files feeding a live coordinator.

use crate::integration::test_utils::{coordinator_with, with_xdg_env};
use flagstate::{ConfigLoader, CoordinatorError, NoOpProvider, ProviderCoordinator};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn global_config_file_drives_coordinator_settings() {
    let test_dir = TempDir::new().unwrap();
    let config_dir = test_dir.path().join("flagstate");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "[events]\ncapacity = 8\nreplay_status_on_subscribe = false\n",
    )
    .unwrap();

    let config = with_xdg_env(&test_dir, || ConfigLoader::load(None)).unwrap();
    assert_eq!(config.events.capacity, 8);

    let coordinator = coordinator_with(config);
    coordinator
        .install_and_wait(Arc::new(NoOpProvider), None)
        .await
        .unwrap();
    let mut late = coordinator.subscribe();
    assert!(late.try_recv().is_none());
    assert_eq!(coordinator.config().events.capacity, 8);
}

#[tokio::test]
async fn invalid_file_is_reported_before_a_coordinator_exists() {
    let test_dir = TempDir::new().unwrap();
    let path = test_dir.path().join("flagstate.toml");
    std::fs::write(&path, "[logging]\noutput = \"syslog\"\n").unwrap();

    let err = ConfigLoader::load_from_file(&path).unwrap_err();
    match err {
        CoordinatorError::Config(msg) => assert!(msg.contains("syslog")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn coordinator_requires_a_runtime() {
    assert_eq!(
        ProviderCoordinator::new().unwrap_err(),
        CoordinatorError::RuntimeUnavailable
    );
}
