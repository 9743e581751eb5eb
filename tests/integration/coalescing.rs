//! Last-wins coalescing of context updates and waiter release.

use crate::integration::test_utils::{
    coordinator, coordinator_with, ctx, wait_for, Call, MockProvider, Probe,
};
use flagstate::{CoordinatorConfig, CoordinatorError, ProviderStatus};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn updates_queued_behind_a_slow_reconcile_collapse_to_the_latest() {
    let coordinator = Arc::new(coordinator());
    let probe = Probe::new();
    let (provider, gate) = MockProvider::new("p", &probe).blocking_on("ctx1");
    coordinator
        .install_and_wait(Arc::new(provider), None)
        .await
        .unwrap();

    let spawn_update = |key: &'static str| {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.update_context_and_wait(ctx(key)).await })
    };

    let first = spawn_update("ctx1");
    wait_for(|| probe.reconciled_keys() == vec!["ctx1"]).await;
    assert_eq!(coordinator.status(), ProviderStatus::Reconciling);

    let mut later = Vec::new();
    for (submitted, key) in [(3, "ctx2"), (4, "ctx3"), (5, "ctx4")] {
        later.push(spawn_update(key));
        wait_for(|| coordinator.queue_stats().submitted == submitted).await;
    }
    assert_eq!(coordinator.queue_stats().pending, 1);

    gate.notify_one();
    assert_eq!(first.await.unwrap(), Ok(ProviderStatus::Ready));
    for handle in later {
        assert_eq!(handle.await.unwrap(), Ok(ProviderStatus::Ready));
    }

    assert_eq!(coordinator.evaluation_context(), Some(ctx("ctx4")));
    assert_eq!(probe.reconciled_keys(), vec!["ctx1", "ctx4"]);
    assert_eq!(
        probe.calls().last(),
        Some(&Call::ContextSet {
            provider: "p".to_string(),
            old: Some("ctx1".to_string()),
            new: "ctx4".to_string(),
        })
    );
    let stats = coordinator.queue_stats();
    assert_eq!(stats.coalesced, 2);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn burst_of_concurrent_updates_runs_at_most_two_bodies() {
    let coordinator = Arc::new(coordinator());
    let probe = Probe::new();
    let provider = MockProvider::new("p", &probe).with_delay(Duration::from_millis(5));
    coordinator
        .install_and_wait(Arc::new(provider), None)
        .await
        .unwrap();

    let burst = 50;
    let tasks: Vec<_> = (0..burst)
        .map(|i| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .update_context_and_wait(ctx(&format!("user-{i}")))
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), Ok(ProviderStatus::Ready));
    }

    let bodies = probe.reconciled_keys();
    assert!(!bodies.is_empty() && bodies.len() <= 2, "ran {bodies:?}");
    assert_eq!(bodies.last().map(String::as_str), Some("user-49"));
    assert_eq!(coordinator.evaluation_context(), Some(ctx("user-49")));

    let stats = coordinator.queue_stats();
    assert_eq!(stats.submitted, burst + 1);
    assert_eq!(stats.executed + stats.coalesced, stats.submitted);
}

#[tokio::test]
async fn install_is_a_barrier_for_coalescing() {
    let coordinator = Arc::new(coordinator());
    let probe = Probe::new();
    let (provider, gate) = MockProvider::new("first", &probe).blocking_on("hold");
    coordinator
        .install_and_wait(Arc::new(provider), None)
        .await
        .unwrap();

    coordinator.update_context(ctx("hold"));
    wait_for(|| probe.reconciled_keys() == vec!["hold"]).await;

    coordinator.update_context(ctx("a"));
    coordinator.update_context(ctx("b"));
    coordinator.install(Arc::new(MockProvider::new("second", &probe)), None);
    coordinator.update_context(ctx("c"));
    let last = coordinator.update_context_and_wait(ctx("d"));

    gate.notify_one();
    assert_eq!(last.await, Ok(ProviderStatus::Ready));
    assert_eq!(probe.reconciled_keys(), vec!["hold", "b", "d"]);
    assert_eq!(probe.initialized(), vec!["first", "second"]);
}

#[tokio::test]
async fn dropped_waiter_does_not_cancel_the_update() {
    let coordinator = coordinator();
    let probe = Probe::new();
    let (provider, gate) = MockProvider::new("p", &probe).blocking_on("slow");
    coordinator
        .install_and_wait(Arc::new(provider), None)
        .await
        .unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        coordinator.update_context_and_wait(ctx("slow")),
    )
    .await;
    assert!(abandoned.is_err());

    gate.notify_one();
    wait_for(|| coordinator.status() == ProviderStatus::Ready).await;
    assert_eq!(coordinator.evaluation_context(), Some(ctx("slow")));
    assert_eq!(probe.reconciled_keys(), vec!["slow"]);
}

#[tokio::test]
async fn configured_wait_timeout_releases_only_the_caller() {
    let mut config = CoordinatorConfig::default();
    config.queue.wait_timeout_ms = Some(20);
    let coordinator = coordinator_with(config);
    let probe = Probe::new();
    let (provider, gate) = MockProvider::new("p", &probe).blocking_on("slow");
    coordinator
        .install_and_wait(Arc::new(provider), None)
        .await
        .unwrap();

    let result = coordinator.update_context_and_wait(ctx("slow")).await;
    assert_eq!(
        result,
        Err(CoordinatorError::WaitTimeout(Duration::from_millis(20)))
    );
    assert_eq!(coordinator.status(), ProviderStatus::Reconciling);

    gate.notify_one();
    wait_for(|| coordinator.status() == ProviderStatus::Ready).await;
    assert_eq!(coordinator.evaluation_context(), Some(ctx("slow")));
}
