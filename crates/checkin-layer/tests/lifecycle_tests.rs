use checkin_layer::events::{LayerEvent, RecordingSink};
use checkin_layer::prelude::*;
use checkin_layer::test_harness::{solid_picture, RecordingEngine, StaticAvatarLoader};
use checkin_test_utils::{ali_at_42, scattered_aggregates, single, user, user_with_avatar};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn loader() -> Arc<StaticAvatarLoader> {
    Arc::new(StaticAvatarLoader::new().serve_all(solid_picture(32, [30, 120, 200, 255])))
}

fn layer(engine: &Arc<RecordingEngine>, registry: &Arc<SpriteRegistry>) -> CheckInMapLayer {
    CheckInMapLayer::new(
        Arc::clone(engine) as Arc<dyn MapEngine>,
        Arc::clone(registry),
        loader(),
        LayerConfig::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_example_aggregate_renders_fallback_with_badge() {
    let engine = Arc::new(RecordingEngine::new());
    let layer = layer(&engine, &Arc::new(SpriteRegistry::new()));
    layer.mount().await;

    let report = layer.set_check_ins(&[ali_at_42()]).await;
    assert!(report.is_applied());

    let data = engine.source_data("checkins").unwrap();
    let props = &data.get(42).unwrap().properties;
    assert_eq!(props.user_count, 3);
    assert_eq!(props.icon_id.as_str(), "fallback");
    assert_eq!(props.avatar_url, None);

    let marker = engine.resolve_point("checkins-points", 42).unwrap();
    assert_eq!(marker.icon, "fallback");
    assert_eq!(marker.text, "+2");
}

#[tokio::test]
async fn test_rendering_twice_is_idempotent() {
    let engine = Arc::new(RecordingEngine::new());
    let layer = layer(&engine, &Arc::new(SpriteRegistry::new()));
    layer.mount().await;
    let list = scattered_aggregates(12);

    layer.set_check_ins(&list).await;
    let first = engine.source_data("checkins").unwrap();
    let images = engine.image_ids();

    layer.set_check_ins(&list).await;
    assert_eq!(engine.source_data("checkins").unwrap(), first);
    assert_eq!(engine.image_ids(), images);
    assert_eq!(engine.max_image_adds(), 1);
    assert_eq!(engine.layer_ids(), vec!["checkins-clusters", "checkins-points"]);
}

#[tokio::test]
async fn test_duplicate_locations_keep_first() {
    let engine = Arc::new(RecordingEngine::new());
    let layer = layer(&engine, &Arc::new(SpriteRegistry::new()));
    layer.mount().await;

    let report = layer
        .set_check_ins(&[
            single(7, user("a", "First"), 2),
            single(7, user("b", "Second"), 5),
        ])
        .await;

    assert_eq!(report.features, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(engine.source_data("checkins").unwrap().get(7).unwrap().properties.user_count, 2);
    assert_eq!(
        layer.aggregate(7).unwrap().users[0].display_name.as_deref(),
        Some("First")
    );
}

#[tokio::test]
async fn test_invalid_aggregates_are_dropped() {
    let engine = Arc::new(RecordingEngine::new());
    let layer = layer(&engine, &Arc::new(SpriteRegistry::new()));
    layer.mount().await;

    let bad = CheckInAggregate::new(9, f64::NAN, 0.0, vec![user("x", "X")], 1);
    let report = layer.set_check_ins(&[bad, ali_at_42()]).await;

    assert_eq!(report.features, 1);
    assert_eq!(report.rejected, 1);
}

#[tokio::test]
async fn test_initialization_waits_for_style_load() {
    let engine = Arc::new(RecordingEngine::loading());
    let layer = layer(&engine, &Arc::new(SpriteRegistry::new()));

    let (outcome, ()) = tokio::join!(layer.mount(), async {
        tokio::task::yield_now().await;
        assert!(!engine.has_source("checkins"));
        engine.finish_style_load();
    });

    assert_eq!(outcome, MountOutcome::Ready);
    assert!(engine.has_layer("checkins-clusters"));
    assert_eq!(engine.listener_count(), 6);
}

#[tokio::test]
async fn test_unmount_while_waiting_for_style_cancels() {
    let engine = Arc::new(RecordingEngine::loading());
    let layer = layer(&engine, &Arc::new(SpriteRegistry::new()));

    let (outcome, ()) = tokio::join!(layer.mount(), async {
        tokio::task::yield_now().await;
        layer.unmount();
    });

    assert_eq!(outcome, MountOutcome::Cancelled);
    assert_eq!(engine.listener_count(), 0);
    assert!(!engine.has_source("checkins"));
}

#[tokio::test]
async fn test_data_applied_once_source_creation_recovers() {
    let engine = Arc::new(RecordingEngine::new());
    engine.reject_sources(true);
    let layer = layer(&engine, &Arc::new(SpriteRegistry::new()));

    assert_eq!(layer.mount().await, MountOutcome::Ready);
    assert!(layer.is_ready());
    assert!(!engine.has_source("checkins"));

    let failed = layer.set_check_ins(&[ali_at_42()]).await;
    assert!(matches!(failed.status, SyncStatus::Failed(_)));

    engine.reject_sources(false);
    let report = layer.set_check_ins(&[ali_at_42()]).await;
    assert!(report.is_applied());
    assert!(engine.has_layer("checkins-clusters"));
    assert_eq!(engine.feature_count("checkins"), 1);
}

#[tokio::test]
async fn test_teardown_removes_layers_source_and_listeners() {
    let engine = Arc::new(RecordingEngine::new());
    let registry = Arc::new(SpriteRegistry::new());
    let layer = layer(&engine, &registry);
    layer.mount().await;
    layer.set_check_ins(&scattered_aggregates(3)).await;

    layer.unmount();

    assert!(engine.layer_ids().is_empty());
    assert_eq!(engine.source_count(), 0);
    assert_eq!(engine.listener_count(), 0);
    assert!(!layer.is_ready());
    // Images stay registered for the next mount
    assert!(engine.has_image("fallback"));
    assert!(registry.is_registered(&checkin_model::IconId::avatar("u1")));
}

#[tokio::test]
async fn test_teardown_on_disposed_engine_is_silent() {
    let engine = Arc::new(RecordingEngine::new());
    let layer = layer(&engine, &Arc::new(SpriteRegistry::new()));
    layer.mount().await;

    engine.dispose();
    layer.unmount();

    assert!(!layer.is_mounted());
    assert_eq!(engine.listener_count(), 0);
}

#[tokio::test]
async fn test_remount_does_not_reregister_or_leak() {
    let engine = Arc::new(RecordingEngine::new());
    let registry = Arc::new(SpriteRegistry::new());
    let layer = layer(&engine, &registry);
    let list = scattered_aggregates(5);

    for _ in 0..4 {
        layer.mount().await;
        layer.set_check_ins(&list).await;
        assert_eq!(engine.listener_count(), 6);
        layer.unmount();
    }

    assert_eq!(engine.max_image_adds(), 1);
    assert_eq!(engine.listener_count(), 0);
}

#[tokio::test]
async fn test_new_layer_on_same_engine_reuses_registry() {
    let engine = Arc::new(RecordingEngine::new());
    let registry = Arc::new(SpriteRegistry::new());
    let list = vec![single(1, user_with_avatar("u1", "Ali"), 1)];

    {
        let first = layer(&engine, &registry);
        first.mount().await;
        first.set_check_ins(&list).await;
    }

    let second = layer(&engine, &registry);
    second.mount().await;
    let report = second.set_check_ins(&list).await;

    assert!(report.avatars.iter().all(|(_, o)| o.is_present()));
    assert_eq!(engine.image_add_count("avatar-u1"), 1);
    assert_eq!(engine.resolve_point("checkins-points", 1).unwrap().icon, "avatar-u1");
}

#[tokio::test]
async fn test_lifecycle_events_in_order() {
    let engine = Arc::new(RecordingEngine::new());
    let sink = RecordingSink::new();
    let layer = CheckInMapLayer::new(
        Arc::clone(&engine) as Arc<dyn MapEngine>,
        Arc::new(SpriteRegistry::new()),
        loader(),
        LayerConfig::default().with_events(true),
    )
    .unwrap()
    .with_event_sink(Arc::new(sink.clone()));

    layer.mount().await;
    layer.set_check_ins(&[ali_at_42()]).await;
    layer.unmount();

    let kinds: Vec<&'static str> = sink
        .events()
        .iter()
        .filter_map(|e| match e {
            LayerEvent::SourceCreated { .. } => Some("source"),
            LayerEvent::LayersCreated { .. } => Some("layers"),
            LayerEvent::Ready => Some("ready"),
            LayerEvent::HandlersAttached { .. } => Some("handlers"),
            LayerEvent::DataApplied { .. } => Some("data"),
            LayerEvent::TornDown => Some("teardown"),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec!["source", "layers", "handlers", "ready", "data", "teardown"]);
}

#[tokio::test]
async fn test_layers_recreated_after_layer_creation_fails() {
    let engine = Arc::new(RecordingEngine::at_zoom(16.0));
    engine.reject_layers(true);
    let layer = layer(&engine, &Arc::new(SpriteRegistry::new()));

    assert_eq!(layer.mount().await, MountOutcome::Ready);
    assert!(engine.has_source("checkins"));
    assert!(engine.layer_ids().is_empty());

    let failed = layer.set_check_ins(&[ali_at_42()]).await;
    assert!(matches!(failed.status, SyncStatus::Failed(_)));

    engine.reject_layers(false);
    let report = layer.set_check_ins(&[ali_at_42()]).await;
    assert!(report.is_applied());
    assert_eq!(engine.layer_ids(), vec!["checkins-clusters", "checkins-points"]);
    assert_eq!(engine.resolve_point("checkins-points", 42).unwrap().text, "+2");
    // Zoom 16 is past the cluster max zoom
    assert!(!engine.is_layer_visible("checkins-clusters"));
}

#[tokio::test(start_paused = true)]
async fn test_list_arriving_during_initialization_gets_avatars() {
    let engine = Arc::new(RecordingEngine::new());
    let loader = Arc::new(
        StaticAvatarLoader::new()
            .serve_all(solid_picture(32, [30, 120, 200, 255]))
            .with_delay(Duration::from_millis(50)),
    );
    let layer = CheckInMapLayer::new(
        Arc::clone(&engine) as Arc<dyn MapEngine>,
        Arc::new(SpriteRegistry::new()),
        Arc::clone(&loader) as Arc<dyn AvatarLoader>,
        LayerConfig::default(),
    )
    .unwrap();

    let first = layer.set_check_ins(&[single(1, user_with_avatar("u1", "Ali"), 1)]).await;
    assert_eq!(first.status, SyncStatus::Deferred);

    let (outcome, second) = tokio::join!(layer.mount(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        layer
            .set_check_ins(&[single(2, user_with_avatar("u2", "Bea"), 1)])
            .await
    });

    assert_eq!(outcome, MountOutcome::Ready);
    assert_eq!(second.status, SyncStatus::Deferred);
    assert_eq!(engine.feature_count("checkins"), 1);
    assert!(engine.has_image("avatar-u2"));
    assert_eq!(engine.resolve_point("checkins-points", 2).unwrap().icon, "avatar-u2");
    assert_eq!(loader.calls(&checkin_test_utils::avatar_url("u2")), 1);
}

#[tokio::test]
async fn test_rejected_entry_does_not_shadow_valid_popup_data() {
    let engine = Arc::new(RecordingEngine::new());
    let layer = layer(&engine, &Arc::new(SpriteRegistry::new()));
    layer.mount().await;

    let report = layer
        .set_check_ins(&[
            CheckInAggregate::new(7, f64::NAN, 0.0, vec![user("a", "Bad")], 1),
            CheckInAggregate::new(7, 10.0, 20.0, vec![user("b", "Good")], 1),
        ])
        .await;

    assert_eq!(report.features, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.duplicates, 0);
    let kept = layer.aggregate(7).unwrap();
    assert_eq!(kept.users[0].display_name.as_deref(), Some("Good"));
    assert!((kept.lat - 10.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_existing_source_is_not_reported_as_created() {
    let engine = Arc::new(RecordingEngine::new());
    let config = LayerConfig::default().with_events(true);
    engine
        .add_source("checkins", &SourceSpec::clustered(&config))
        .unwrap();
    let sink = RecordingSink::new();
    let layer = CheckInMapLayer::new(
        Arc::clone(&engine) as Arc<dyn MapEngine>,
        Arc::new(SpriteRegistry::new()),
        loader(),
        config,
    )
    .unwrap()
    .with_event_sink(Arc::new(sink.clone()));

    assert_eq!(layer.mount().await, MountOutcome::Ready);

    assert!(!sink
        .events()
        .iter()
        .any(|e| matches!(e, LayerEvent::SourceCreated { .. })));
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, LayerEvent::LayersCreated { .. })));
}
