use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use tailtrack::tracer::{Point, SelectionMode};
use tailtrack::TrackingConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TAILTRACK_CONFIG",
        "TAILTRACK_POOL_SLOTS",
        "TAILTRACK_RING_LENGTH",
        "TAILTRACK_SEGMENTS",
        "TAILTRACK_VIGOR_WINDOW_MS",
        "TAILTRACK_ANCHOR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "pool_slots": 4,
        "ring": { "length": 50, "replay_window": 20 },
        "tracer": {
            "anchor": [60.0, 80.0],
            "n_segments": 10,
            "tail_length": 90.0,
            "mode": "weighted_mean"
        },
        "vigor": { "window_ms": 100.0, "bout_threshold": 0.4 },
        "sequence": { "thresholds": { "axial": 0.01, "lateral": 0.02, "angular": 0.03 } },
        "tick_hz": 120.0
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("TAILTRACK_CONFIG", file.path());
    std::env::set_var("TAILTRACK_SEGMENTS", "12");
    std::env::set_var("TAILTRACK_ANCHOR", "10,20");

    let cfg = TrackingConfig::load().expect("load config");
    assert_eq!(cfg.pool_slots, 4);
    assert_eq!(cfg.ring_length, 50);
    assert_eq!(cfg.replay_window, 20);
    assert_eq!(cfg.tracer.n_segments, 12);
    assert_eq!(cfg.tracer.anchor, Point::new(10.0, 20.0));
    assert_eq!(cfg.tracer.tail_length, 90.0);
    assert_eq!(cfg.tracer.mode, SelectionMode::WeightedMean);
    assert_eq!(cfg.vigor.window, Duration::from_millis(100));
    assert_eq!(cfg.bout_threshold, 0.4);
    assert_eq!(cfg.sequence.thresholds.angular, 0.03);
    assert_eq!(cfg.tick_hz, 120.0);

    clear_env();
}

#[test]
fn env_overrides_apply_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TAILTRACK_POOL_SLOTS", "3");
    std::env::set_var("TAILTRACK_RING_LENGTH", "30");
    std::env::set_var("TAILTRACK_VIGOR_WINDOW_MS", "25");

    let cfg = TrackingConfig::load().expect("load config");
    assert_eq!(cfg.pool_slots, 3);
    assert_eq!(cfg.ring_length, 30);
    assert_eq!(cfg.replay_window, 30);
    assert_eq!(cfg.vigor.window, Duration::from_millis(25));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TAILTRACK_POOL_SLOTS", "0");
    assert!(TrackingConfig::load().is_err());
    clear_env();

    std::env::set_var("TAILTRACK_SEGMENTS", "many");
    assert!(TrackingConfig::load().is_err());
    clear_env();

    std::env::set_var("TAILTRACK_ANCHOR", "10");
    assert!(TrackingConfig::load().is_err());
    clear_env();

    std::env::set_var("TAILTRACK_CONFIG", "/nonexistent/tailtrack.json");
    let err = TrackingConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
    clear_env();
}
