use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use segment_pipeline::config::PipelineConfig;
use segment_pipeline::{LogOpenMode, Pacing};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SEGMENTER_CONFIG",
        "SEGMENTER_INPUT",
        "SEGMENTER_OUTPUT",
        "SEGMENTER_LOG",
        "SEGMENTER_ENGINE",
        "SEGMENTER_INFERENCE_TIMEOUT_MS",
        "SEGMENTER_OCCUPANCY_DIVISOR",
        "SEGMENTER_PACING",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = PipelineConfig::load().expect("load defaults");
    assert_eq!(cfg.input, "stub://demo");
    assert_eq!(cfg.output.video.to_str(), Some("output.mjpeg"));
    assert_eq!(cfg.output.log.to_str(), Some("output_log.csv"));
    assert_eq!(cfg.output.log_mode, LogOpenMode::Append);
    assert_eq!(cfg.engine.name, "stub");
    assert_eq!(cfg.engine.confidence, 0.4);
    assert_eq!(cfg.engine.timeout, None);
    assert_eq!(cfg.occupancy_divisor, 5);
    assert_eq!(cfg.pacing, Pacing::Unthrottled);
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "input": "stub://lobby?frames=20",
        "output": {
            "video": "lobby.mjpeg",
            "log": "lobby.csv",
            "log_mode": "create",
            "jpeg_quality": 70
        },
        "engine": {
            "name": "motion",
            "motion_grid": 4,
            "timeout_ms": 500
        },
        "occupancy_divisor": 8,
        "progress_every": 25
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("SEGMENTER_CONFIG", file.path());
    std::env::set_var("SEGMENTER_OUTPUT", "override.mjpeg");
    std::env::set_var("SEGMENTER_INFERENCE_TIMEOUT_MS", "1500");
    std::env::set_var("SEGMENTER_PACING", "source-rate");

    let cfg = PipelineConfig::load().expect("load config");
    assert_eq!(cfg.input, "stub://lobby?frames=20");
    assert_eq!(cfg.output.video.to_str(), Some("override.mjpeg"));
    assert_eq!(cfg.output.log.to_str(), Some("lobby.csv"));
    assert_eq!(cfg.output.log_mode, LogOpenMode::Create);
    assert_eq!(cfg.output.jpeg_quality, 70);
    assert_eq!(cfg.engine.name, "motion");
    assert_eq!(cfg.engine.motion_grid, 4);
    assert_eq!(cfg.engine.timeout, Some(Duration::from_millis(1500)));
    assert_eq!(cfg.occupancy_divisor, 8);
    assert_eq!(cfg.progress_every, 25);
    assert_eq!(cfg.pacing, Pacing::SourceRate);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    file.write_all(
        br#"
input = "stub://dock"
occupancy_divisor = 3

[engine]
name = "stub"
confidence = 0.6
"#,
    )
    .expect("write config");
    std::env::set_var("SEGMENTER_CONFIG", file.path());
    std::env::set_var("SEGMENTER_ENGINE", "Motion");

    let cfg = PipelineConfig::load().expect("load toml config");
    assert_eq!(cfg.input, "stub://dock");
    assert_eq!(cfg.occupancy_divisor, 3);
    assert_eq!(cfg.engine.confidence, 0.6);
    assert_eq!(cfg.engine.name, "motion");
    assert_eq!(cfg.occupancy_scale().unwrap().percent(10), 3);

    clear_env();
}

#[test]
fn rejects_bad_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    clear_env();
    std::env::set_var("SEGMENTER_OCCUPANCY_DIVISOR", "0");
    let err = PipelineConfig::load().unwrap_err();
    assert!(err.to_string().contains("occupancy divisor"));

    clear_env();
    std::env::set_var("SEGMENTER_INFERENCE_TIMEOUT_MS", "soon");
    assert!(PipelineConfig::load().is_err());

    clear_env();
    std::env::set_var("SEGMENTER_PACING", "warp");
    assert!(PipelineConfig::load().is_err());

    clear_env();
    std::env::set_var("SEGMENTER_ENGINE", "yolo9000");
    assert!(PipelineConfig::load().is_err());

    clear_env();
    std::env::set_var("SEGMENTER_CONFIG", "/nonexistent/segmenter.json");
    let err = PipelineConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
