use segment_pipeline::detect::StubEngine;
use segment_pipeline::sink::{metadata_path, read_metadata, read_records, split_mjpeg, LOG_HEADER};
use segment_pipeline::{
    drive, open_run, open_sink, FileConfig, FileSource, FramePipelineScheduler, LogOpenMode,
    Pacing, PipelineConfig, PipelineError, PipelineRun, RunState,
};

fn config_for(dir: &std::path::Path, input: &str) -> PipelineConfig {
    let mut cfg = PipelineConfig::load().expect("defaults");
    cfg.input = input.to_string();
    cfg.output.video = dir.join("out.mjpeg");
    cfg.output.log = dir.join("out.csv");
    cfg.validated().expect("valid config")
}

#[test]
fn video_run_writes_mjpeg_and_csv() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_for(dir.path(), "stub://lot?frames=6&width=32&height=24&fault=2");
    let mut run = open_run(&cfg).unwrap();
    let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));

    let report = drive(&mut scheduler, &mut run, Pacing::Unthrottled, |_| {}).unwrap();
    assert_eq!(report.state, RunState::Finished);
    assert_eq!(report.snapshot.frames_processed, 5);

    let bytes = std::fs::read(&cfg.output.video).unwrap();
    let images = split_mjpeg(&bytes);
    assert_eq!(images.len(), 5);
    let first = image::load_from_memory(images[0]).unwrap();
    assert_eq!((first.width(), first.height()), (32, 24));

    let records = read_records(&cfg.output.log).unwrap();
    let indices: Vec<u64> = records.iter().map(|r| r.frame_index).collect();
    assert_eq!(indices, vec![1, 3, 4, 5, 6]);
    assert_eq!(records.last().map(|r| r.detections_total), Some(report.snapshot.detections_total));
}

#[test]
fn append_mode_writes_header_once() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("runs.csv");

    for name in ["a", "b"] {
        let sink = open_sink(
            &dir.path().join(format!("{}.mjpeg", name)),
            &log,
            LogOpenMode::Append,
            80,
        )
        .unwrap();
        let source = FileSource::new(FileConfig {
            path: "stub://twice?frames=3&width=8&height=8".to_string(),
        })
        .unwrap();
        let mut run = PipelineRun::new(Box::new(source), sink);
        let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));
        drive(&mut scheduler, &mut run, Pacing::Unthrottled, |_| {}).unwrap();
    }

    let raw = std::fs::read_to_string(&log).unwrap();
    assert_eq!(raw.matches(LOG_HEADER).count(), 1);
    assert_eq!(read_records(&log).unwrap().len(), 6);
}

#[test]
fn create_mode_replaces_previous_log() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config_for(dir.path(), "stub://fresh?frames=2&width=8&height=8");
    cfg.output.log_mode = LogOpenMode::Create;
    std::fs::write(&cfg.output.log, format!("{}\n9,1,1,0\n", LOG_HEADER)).unwrap();

    let mut run = open_run(&cfg).unwrap();
    let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));
    drive(&mut scheduler, &mut run, Pacing::Unthrottled, |_| {}).unwrap();

    let indices: Vec<u64> = read_records(&cfg.output.log)
        .unwrap()
        .iter()
        .map(|r| r.frame_index)
        .collect();
    assert_eq!(indices, vec![1, 2]);
}

#[test]
fn unopenable_source_leaves_previous_output_intact() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config_for(dir.path(), "stub://missing?fail=open");
    cfg.output.log_mode = LogOpenMode::Create;
    let video = vec![0xAB; 4096];
    let log = format!("{}\n1,2,2,0\n", LOG_HEADER);
    std::fs::write(&cfg.output.video, &video).unwrap();
    std::fs::write(&cfg.output.log, &log).unwrap();

    let mut run = open_run(&cfg).unwrap();
    let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));
    let err = drive(&mut scheduler, &mut run, Pacing::Unthrottled, |_| {}).unwrap_err();
    assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
    assert_eq!(run.state(), RunState::Failed);

    assert_eq!(std::fs::read(&cfg.output.video).unwrap(), video);
    assert_eq!(std::fs::read_to_string(&cfg.output.log).unwrap(), log);
    assert!(!metadata_path(&cfg.output.video).exists());
}

#[test]
fn stream_metadata_records_source_frame_rate() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_for(dir.path(), "stub://paced?frames=3&width=8&height=6&fps=12");
    let mut run = open_run(&cfg).unwrap();
    let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));
    drive(&mut scheduler, &mut run, Pacing::Unthrottled, |_| {}).unwrap();

    let metadata = read_metadata(&cfg.output.video).unwrap();
    assert_eq!(metadata.frame_rate, 12.0);
    assert_eq!((metadata.width, metadata.height), (8, 6));
    assert_eq!(metadata.frames, Some(3));
}

#[test]
fn append_refuses_foreign_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("other.csv");
    std::fs::write(&log, "time,value\n1,2\n").unwrap();

    let err = open_sink(&dir.path().join("v.mjpeg"), &log, LogOpenMode::Append, 80)
        .err()
        .expect("foreign header");
    assert!(format!("{:#}", err).contains("unexpected header"));
}

#[test]
fn cancelled_run_keeps_valid_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_for(dir.path(), "stub://cut?frames=10&width=16&height=16");
    let mut run = open_run(&cfg).unwrap();
    let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));

    let report = drive(&mut scheduler, &mut run, Pacing::Unthrottled, |run| {
        if run.snapshot().frames_processed == 4 {
            run.cancel_handle().cancel();
        }
    })
    .unwrap();
    assert_eq!(report.state, RunState::Cancelled);

    let bytes = std::fs::read(&cfg.output.video).unwrap();
    let images = split_mjpeg(&bytes);
    assert_eq!(images.len(), 4);
    assert!(image::load_from_memory(images[3]).is_ok());
    assert_eq!(read_records(&cfg.output.log).unwrap().len(), 4);
}
