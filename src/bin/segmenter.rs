//! segmenter - run a detection engine over a video or a single image
//!
//! `video` streams the configured input through the pipeline, writing an MJPEG
//! stream plus a CSV run log. Ctrl-C cancels at the next frame boundary and keeps
//! everything written so far.
//!
//! `image` annotates one image file.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use segment_pipeline::display::{HistoryRecorder, SeriesPoint};
use segment_pipeline::ui::Ui;
use segment_pipeline::{
    drive, engine_from_settings, open_run, still, CoalescingDisplay, FramePipelineScheduler,
    PipelineConfig, RunReport, RunState,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Console output: auto, plain or pretty.
    #[arg(long, default_value = "auto", global = true)]
    ui: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a video (or a stub:// clip) frame by frame.
    Video(VideoArgs),
    /// Annotate a single image.
    Image(ImageArgs),
}

#[derive(Args, Debug, Default)]
struct EngineArgs {
    /// Inference engine: stub, motion or tract.
    #[arg(long)]
    engine: Option<String>,
    /// ONNX model for the tract engine.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Minimum detection confidence.
    #[arg(long)]
    confidence: Option<f32>,
}

#[derive(Args, Debug)]
struct VideoArgs {
    /// Input video path or stub:// clip (overrides SEGMENTER_INPUT).
    #[arg(long)]
    input: Option<String>,
    /// Output MJPEG stream.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Output CSV run log.
    #[arg(long)]
    log: Option<PathBuf>,
    /// Run log mode: append or create.
    #[arg(long)]
    log_mode: Option<String>,
    /// Per-frame inference deadline in milliseconds (0 disables).
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Detections per occupancy percentage point.
    #[arg(long)]
    occupancy_divisor: Option<u64>,
    /// Pacing: unthrottled or source-rate.
    #[arg(long)]
    pacing: Option<String>,
    /// Write a JSON run summary here.
    #[arg(long)]
    summary_json: Option<PathBuf>,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Args, Debug)]
struct ImageArgs {
    /// Image to annotate.
    input: PathBuf,
    /// Annotated output (defaults to <input>_annotated.png).
    #[arg(long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    report: &'a RunReport,
    occupancy: Vec<SeriesPoint>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let ui = Ui::from_args(Some(&cli.ui), std::io::stderr().is_terminal());
    match cli.command {
        Command::Video(args) => run_video(&ui, args),
        Command::Image(args) => run_image(&ui, args),
    }
}

fn run_video(ui: &Ui, args: VideoArgs) -> Result<()> {
    let mut cfg = PipelineConfig::load()?;
    if let Some(input) = args.input {
        cfg.input = input;
    }
    if let Some(output) = args.output {
        cfg.output.video = output;
    }
    if let Some(log) = args.log {
        cfg.output.log = log;
    }
    if let Some(mode) = args.log_mode {
        cfg.output.log_mode = mode.parse()?;
    }
    if let Some(ms) = args.timeout_ms {
        cfg.engine.timeout = (ms > 0).then(|| std::time::Duration::from_millis(ms));
    }
    if let Some(divisor) = args.occupancy_divisor {
        cfg.occupancy_divisor = divisor;
    }
    if let Some(pacing) = args.pacing {
        cfg.pacing = pacing.parse()?;
    }
    apply_engine_args(&mut cfg, args.engine);
    let cfg = cfg.validated()?;

    let engine = {
        let _stage = ui.stage("load engine");
        engine_from_settings(&cfg.engine)?
    };
    let mut run = {
        let _stage = ui.stage("open input and output");
        open_run(&cfg)?
    };

    let cancel = run.cancel_handle();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received, cancelling after the current frame");
        cancel.cancel();
    })
    .context("error setting Ctrl-C handler")?;

    let progress = ui.progress();
    let history = HistoryRecorder::default();
    let mut scheduler = FramePipelineScheduler::new(engine)
        .with_display(CoalescingDisplay::spawn(progress.clone())?)
        .with_progress_every(cfg.progress_every);
    scheduler.subscribe(history.clone());

    let mut sized = false;
    let report = drive(&mut scheduler, &mut run, cfg.pacing, |run| {
        if !sized {
            progress.set_total(run.stream_info().and_then(|info| info.total_frames));
            sized = true;
        }
    })?;
    drop(scheduler);

    let snapshot = report.snapshot;
    progress.finish(&format!(
        "{}: {} frames, {} detections, occupancy {}%",
        report.state, snapshot.frames_processed, snapshot.detections_total, snapshot.occupancy_percent
    ));

    if let Some(path) = &args.summary_json {
        let summary = RunSummary {
            report: &report,
            occupancy: history.history().points().copied().collect(),
        };
        write_json(path, &summary)?;
        log::info!("run summary written to {}", path.display());
    }

    match (&report.state, &report.failure) {
        (RunState::Failed, Some(failure)) => Err(anyhow!("{}", failure.reason)),
        (RunState::Failed, None) => Err(anyhow!("run failed")),
        _ => Ok(()),
    }
}

fn run_image(ui: &Ui, args: ImageArgs) -> Result<()> {
    let mut cfg = PipelineConfig::load()?;
    apply_engine_args(&mut cfg, args.engine);
    cfg.engine.timeout = None;
    let cfg = cfg.validated()?;

    let output = args
        .output
        .unwrap_or_else(|| annotated_path(&args.input));
    let mut engine = {
        let _stage = ui.stage("load engine");
        engine_from_settings(&cfg.engine)?
    };
    let report = {
        let _stage = ui.stage("annotate image");
        still::process_image(engine.as_mut(), &args.input, &output)?
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn apply_engine_args(cfg: &mut PipelineConfig, args: EngineArgs) {
    if let Some(engine) = args.engine {
        cfg.engine.name = engine;
    }
    if let Some(model) = args.model {
        cfg.engine.model_path = Some(model);
    }
    if let Some(confidence) = args.confidence {
        cfg.engine.confidence = confidence;
    }
}

fn annotated_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    input.with_file_name(format!("{}_annotated.png", stem))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
