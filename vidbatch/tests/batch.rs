#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use vidbatch::{
    BatchEvent, BatchOptions, BatchReport, BatchRequest, BatchRunner, BatchState, CaptionSegment, CaptionSource,
    CaptionStyle, Error, ExecutionOutcome, Preset, StaticCaptions,
};

/// Stand-in engine: `*fail*` inputs exit 1, `*slow*` inputs hang after one
/// progress line, everything else reports progress (out of order at one point)
/// and writes its output. Caption runs require the sidecar next to the input.
const ENGINE: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then echo "fake engine"; exit 0; fi
input=""
prev=""
for arg; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  prev="$arg"
done
out="$prev"
case "$input" in
  *fail*) echo "broken input" >&2; echo "Conversion failed!" >&2; : > "$out"; exit 1 ;;
  *slow*) : > "$out"; echo "frame=1 time=00:00:01.00 bitrate=1" >&2; exec sleep 30 ;;
esac
case "$*" in
  *subtitles=*) [ -f "${input%.*}.vidbatch.srt" ] || { echo "missing sidecar" >&2; exit 3; } ;;
esac
printf 'frame=1 time=00:00:02.00 bitrate=1\r' >&2
printf 'frame=2 time=00:00:05.00 bitrate=1\r' >&2
printf 'frame=3 time=00:00:03.00 bitrate=1\r' >&2
printf 'frame=4 time=00:00:10.00 bitrate=1\n' >&2
: > "$out"
"#;

/// Stand-in probe: every file lasts 10 s unless its name contains `noprobe`
/// (fails) or `hang` (never answers).
const PROBE: &str = r#"#!/bin/sh
for last; do :; done
case "$last" in
  *noprobe*) echo "invalid data" >&2; exit 1 ;;
  *hang*) exec sleep 20 ;;
  *) echo 10.000000 ;;
esac
"#;

struct Fixture {
    root: PathBuf,
    input: PathBuf,
    engine: PathBuf,
    probe: PathBuf,
}

impl Fixture {
    fn new(name: &str) -> Self {
        let root = std::env::temp_dir().join(format!("vidbatch_it_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        let input = root.join("input");
        let tools = root.join("tools");
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&tools).unwrap();

        let engine = write_script(&tools, "engine.sh", ENGINE);
        let probe = write_script(&tools, "probe.sh", PROBE);
        Self {
            root,
            input,
            engine,
            probe,
        }
    }

    fn touch(&self, name: &str) -> PathBuf {
        let path = self.input.join(name);
        fs::write(&path, b"media").unwrap();
        path
    }

    fn options(&self) -> BatchOptions {
        BatchOptions::new()
            .ffmpeg(&self.engine)
            .ffprobe(&self.probe)
            .kill_grace(Duration::from_millis(500))
            .sort_by_name(true)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

async fn run_collecting(runner: BatchRunner, request: BatchRequest) -> (BatchReport, Vec<BatchEvent>) {
    let mut handle = runner.start(request);
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    (handle.join().await.unwrap(), events)
}

fn progress_of(events: &[BatchEvent], index: usize) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::Progress { index: i, fraction } if *i == index => Some(*fraction),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_skips_output_from_older_naming_scheme() {
    let fx = Fixture::new("scenario_a");
    fx.touch("Aula (parte 1).mp4");
    fx.touch("Aula 2.mp4");
    fx.touch("Férias.mkv");
    let converted = fx.input.join("converted");
    fs::create_dir_all(&converted).unwrap();
    fs::write(converted.join("Aula_parte_1_vertical.mp4"), b"done").unwrap();

    let (report, events) = run_collecting(
        BatchRunner::new(fx.options()),
        BatchRequest::directory(&fx.input),
    )
    .await;

    assert!(events.contains(&BatchEvent::Planned { jobs: 2, skipped: 1 }));
    assert_eq!(report.state, BatchState::Completed);
    assert_eq!(report.jobs.len(), 2);
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.skipped[0].input_path, fx.input.join("Aula (parte 1).mp4"));
    assert!(converted.join("Aula_2_vertical.mp4").exists());
    assert!(converted.join("Ferias_vertical.mkv").exists());
}

#[tokio::test]
async fn test_rerun_plans_nothing() {
    let fx = Fixture::new("rerun");
    fx.touch("one.mp4");
    fx.touch("two.mp4");

    let first = BatchRunner::new(fx.options())
        .run(BatchRequest::directory(&fx.input))
        .await
        .unwrap();
    assert_eq!(first.summary.succeeded, 2);

    let (second, events) = run_collecting(
        BatchRunner::new(fx.options()),
        BatchRequest::directory(&fx.input),
    )
    .await;
    assert_eq!(second.state, BatchState::Completed);
    assert!(second.jobs.is_empty());
    assert_eq!(second.summary.skipped, 2);
    assert!(events.contains(&BatchEvent::Log("nothing to do".into())));
    assert!(!events.iter().any(|e| matches!(e, BatchEvent::JobStarted { .. })));
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let fx = Fixture::new("monotonic");
    fx.touch("clip.mp4");

    let (report, events) = run_collecting(
        BatchRunner::new(fx.options()),
        BatchRequest::directory(&fx.input),
    )
    .await;

    assert_eq!(report.summary.succeeded, 1);
    // 2 s, 5 s, then an out-of-order 3 s that must not rewind, then 10 s of 10.
    assert_eq!(progress_of(&events, 0), vec![0.2, 0.5, 1.0]);
}

#[tokio::test]
async fn test_probe_failure_disables_progress_only() {
    let fx = Fixture::new("scenario_b");
    fx.touch("clip_noprobe.mp4");

    let (report, events) = run_collecting(
        BatchRunner::new(fx.options()),
        BatchRequest::directory(&fx.input),
    )
    .await;

    assert_eq!(report.jobs[0].outcome, ExecutionOutcome::Succeeded);
    assert!(progress_of(&events, 0).is_empty());
    assert!(events
        .iter()
        .any(|e| matches!(e, BatchEvent::Log(line) if line.contains("clip_noprobe.mp4") && line.contains("duration unknown"))));
}

#[tokio::test]
async fn test_failed_job_does_not_stop_batch() {
    let fx = Fixture::new("scenario_c");
    fx.touch("a.mp4");
    fx.touch("b_fail.mp4");
    fx.touch("c.mp4");

    let (report, events) = run_collecting(
        BatchRunner::new(fx.options()),
        BatchRequest::directory(&fx.input),
    )
    .await;

    assert_eq!(report.state, BatchState::Completed);
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.jobs.len(), 3);
    match &report.jobs[1].outcome {
        ExecutionOutcome::Failed { reason } => {
            assert!(reason.contains("exit code 1"));
            assert!(reason.contains("Conversion failed!"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    // The partial output is not left behind to be mistaken for a finished one.
    assert!(!report.jobs[1].output_path.exists());
    assert!(report.jobs[2].output_path.exists());
    assert!(events
        .iter()
        .any(|e| matches!(e, BatchEvent::Log(line) if line.contains("b_fail.mp4") && line.contains("failed"))));

    let started: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::JobStarted { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_cancel_during_job_abandons_the_rest() {
    let fx = Fixture::new("scenario_d");
    fx.touch("a_one.mp4");
    fx.touch("b_slow.mp4");
    fx.touch("c_three.mp4");

    let started = Instant::now();
    let mut handle = BatchRunner::new(fx.options()).start(BatchRequest::directory(&fx.input));
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        if matches!(event, BatchEvent::Progress { index: 1, .. }) {
            handle.cancel();
        }
        events.push(event);
    }
    let report = handle.join().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(15));
    assert_eq!(report.state, BatchState::Cancelled);
    assert_eq!(report.jobs.len(), 2);
    assert_eq!(report.jobs[0].outcome, ExecutionOutcome::Succeeded);
    assert_eq!(report.jobs[1].outcome, ExecutionOutcome::Cancelled);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.cancelled, 1);
    assert!(!events
        .iter()
        .any(|e| matches!(e, BatchEvent::JobStarted { index: 2, .. })));
    assert!(!report.jobs[1].output_path.exists());
    assert!(!fx.input.join("converted").join("c_three_vertical.mp4").exists());
}

#[tokio::test]
async fn test_cancel_before_start_runs_nothing() {
    let fx = Fixture::new("cancel_early");
    fx.touch("a.mp4");

    let runner = BatchRunner::new(fx.options());
    runner.cancel_signal().cancel();
    let report = runner.run(BatchRequest::directory(&fx.input)).await.unwrap();

    assert_eq!(report.state, BatchState::Cancelled);
    assert!(report.jobs.is_empty());
}

#[tokio::test]
async fn test_caption_sidecar_removed_after_every_outcome() {
    let fx = Fixture::new("captions");
    let ok = fx.touch("ok.mp4");
    let bad = fx.touch("bad_fail.mp4");

    let captions = StaticCaptions::new(vec![
        CaptionSegment { start: 0.0, end: 1.0, text: "olá".into() },
        CaptionSegment { start: 3.0, end: 4.0, text: "mundo".into() },
    ]);
    let runner = BatchRunner::new(fx.options().preset(Preset::BurnCaptions)).with_captions(Arc::new(captions));
    let report = runner.run(BatchRequest::directory(&fx.input)).await.unwrap();

    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.failed, 1);
    assert!(fx.input.join("legendados").join("ok_legendado.mp4").exists());
    assert!(!vidbatch::captions::sidecar_path(&ok).exists());
    assert!(!vidbatch::captions::sidecar_path(&bad).exists());
}

#[tokio::test]
async fn test_single_file_request() {
    let fx = Fixture::new("single");
    let clip = fx.touch("clip.mp4");
    fx.touch("other.mp4");
    let out = fx.root.join("elsewhere");

    let report = BatchRunner::new(fx.options())
        .run(BatchRequest::file(&clip).output_dir(&out))
        .await
        .unwrap();

    assert_eq!(report.jobs.len(), 1);
    assert_eq!(report.output_dir, out);
    assert!(out.join("clip_vertical.mp4").exists());
    assert!(!out.join("other_vertical.mp4").exists());
}

#[tokio::test]
async fn test_empty_directory_completes_immediately() {
    let fx = Fixture::new("empty");
    fx.touch("notes.txt");

    let report = BatchRunner::new(fx.options())
        .run(BatchRequest::directory(&fx.input))
        .await
        .unwrap();

    assert_eq!(report.state, BatchState::Completed);
    assert_eq!(report.summary.total(), 0);
    assert!(!fx.input.join("converted").exists());
}

#[tokio::test]
async fn test_unreadable_directory_is_planning_error() {
    let fx = Fixture::new("missing");
    let result = BatchRunner::new(fx.options())
        .run(BatchRequest::directory(fx.root.join("does-not-exist")))
        .await;
    assert!(matches!(result, Err(Error::Planning { .. })));
}

#[tokio::test]
async fn test_report_serializes_to_json() {
    let fx = Fixture::new("json");
    fx.touch("a.mp4");

    let report = BatchRunner::new(fx.options())
        .run(BatchRequest::directory(&fx.input))
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();

    assert_eq!(json["state"], "completed");
    assert_eq!(json["summary"]["succeeded"], 1);
    assert_eq!(json["jobs"][0]["outcome"]["outcome"], "succeeded");
}

/// Caption source that never finishes on its own.
struct StalledCaptions;

#[async_trait]
impl CaptionSource for StalledCaptions {
    async fn segments(&self, _input: &Path) -> vidbatch::Result<Vec<CaptionSegment>> {
        tokio::time::sleep(Duration::from_secs(20)).await;
        Ok(Vec::new())
    }
}

/// Cancel shortly after job 0 starts; returns the report and the time from
/// the cancel request to the end of the batch.
async fn cancel_after_first_start(runner: BatchRunner, request: BatchRequest) -> (BatchReport, Duration) {
    let mut handle = runner.start(request);
    let mut cancelled_at = None;
    while let Some(event) = handle.next_event().await {
        if matches!(event, BatchEvent::JobStarted { index: 0, .. }) {
            tokio::time::sleep(Duration::from_millis(300)).await;
            handle.cancel();
            cancelled_at = Some(Instant::now());
        }
    }
    let report = handle.join().await.unwrap();
    let elapsed = cancelled_at.map(|t| t.elapsed()).unwrap_or_default();
    (report, elapsed)
}

#[tokio::test]
async fn test_cancel_interrupts_hung_duration_lookup() {
    let fx = Fixture::new("hung_lookup");
    fx.touch("a_hang.mp4");
    fx.touch("b.mp4");

    let (report, elapsed) = cancel_after_first_start(
        BatchRunner::new(fx.options()),
        BatchRequest::directory(&fx.input),
    )
    .await;

    assert!(elapsed < Duration::from_secs(5), "cancel took {elapsed:?}");
    assert_eq!(report.state, BatchState::Cancelled);
    assert_eq!(report.jobs.len(), 1);
    assert_eq!(report.jobs[0].outcome, ExecutionOutcome::Cancelled);
    assert!(!fx.input.join("converted").join("b_vertical.mp4").exists());
}

#[tokio::test]
async fn test_cancel_interrupts_caption_source() {
    let fx = Fixture::new("stalled_captions");
    let clip = fx.touch("clip.mp4");

    let runner = BatchRunner::new(fx.options().preset(Preset::BurnCaptions)).with_captions(Arc::new(StalledCaptions));
    let (report, elapsed) = cancel_after_first_start(runner, BatchRequest::directory(&fx.input)).await;

    assert!(elapsed < Duration::from_secs(5), "cancel took {elapsed:?}");
    assert_eq!(report.state, BatchState::Cancelled);
    assert_eq!(report.jobs[0].outcome, ExecutionOutcome::Cancelled);
    assert!(!vidbatch::captions::sidecar_path(&clip).exists());
}

#[tokio::test]
async fn test_argument_failure_is_logged_with_file_name() {
    let fx = Fixture::new("bad_colour");
    fx.touch("clip.mp4");

    // Public field set directly, bypassing the validating setter.
    let mut style = CaptionStyle::default();
    style.colour = "gold".into();
    let captions = StaticCaptions::new(vec![CaptionSegment { start: 0.0, end: 1.0, text: "oi".into() }]);
    let runner = BatchRunner::new(fx.options().preset(Preset::BurnCaptions).caption_style(style))
        .with_captions(Arc::new(captions));
    let (report, events) = run_collecting(runner, BatchRequest::directory(&fx.input)).await;

    assert_eq!(report.summary.failed, 1);
    assert!(matches!(report.jobs[0].outcome, ExecutionOutcome::Failed { .. }));
    assert!(events
        .iter()
        .any(|e| matches!(e, BatchEvent::Log(line) if line.contains("clip.mp4") && line.contains("failed"))));
}

#[tokio::test]
async fn test_clips_plan_one_job_per_chunk() {
    let fx = Fixture::new("clips");
    fx.touch("Aula 1.mp4");
    fx.touch("other_noprobe.mp4");

    let options = fx.options().preset(Preset::clips(4).unwrap());
    let (report, events) = run_collecting(BatchRunner::new(options), BatchRequest::directory(&fx.input)).await;

    let trechos = fx.input.join("trechos");
    // 10 s in 4 s clips, plus the unprobed input copied whole.
    assert!(events.contains(&BatchEvent::Planned { jobs: 4, skipped: 0 }));
    assert_eq!(report.summary.succeeded, 4);
    for name in ["Aula_1_trecho01.mp4", "Aula_1_trecho02.mp4", "Aula_1_trecho03.mp4", "other_noprobe_trecho01.mp4"] {
        assert!(trechos.join(name).exists(), "{name} missing");
    }
    assert!(events
        .iter()
        .any(|e| matches!(e, BatchEvent::Log(line) if line.contains("other_noprobe.mp4") && line.contains("duration unknown"))));
    // The last clip is 2 s long; the engine's 2 s timestamp completes it.
    assert_eq!(progress_of(&events, 2), vec![1.0]);

    let again = BatchRunner::new(fx.options().preset(Preset::clips(4).unwrap()))
        .run(BatchRequest::directory(&fx.input))
        .await
        .unwrap();
    assert!(again.jobs.is_empty());
    assert_eq!(again.summary.skipped, 4);
}
