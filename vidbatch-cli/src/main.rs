use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use vidbatch::{
    BatchEvent, BatchOptions, BatchReport, BatchRequest, BatchRunner, BatchState, CaptionSource, CaptionStyle,
    NamingScheme, Preset, StaticCaptions,
};

#[derive(Parser)]
#[command(name = "vidbatch", about = "Batch-convert every video in a directory with ffmpeg")]
struct Cli {
    /// Input directory, or a single media file.
    #[arg(required_unless_present = "list_schemes")]
    input: Option<PathBuf>,

    /// Transformation to apply.
    #[arg(short, long, default_value = "vertical-blur")]
    preset: PresetArg,

    /// Output directory (default: a preset-specific subdirectory of the input).
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Name of the output subdirectory created under the input directory.
    #[arg(long, conflicts_with = "output_dir")]
    output_dir_name: Option<String>,

    /// Target width in pixels.
    #[arg(long, default_value = "1080")]
    width: u32,

    /// Target height in pixels.
    #[arg(long, default_value = "1920")]
    height: u32,

    /// x264 speed preset.
    #[arg(long, default_value = "fast")]
    speed: String,

    /// Constant rate factor (0-51, lower is better).
    #[arg(long, default_value = "23")]
    crf: u8,

    /// Longest clip for the clips preset, in minutes or mm:ss.
    #[arg(long, default_value = "3")]
    clip_length: String,

    /// File extensions to pick up (comma separated).
    #[arg(long, value_delimiter = ',')]
    extensions: Option<Vec<String>>,

    /// Process files in name order instead of directory order.
    #[arg(long)]
    sort: bool,

    /// Caption font.
    #[arg(long, default_value = "Arial")]
    font: String,

    /// Caption font size.
    #[arg(long, default_value = "8")]
    font_size: u32,

    /// Caption colour as #RRGGBB.
    #[arg(long, default_value = "#DAA520")]
    colour: String,

    /// Caption vertical position, 0 (top) to 100 (bottom).
    #[arg(long, default_value = "20")]
    position: u8,

    /// Shrink gaps between captions by this factor.
    #[arg(long, default_value = "0.2")]
    spacing: f64,

    /// Keep original caption timings.
    #[arg(long, conflicts_with = "spacing")]
    no_spacing: bool,

    /// JSON file with caption segments ([{"start", "end", "text"}]).
    #[arg(long)]
    captions_json: Option<PathBuf>,

    /// Whisper model for generated captions (or a path to a .bin file).
    #[cfg(feature = "whisper")]
    #[arg(short, long, default_value = "small")]
    model: String,

    /// Caption language code, or "auto".
    #[cfg(feature = "whisper")]
    #[arg(short, long, default_value = "auto")]
    language: String,

    /// Disable GPU acceleration for whisper.
    #[cfg(feature = "whisper")]
    #[arg(long)]
    no_gpu: bool,

    /// Model cache directory.
    #[cfg(feature = "whisper")]
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// ffmpeg executable.
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// ffprobe executable.
    #[arg(long, default_value = "ffprobe")]
    ffprobe: PathBuf,

    /// Seconds a stopped ffmpeg gets to exit before it is killed.
    #[arg(long, default_value = "5")]
    kill_grace: u64,

    /// Print the batch report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Only list each file's duration.
    #[arg(long)]
    check_durations: bool,

    /// With --check-durations, flag files longer than this many seconds.
    #[arg(long, requires = "check_durations")]
    max_duration: Option<f64>,

    /// List naming schemes and exit.
    #[arg(long)]
    list_schemes: bool,

    /// Debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum PresetArg {
    VerticalBlur,
    CropScale,
    BurnCaptions,
    Clips,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let directive = if cli.verbose { "vidbatch=debug" } else { "vidbatch=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(directive.parse().unwrap_or_else(|e| fail(e))),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.list_schemes {
        println!("{:<12} {:<8} {}", "SCHEME", "VERSION", "EXAMPLE");
        println!("{:<12} {:<8} {}", "------", "-------", "-------");
        let sample = "Ação Única (parte 1)";
        for scheme in NamingScheme::registry() {
            println!("{:<12} {:<8} {}", scheme.name, scheme.version, scheme.canonicalize(sample));
        }
        return;
    }

    let Some(input) = cli.input.clone() else {
        fail("no input given");
    };

    let options = build_options(&cli).unwrap_or_else(|e| fail(e));

    if cli.check_durations {
        check_durations(&cli, &input, &options).await;
        return;
    }

    let needs_captions = options.preset.needs_captions();
    let mut runner = BatchRunner::new(options);
    if needs_captions {
        runner = runner.with_captions(caption_source(&cli).unwrap_or_else(|e| fail(e)));
    }

    let mut request = if input.is_file() {
        BatchRequest::file(&input)
    } else {
        BatchRequest::directory(&input)
    };
    if let Some(dir) = &cli.output_dir {
        request = request.output_dir(dir);
    }

    let report = run(runner, request).await.unwrap_or_else(|e| fail(e));

    if cli.json {
        match report.to_json_pretty() {
            Ok(json) => println!("{json}"),
            Err(e) => fail(e),
        }
    }

    eprintln!("{}", report.summary);
    let code = match report.state {
        BatchState::Cancelled => 130,
        _ if report.summary.failed > 0 => 2,
        _ => 0,
    };
    std::process::exit(code);
}

fn preset(cli: &Cli) -> vidbatch::Result<Preset> {
    Ok(match cli.preset {
        PresetArg::VerticalBlur => Preset::VerticalBlur,
        PresetArg::CropScale => Preset::CropScale,
        PresetArg::BurnCaptions => Preset::BurnCaptions,
        PresetArg::Clips => Preset::clips(vidbatch::config::parse_clip_length(&cli.clip_length)?)?,
    })
}

fn build_options(cli: &Cli) -> vidbatch::Result<BatchOptions> {
    let style = CaptionStyle::new()
        .font(&cli.font)
        .size(cli.font_size)?
        .colour(&cli.colour)?
        .position_pct(cli.position)?
        .spacing((!cli.no_spacing).then_some(cli.spacing))?;

    let mut options = BatchOptions::new()
        .preset(preset(cli)?)
        .resolution(cli.width, cli.height)?
        .speed(&cli.speed)?
        .crf(cli.crf)?
        .caption_style(style)
        .ffmpeg(&cli.ffmpeg)
        .ffprobe(&cli.ffprobe)
        .kill_grace(Duration::from_secs(cli.kill_grace))
        .sort_by_name(cli.sort);

    if let Some(exts) = &cli.extensions {
        options = options.extensions(exts)?;
    }
    if let Some(name) = &cli.output_dir_name {
        options = options.output_dir_name(name)?;
    }
    Ok(options)
}

fn caption_source(cli: &Cli) -> vidbatch::Result<Arc<dyn CaptionSource>> {
    if let Some(path) = &cli.captions_json {
        let json = std::fs::read_to_string(path)?;
        return Ok(Arc::new(StaticCaptions::from_json(&json)?));
    }

    #[cfg(feature = "whisper")]
    {
        let model = match vidbatch::Model::parse_name(&cli.model) {
            Some(m) => m,
            None => {
                let path = PathBuf::from(&cli.model);
                if !path.exists() {
                    return Err(vidbatch::Error::InvalidOption(format!(
                        "unknown model \"{}\" (tiny, base, small, medium, large, or a .bin path)",
                        cli.model
                    )));
                }
                vidbatch::Model::Custom(path)
            }
        };
        let mut whisper = vidbatch::WhisperOptions::new()
            .model(model)
            .language(&cli.language)?
            .gpu(!cli.no_gpu);
        if let Some(dir) = &cli.cache_dir {
            whisper = whisper.cache_dir(dir.clone());
        }
        Ok(Arc::new(vidbatch::WhisperCaptions::new(whisper).ffmpeg(&cli.ffmpeg)))
    }

    #[cfg(not(feature = "whisper"))]
    {
        Err(vidbatch::Error::InvalidOption(
            "burn-captions needs --captions-json (or a build with the whisper feature)".into(),
        ))
    }
}

async fn run(runner: BatchRunner, request: BatchRequest) -> vidbatch::Result<BatchReport> {
    let cancel = runner.cancel_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping after the current file is terminated...");
            cancel.cancel();
        }
    });

    let pb = ProgressBar::new(1000);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg}\n[{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut handle = runner.start(request);
    while let Some(event) = handle.next_event().await {
        match event {
            BatchEvent::Log(line) => pb.println(line),
            BatchEvent::JobStarted { index, input, total } => {
                pb.reset();
                pb.set_message(format!(
                    "[{}/{total}] {}",
                    index + 1,
                    input.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default()
                ));
            }
            BatchEvent::Progress { fraction, .. } => pb.set_position((fraction * 1000.0) as u64),
            BatchEvent::JobDone { outcome, .. } if outcome.is_success() => pb.set_position(1000),
            BatchEvent::Finished(_) => pb.finish_and_clear(),
            _ => {}
        }
    }
    handle.join().await
}

async fn check_durations(cli: &Cli, input: &std::path::Path, options: &BatchOptions) {
    let entries = vidbatch::probe::probe_durations(&options.ffprobe, input, &options.extensions, cli.max_duration)
        .await
        .unwrap_or_else(|e| fail(e));

    if cli.json {
        match serde_json::to_string_pretty(&entries) {
            Ok(json) => println!("{json}"),
            Err(e) => fail(e),
        }
    } else {
        for entry in &entries {
            let name = entry
                .path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            match entry.seconds {
                Some(s) => {
                    let flag = if entry.over_limit { "  TOO LONG" } else { "" };
                    println!("{:>10}  {name}{flag}", vidbatch::probe::format_duration(s));
                }
                None => println!("{:>10}  {name}", "unknown"),
            }
        }
    }

    let over = entries.iter().filter(|e| e.over_limit).count();
    if over > 0 {
        eprintln!("{over} of {} files exceed the limit", entries.len());
        std::process::exit(2);
    }
}
