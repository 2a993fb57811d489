//! `georef` command line tool: fit, assess, split and resample from a JSON
//! config.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use georef::core::{
    AccuracyReport, GeoTransform, GeorefConfig, GeorefReport, LinearKind, LinearModel,
    ModelKind, OutputInfo, PointTable, RegionOutcome, RegionSummary, ResampleJob,
    ResampleOutcome, ResampleTask, Session, SessionBundle,
};
use georef::raster;
use log::{info, warn, LevelFilter};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "georef")]
#[command(about = "Fit GCP transforms and resample images onto a map grid")]
#[command(version)]
struct Cli {
    /// Log level: off, error, warn, info, debug or trace.
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    /// JSON log lines (only with the `tracing` feature).
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the configured model on the GCPs and report ICP accuracy.
    Fit {
        /// Path to the JSON config.
        #[arg(long)]
        config: PathBuf,

        /// Override the polynomial degree from the config.
        #[arg(long)]
        degree: Option<u32>,
    },
    /// Fit one polynomial per region cut out by the config's split lines.
    Split {
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        degree: Option<u32>,
    },
    /// Fit (or restore) a model and resample the image onto a map grid.
    Resample {
        #[arg(long)]
        config: PathBuf,

        /// Output image; the format follows the extension.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Override the grid step (map units per output pixel).
        #[arg(long)]
        step: Option<f64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.json_logs);

    let res = match &cli.command {
        Commands::Fit { config, degree } => run_fit(config, *degree),
        Commands::Split { config, degree } => run_split(config, *degree),
        Commands::Resample { config, out, step } => run_resample(config, out.as_deref(), *step),
    };
    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "tracing")]
fn init_logging(level: LevelFilter, json: bool) {
    let _ = tracing_log::LogTracer::init_with_filter(level);
    georef::core::init_tracing(json);
}

#[cfg(not(feature = "tracing"))]
fn init_logging(level: LevelFilter, json: bool) {
    let _ = georef::core::init_with_level(level);
    if json {
        warn!("--json-logs needs the `tracing` feature; using plain logs");
    }
}

/// Relative paths in a config are taken relative to the config file.
fn resolve(config_path: &Path, p: impl AsRef<Path>) -> PathBuf {
    let p = p.as_ref();
    if p.is_absolute() {
        return p.to_path_buf();
    }
    config_path
        .parent()
        .map(|dir| dir.join(p))
        .unwrap_or_else(|| p.to_path_buf())
}

struct Loaded {
    cfg: GeorefConfig,
    session: Session,
    report: GeorefReport,
}

fn load(config_path: &Path, degree: Option<u32>) -> CliResult<Loaded> {
    let cfg = GeorefConfig::load_json(config_path)
        .map_err(|e| format!("reading config {}: {e}", config_path.display()))?;
    let points_path = resolve(config_path, &cfg.points_path);
    let table = PointTable::load(&points_path)
        .map_err(|e| format!("reading points {}: {e}", points_path.display()))?;
    let session = Session::from_table(&table);
    info!(
        "loaded {} GCPs and {} ICPs from {}",
        session.gcps().len(),
        session.icps().len(),
        points_path.display()
    );
    let report = GeorefReport {
        config_path: config_path.to_string_lossy().into_owned(),
        model: cfg.model,
        degree: degree.unwrap_or(cfg.degree),
        gcp_count: session.gcps().len(),
        icp_count: session.icps().len(),
        ..GeorefReport::default()
    };
    Ok(Loaded {
        cfg,
        session,
        report,
    })
}

fn print_accuracy(label: &str, acc: &AccuracyReport) {
    println!(
        "{label}: backward RMSE X={:.4} Y={:.4} (total {:.4}), forward RMSE x={:.4} y={:.4} px (total {:.4})",
        acc.backward.x,
        acc.backward.y,
        acc.backward.total(),
        acc.forward.x,
        acc.forward.y,
        acc.forward.total()
    );
}

fn write_report(config_path: &Path, cfg: &GeorefConfig, report: &GeorefReport) -> CliResult<()> {
    let path = resolve(config_path, cfg.report_path());
    report.write_json(&path)?;
    info!("wrote report to {}", path.display());
    Ok(())
}

fn run_fit(config_path: &Path, degree: Option<u32>) -> CliResult<()> {
    let Loaded {
        cfg,
        mut session,
        mut report,
    } = load(config_path, degree)?;

    if let Some(kind) = cfg.model.linear() {
        return run_fit_linear(config_path, &cfg, &session, report, kind);
    }

    session.fit(report.degree)?;
    println!(
        "degree {} polynomial on {} GCPs, {} ICPs",
        report.degree, report.gcp_count, report.icp_count
    );

    if session.icps().is_empty() {
        warn!("no ICPs in the point table; skipping accuracy check");
    } else {
        let acc = session.assess()?;
        print_accuracy("polynomial", &acc);
        report.accuracy = Some(acc);

        if let Some(method) = cfg.correction {
            let corrected = session.corrected(method)?;
            let acc = AccuracyReport::compute(&corrected, session.gcps().len(), session.icps())?;
            print_accuracy("corrected", &acc);
            report.corrected_accuracy = Some(acc);
        }
    }

    if let Some(path) = &cfg.session_path {
        let path = resolve(config_path, path);
        if let Some(bundle) = session.bundle() {
            bundle.write_json(&path)?;
            info!("wrote session to {}", path.display());
        }
    }
    write_report(config_path, &cfg, &report)
}

fn run_fit_linear(
    config_path: &Path,
    cfg: &GeorefConfig,
    session: &Session,
    mut report: GeorefReport,
    kind: LinearKind,
) -> CliResult<()> {
    if cfg.correction.is_some() {
        warn!("pointwise correction applies to polynomial models only; ignoring it");
    }
    let model = LinearModel::fit(session.gcps(), kind)?;
    println!(
        "{} model on {} GCPs, {} ICPs",
        cfg.model, report.gcp_count, report.icp_count
    );
    if session.icps().is_empty() {
        warn!("no ICPs in the point table; skipping accuracy check");
    } else {
        let acc = AccuracyReport::compute(&model, session.gcps().len(), session.icps())?;
        print_accuracy(&cfg.model.to_string(), &acc);
        report.accuracy = Some(acc);
    }
    write_report(config_path, cfg, &report)
}

fn run_split(config_path: &Path, degree: Option<u32>) -> CliResult<()> {
    let Loaded {
        cfg,
        session,
        mut report,
    } = load(config_path, degree)?;
    if cfg.split_lines.is_empty() {
        return Err("config has no split_lines".into());
    }
    if cfg.model != ModelKind::Polynomial {
        warn!("split fits one polynomial per region; ignoring model {}", cfg.model);
        report.model = ModelKind::Polynomial;
    }

    let regions = session.split(&cfg.split_lines, report.degree)?;
    for r in &regions {
        match &r.outcome {
            RegionOutcome::Fitted { accuracy, .. } => {
                print_accuracy(&format!("region {}", r.region), accuracy)
            }
            RegionOutcome::InsufficientData => println!(
                "region {}: insufficient data ({} GCPs, {} ICPs)",
                r.region, r.gcp_count, r.icp_count
            ),
            RegionOutcome::Failed(e) => println!("region {}: {e}", r.region),
        }
    }
    report.regions = regions.iter().map(RegionSummary::from).collect();
    write_report(config_path, &cfg, &report)
}

/// Restore the polynomial from `session_path` when the file exists, else fit
/// it, then apply the configured correction.
fn polynomial_transform(
    config_path: &Path,
    cfg: &GeorefConfig,
    session: &mut Session,
    report: &mut GeorefReport,
) -> CliResult<Arc<dyn GeoTransform>> {
    let stored = cfg
        .session_path
        .as_ref()
        .map(|p| resolve(config_path, p))
        .filter(|p| p.is_file());
    match stored {
        Some(path) => {
            session.restore(SessionBundle::load_json(&path)?)?;
            info!("restored model from {}", path.display());
        }
        None => {
            session.fit(cfg.degree)?;
        }
    }
    if let Some(model) = session.model() {
        report.degree = model.degree();
    }

    Ok(match cfg.correction {
        Some(method) => Arc::new(session.corrected(method)?),
        None => session
            .snapshot()
            .map(|m| m as Arc<dyn GeoTransform>)
            .ok_or("no fitted model")?,
    })
}

fn run_resample(config_path: &Path, out: Option<&Path>, step: Option<f64>) -> CliResult<()> {
    let Loaded {
        cfg,
        mut session,
        mut report,
    } = load(config_path, None)?;
    let image_path = cfg
        .image_path
        .as_ref()
        .map(|p| resolve(config_path, p))
        .ok_or("config has no image_path")?;

    let transform: Arc<dyn GeoTransform> = match cfg.model.linear() {
        Some(kind) => {
            if cfg.correction.is_some() {
                warn!("pointwise correction applies to polynomial models only; ignoring it");
            }
            Arc::new(LinearModel::fit(session.gcps(), kind)?)
        }
        None => polynomial_transform(config_path, &cfg, &mut session, &mut report)?,
    };

    let mut params = cfg.resample_params();
    if let Some(step) = step {
        params.step = step;
    }
    let source = raster::load_raster(&image_path)?;
    info!(
        "source {}: {}x{} with {} channel(s)",
        image_path.display(),
        source.width,
        source.height,
        source.channels
    );

    let mut task = ResampleTask::spawn(ResampleJob {
        source,
        transform,
        gcps: session.gcps().to_vec(),
        params: params.clone(),
    });
    for pct in task.progress() {
        info!("resampled {pct:5.1}%");
    }

    match task.result()? {
        ResampleOutcome::Completed(out_img) => {
            let out_path = out
                .map(Path::to_path_buf)
                .or_else(|| cfg.output_path.as_ref().map(|p| resolve(config_path, p)))
                .unwrap_or_else(|| resolve(config_path, "georef_output.png"));
            raster::save_raster(&out_img.image, &out_path)?;
            let world = out_path.with_extension(raster::world_file_extension(&out_path));
            raster::write_world_file(&out_img.grid, &world)?;
            println!(
                "wrote {} ({}x{}, step {}) and {}",
                out_path.display(),
                out_img.image.width,
                out_img.image.height,
                params.step,
                world.display()
            );
            report.output = Some(OutputInfo {
                path: out_path.to_string_lossy().into_owned(),
                width: out_img.image.width,
                height: out_img.image.height,
                origin_x: out_img.grid.origin_x,
                origin_y: out_img.grid.origin_y,
                step: out_img.grid.step,
            });
        }
        ResampleOutcome::Cancelled => {
            warn!("resample cancelled; no output written");
            report.error = Some("cancelled".to_string());
        }
    }
    write_report(config_path, &cfg, &report)
}
