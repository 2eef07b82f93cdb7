/*!
Verisight command line: score image files for AI generation and tampering
*/

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Arg, ArgAction, Command, crate_version, value_parser};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use verisight::engine::batch::analyze_files;
use verisight::engine::config::{OutputConfig, OutputPlugin, TerminalFormat};
use verisight::engine::output_plugins::OutputManager;
use verisight::{AnalysisOptions, EngineConfig, RiskEngine};

fn cli() -> Command {
    Command::new("verisight")
        .version(crate_version!())
        .about("Scores images for signs of AI generation and manipulation")
        .arg(
            Arg::new("images")
                .help("Image files to analyze")
                .value_name("IMAGE")
                .num_args(1..)
                .value_parser(value_parser!(PathBuf))
                .required_unless_present("print-config"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Config file (defaults to the user config directory)")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("detailed")
                .short('d')
                .long("detailed")
                .help("Include every finding, not just confident ones")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-metadata")
                .long("no-metadata")
                .help("Leave metadata findings out of the report")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("timeout-ms")
                .short('t')
                .long("timeout-ms")
                .help("Per-detector deadline in milliseconds")
                .value_name("MS")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("store")
                .short('s')
                .long("store")
                .help("SQLite file used to persist reports between runs")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .help("Terminal output format")
                .value_name("FORMAT")
                .value_parser(["plain", "colored", "json"]),
        )
        .arg(
            Arg::new("jobs")
                .short('j')
                .long("jobs")
                .help("Files analyzed at once")
                .value_name("N")
                .value_parser(value_parser!(usize))
                .default_value("4"),
        )
        .arg(
            Arg::new("print-config")
                .long("print-config")
                .help("Print the effective configuration and exit")
                .action(ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();

    let mut config = EngineConfig::load_or_default(matches.get_one::<PathBuf>("config").map(PathBuf::as_path)).await?;
    if let Some(timeout_ms) = matches.get_one::<u64>("timeout-ms") {
        config.detection.timeout_ms = *timeout_ms;
    }
    if let Some(store) = matches.get_one::<PathBuf>("store") {
        config.cache.store_path = Some(store.clone());
    }
    apply_format(&mut config, matches.get_one::<String>("format").map(String::as_str));

    if matches.get_flag("print-config") {
        print!("{}", config.to_toml()?);
        return Ok(ExitCode::SUCCESS);
    }

    let paths: Vec<PathBuf> = matches
        .get_many::<PathBuf>("images")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let jobs = matches.get_one::<usize>("jobs").copied().unwrap_or(4);
    let options = AnalysisOptions {
        detailed_report: matches.get_flag("detailed"),
        metadata_analysis: !matches.get_flag("no-metadata"),
    };

    let engine = RiskEngine::new(&config).await?;
    let maintenance = engine.spawn_maintenance();

    let mut outputs = OutputManager::new(&config.outputs);
    outputs.initialize().await?;

    let writes_to_terminal = config
        .outputs
        .iter()
        .any(|output| output.enabled && matches!(output.plugin, OutputPlugin::Terminal { .. }));
    let progress = if paths.len() > 1 && !writes_to_terminal {
        let bar = ProgressBar::new(paths.len() as u64);
        bar.set_style(ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}",
        )?);
        Some(bar)
    } else {
        None
    };

    info!("🚀 Analyzing {} images", paths.len());
    let total = paths.len();
    let mut failures = 0usize;
    let mut results = Box::pin(analyze_files(&engine, paths, jobs));
    while let Some(analysis) = results.next().await {
        let source = analysis.path.display().to_string();
        match analysis.outcome {
            Ok(report) => {
                let view = engine.view(&report, &options);
                outputs.handle_report(&source, &view).await;
            }
            Err(e) => {
                failures += 1;
                error!("❌ {}", e);
            }
        }
        if let Some(bar) = &progress {
            bar.set_message(source);
            bar.inc(1);
        }
    }
    drop(results);

    if let Some(bar) = progress {
        bar.finish_and_clear();
    }
    outputs.finalize().await?;
    maintenance.abort();
    engine.shutdown().await?;

    if failures > 0 {
        error!("{} of {} images could not be analyzed", failures, total);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Point terminal outputs at the requested format, adding one if the config
/// has no outputs at all.
fn apply_format(config: &mut EngineConfig, format: Option<&str>) {
    let format = format.map(|f| match f {
        "colored" => TerminalFormat::Colored,
        "json" => TerminalFormat::Json,
        _ => TerminalFormat::Plain,
    });

    if config.outputs.is_empty() {
        config.outputs.push(OutputConfig {
            plugin: OutputPlugin::Terminal {
                format: format.unwrap_or(TerminalFormat::Plain),
            },
            enabled: true,
        });
        return;
    }

    if let Some(format) = format {
        for output in &mut config.outputs {
            if let OutputPlugin::Terminal { format: current } = &mut output.plugin {
                *current = format;
            }
        }
    }
}
