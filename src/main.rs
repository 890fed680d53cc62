//! LoRaHub build matrix CLI
//!
//! Entry point for the `lorahub-build` command-line tool.

use clap::Parser;
use lorahub_build::config::{EffectiveConfig, MatrixConfig};
use lorahub_build::environment::{recover_from_backup, BuildEnvironment};
use lorahub_build::logging;
use lorahub_build::pipeline::{MatrixOptions, MatrixPipeline};
use lorahub_build::signal::{CancellationCoordinator, SignalHandler};
use lorahub_build::summary::ExitCode;
use lorahub_build::variant::VariantRegistry;
use lorahub_build::Archiver;
use std::path::PathBuf;
use std::process;
use tracing::warn;

#[derive(Parser)]
#[command(name = "lorahub-build")]
#[command(about = "Build LoRaHub firmware for every hardware variant", version)]
struct Cli {
    /// Also copy `<variant>_<file>` outputs here
    output_dir: Option<PathBuf>,

    /// ESP-IDF project directory (default: current directory)
    #[arg(long, short = 'C')]
    project_dir: Option<PathBuf>,

    /// Config file (default: <project>/lorahub-build.toml if present)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Where build_<variant>/ and sdkconfig.<variant> go (default: project directory)
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    /// Build only these variants (comma-separated)
    #[arg(long, value_delimiter = ',')]
    only: Option<Vec<String>>,

    /// Print the plan without touching anything
    #[arg(long)]
    dry_run: bool,

    /// Restore sdkconfig.defaults from sdkconfig.defaults.base and exit
    #[arg(long)]
    recover: bool,

    /// List variants and exit
    #[arg(long)]
    list: bool,

    /// Print the merged configuration with its sources and exit
    #[arg(long)]
    show_config: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_log: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Flags that override the config file
    fn overrides(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(dir) = &self.project_dir {
            map.insert("project_dir".into(), dir.to_string_lossy().into_owned().into());
        }
        if let Some(dir) = &self.archive_dir {
            map.insert("archive_dir".into(), dir.to_string_lossy().into_owned().into());
        }
        if let Some(dir) = &self.output_dir {
            map.insert("export_dir".into(), dir.to_string_lossy().into_owned().into());
        }
        if let Some(only) = &self.only {
            map.insert("only".into(), serde_json::json!(only));
        }
        serde_json::Value::Object(map)
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.json_log, logging::level_for(cli.verbose));

    let project_dir = cli.project_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    let effective = match EffectiveConfig::discover(cli.config.as_deref(), &project_dir, Some(cli.overrides())) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(ExitCode::Config.as_i32());
        }
    };
    let config = match effective.matrix_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(ExitCode::Config.as_i32());
        }
    };

    if cli.show_config {
        match effective.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(ExitCode::Config.as_i32());
            }
        }
        return;
    }

    if cli.recover {
        run_recover(&config);
        return;
    }

    let registry = match config.registry() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(ExitCode::Config.as_i32());
        }
    };

    if cli.list {
        run_list(&registry);
        return;
    }

    run_matrix(&config, registry, cli.dry_run);
}

fn run_recover(config: &MatrixConfig) {
    match recover_from_backup(&config.environment_paths()) {
        Ok(()) => println!("Restored {}", config.environment_paths().active_config.display()),
        Err(e) => {
            eprintln!("Recovery failed: {}", e);
            process::exit(ExitCode::Environment.as_i32());
        }
    }
}

fn run_list(registry: &VariantRegistry) {
    for variant in registry.iter() {
        println!("{}", variant.name);
        for line in variant.fragment.lines().filter(|l| l.starts_with("CONFIG_")) {
            println!("    {}", line);
        }
    }
}

fn run_matrix(config: &MatrixConfig, registry: VariantRegistry, dry_run: bool) {
    let mut toolchain = config.idf_toolchain();
    let environment = BuildEnvironment::new(config.environment_paths());
    let archiver = Archiver::new(config.output_set(), environment.paths().build_state.clone());
    let options = MatrixOptions {
        build_tree: config.build_tree(),
        archive_root: config.archive_root(),
        export_dir: config.export_dir.clone(),
    };
    let pipeline = MatrixPipeline::new(registry, environment, archiver, options);

    if dry_run {
        if let Err(e) = pipeline.check_layout() {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
        print!("{}", pipeline.plan(&toolchain).render());
        return;
    }

    let handler = SignalHandler::new();
    if let Err(e) = handler.install() {
        warn!(error = %e, "cannot install interrupt handler; Ctrl-C will not restore the base configuration");
    }
    let mut pipeline = pipeline.with_cancellation(CancellationCoordinator::new(handler.state()));

    match pipeline.run(&mut toolchain) {
        Ok(report) => {
            println!("{}", report.summary.render());
            for warning in report.summary.warnings() {
                eprintln!("Warning: {}", warning);
            }
            if let Some(path) = &report.manifest_path {
                println!("Export manifest: {} ({} bytes exported)", path.display(), report.exported_bytes);
            }
            if let Some(e) = &report.error {
                eprintln!("Error: {}", e);
            }
            process::exit(report.exit_code());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}
