//! ProFit CLI
//!
//! Loads a workspace store, prepares the parameter partitions and runs the
//! configured minimization sequence. Exit codes keep the established
//! contract of this tool: 0 for help and load-time failures, 1 for a
//! completed run (whatever the fit status), 2 for bad options.

mod report;

use anyhow::Result;
use clap::{ArgAction, CommandFactory, Parser};
use pf_inference::{FitConfig, FitTool};
use pf_model::schema::StoreFile;
use pf_model::workspace::Workspace;
use pf_model::{check_model, prep};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "profit")]
#[command(about = "ProFit - profile-likelihood fit orchestrator")]
#[command(version)]
struct Cli {
    /// Input workspace store (REQUIRED)
    #[arg(short = 'f', long)]
    input_file: Option<PathBuf>,

    /// Save fit results to this file
    #[arg(short = 'o', long)]
    output_file: Option<PathBuf>,

    /// Name of the dataset
    #[arg(short = 'd', long, default_value = "combData")]
    data_name: String,

    /// Name of the workspace
    #[arg(short = 'w', long, default_value = "combWS")]
    ws_name: String,

    /// Name of the model config
    #[arg(short = 'm', long, default_value = "ModelConfig")]
    mc_name: String,

    /// Load snapshot from workspace
    #[arg(short = 's', long)]
    snapshot: Option<String>,

    /// Name of snapshot to save to output workspace
    #[arg(short = 'k', long, default_value = "ucmles")]
    ssname: String,

    /// Specify POIs to be used in fit (comma-separated `name`,
    /// `name=value` or `name=value_low_high` directives)
    #[arg(short = 'p', long)]
    poi: Option<String>,

    /// Specify NPs to be fixed in fit (comma-separated wildcard patterns)
    #[arg(short = 'n', long)]
    fix_np: Option<String>,

    /// Estimate central values with a simplex pass before the fit
    #[arg(long, default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    simplex: bool,

    /// Estimate errors with a covariance pass after fit
    #[arg(long, default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    hesse: bool,

    /// Get asymmetric errors from likelihood profiling
    #[arg(long, default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    minos: bool,

    /// Offset the NLL by its initial value
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    nll_offset: bool,

    /// Number of worker threads for the fit
    #[arg(long, default_value_t = 1)]
    num_cpu: usize,

    /// Minimizer strategy
    #[arg(long, default_value_t = 1)]
    min_strat: i32,

    /// Constant-term optimization level
    #[arg(long, default_value_t = 2)]
    opt_const: i32,

    /// Minimizer print level
    #[arg(long, default_value_t = 2)]
    print_level: i32,

    /// Minimizer tolerance
    #[arg(long, default_value_t = 0.001)]
    min_tolerance: f64,

    /// Save the post-fit workspace to the output file
    #[arg(long, default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    save_ws: bool,

    /// Save errors in the results record
    #[arg(long, default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    save_errors: bool,

    /// Perform sanity checks on the model before the fit
    #[arg(long, default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    check_ws: bool,

    /// Enable the legacy morphing-cache workaround in the minimizer
    #[arg(long, default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    fix_star_cache: bool,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                let _ = e.print();
                std::process::exit(0);
            }
            eprintln!("Invalid options: {e}");
            std::process::exit(2);
        }
    };

    // No input: print usage, succeed.
    let Some(input) = cli.input_file.clone() else {
        let _ = Cli::command().print_help();
        println!();
        std::process::exit(0);
    };

    let level = match cli.print_level {
        i32::MIN..=0 => tracing::Level::ERROR,
        1 => tracing::Level::WARN,
        2 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();

    if cli.num_cpu > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(cli.num_cpu).build_global();
    }

    // Load-time failures are reported but exit as success.
    let mut ws = match load_workspace(&cli, &input) {
        Ok(ws) => ws,
        Err(e) => {
            println!("Error: {e}");
            std::process::exit(0);
        }
    };

    match run_fit(&cli, &mut ws) {
        Ok(()) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn load_workspace(cli: &Cli, input: &Path) -> Result<Workspace> {
    tracing::info!(path = %input.display(), "loading workspace store");
    let store = StoreFile::read(input)?;
    let mut ws = Workspace::from_store(&store, &cli.ws_name)?;

    // Resolve everything the fit needs up front, so missing objects are
    // load failures rather than mid-fit surprises.
    ws.model_config(&cli.mc_name)?;
    ws.dataset(&cli.data_name)?;
    if let Some(snapshot) = &cli.snapshot {
        ws.load_snapshot(snapshot)?;
    }
    tracing::info!(parameters = ws.parameters().len(), "workspace loaded");
    Ok(ws)
}

fn run_fit(cli: &Cli, ws: &mut Workspace) -> Result<()> {
    // Preserve a restorable pre-mutation state.
    ws.save_snapshot("original");

    prep::apply_partition_defaults(ws, &cli.mc_name)?;

    if cli.check_ws {
        println!("Performing sanity checks on model...");
        let valid = check_model(ws, &cli.mc_name, true)?;
        println!("Sanity checks on the model: {}", if valid { "OK" } else { "FAIL" });
    }

    if let Some(fix_np) = &cli.fix_np {
        println!();
        println!("Fixing nuisance parameters :");
        prep::fix_nuisances(ws, &cli.mc_name, fix_np)?;
    }

    println!();
    println!("Preparing parameters of interest :");
    let fit_pois = prep::prepare_pois(ws, &cli.mc_name, cli.poi.as_deref())?;

    let config = FitConfig {
        tolerance: cli.min_tolerance,
        strategy: cli.min_strat,
        opt_const: cli.opt_const,
        print_level: cli.print_level,
        num_cpu: cli.num_cpu,
        nll_offset: cli.nll_offset,
        use_simplex: cli.simplex,
        use_hesse: cli.hesse,
        use_minos: cli.minos,
        fix_star_cache: cli.fix_star_cache,
        ..FitConfig::default()
    };

    println!();
    println!("Starting fit...");
    let timer = Instant::now();
    let status = FitTool::new(config).profile_to_data(ws, &cli.mc_name, &cli.data_name)?;
    let minutes = timer.elapsed().as_secs_f64() / 60.0;

    report::print_summary(ws, &fit_pois, status, minutes);

    if let Some(output) = &cli.output_file {
        write_results(cli, ws, &fit_pois, status, minutes, output)?;
    }
    Ok(())
}

fn write_results(
    cli: &Cli,
    ws: &mut Workspace,
    fit_pois: &[String],
    status: i32,
    minutes: f64,
    output: &Path,
) -> Result<()> {
    let pois = report::poi_estimates(ws, fit_pois, cli.save_errors);
    let mut record = serde_json::json!({
        "pois": pois,
        "status": status,
        "time_real_min": minutes,
    });
    if cli.save_ws {
        ws.save_snapshot(&cli.ssname);
        let store = StoreFile { version: None, workspaces: vec![ws.to_def()] };
        record["workspace"] = serde_json::to_value(&store)?;
    }
    std::fs::write(output, serde_json::to_string_pretty(&record)?)?;
    tracing::info!(path = %output.display(), "results written");
    Ok(())
}
