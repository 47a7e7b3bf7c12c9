//! Strainer Command-Line Interface
//!
//! This CLI provides tools for:
//! - Validating a filter blueprint against the host contract
//! - Importing blueprints into the filters directory
//! - Evaluating a stream of JSON records against a blueprint
//! - Benchmarking a blueprint on generated records

mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::CliConfig;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use strainer_host::{
    BlueprintRuntime, CompiledModule, InputRecord, LatencyStats,
    LatencySummary, ModuleInstance,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "strainer")]
#[command(author, version, about = "Sandboxed filter blueprint host", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Disable fuel metering
    #[arg(long, global = true)]
    unmetered: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a blueprint complies with the host contract
    Check {
        /// Blueprint file (.wasm or .wat) or name of an imported blueprint
        module: PathBuf,

        /// Also create an instance, reserving its arena
        #[arg(long)]
        instantiate: bool,
    },

    /// Validate a blueprint and copy it into the filters directory
    Import {
        /// Blueprint file to import
        file: PathBuf,

        /// Name of the imported blueprint (defaults to the file stem)
        #[arg(short, long)]
        name: Option<String>,

        /// Overwrite an existing blueprint with the same name
        #[arg(long)]
        force: bool,
    },

    /// Evaluate JSON-lines records against a blueprint
    Eval {
        /// Blueprint file or name of an imported blueprint
        module: PathBuf,

        #[command(flatten)]
        params: ParamsArgs,

        /// Records as JSON lines (or - for stdin)
        #[arg(short, long, default_value = "-")]
        records: PathBuf,

        /// Stop at the first record that cannot be evaluated
        #[arg(long)]
        fail_fast: bool,
    },

    /// Measure evaluation latency on generated records
    Bench {
        /// Blueprint file or name of an imported blueprint
        module: PathBuf,

        #[command(flatten)]
        params: ParamsArgs,

        /// Number of evaluations
        #[arg(short = 'n', long, default_value = "10000")]
        iterations: usize,

        /// Topics to draw records from
        #[arg(long, value_delimiter = ',', default_value = "orders,payments")]
        topics: Vec<String>,

        /// Size of each generated record value in bytes
        #[arg(long, default_value = "256")]
        value_size: usize,

        /// Seed for the record generator
        #[arg(long)]
        seed: Option<u64>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Filter parameters, passed to the blueprint verbatim.
#[derive(Args, Debug, Clone, Default)]
#[group(required = true, multiple = false)]
struct ParamsArgs {
    /// Parameters as hex bytes (e.g. "016f7264657273")
    #[arg(long)]
    params_hex: Option<String>,

    /// Read parameters from a file
    #[arg(long)]
    params_file: Option<PathBuf>,

    /// Parameters as UTF-8 text
    #[arg(long)]
    params_text: Option<String>,
}

impl ParamsArgs {
    fn bytes(&self) -> Result<Vec<u8>> {
        if let Some(hex) = &self.params_hex {
            return parse_hex(hex);
        }
        if let Some(path) = &self.params_file {
            return fs::read(path)
                .with_context(|| format!("Failed to read parameters from {}", path.display()));
        }
        Ok(self.params_text.clone().unwrap_or_default().into_bytes())
    }
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let hex = input.trim().replace([' ', '_'], "");
    let hex = hex.strip_prefix("0x").unwrap_or(&hex);
    if hex.len() % 2 != 0 {
        anyhow::bail!("Invalid hex length: {} chars (expected an even number)", hex.len());
    }

    hex.as_bytes()
        .chunks(2)
        .map(|chunk| {
            let s = std::str::from_utf8(chunk).context("Invalid hex character")?;
            u8::from_str_radix(s, 16).with_context(|| format!("Invalid hex value: {}", s))
        })
        .collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if cli.unmetered {
        config.engine = config.engine.unmetered();
    }

    match cli.command {
        Commands::Check { module, instantiate } => cmd_check(&config, &module, instantiate),

        Commands::Import { file, name, force } => cmd_import(&config, &file, name, force),

        Commands::Eval {
            module,
            params,
            records,
            fail_fast,
        } => cmd_eval(&config, &module, &params.bytes()?, &records, fail_fast),

        Commands::Bench {
            module,
            params,
            iterations,
            topics,
            value_size,
            seed,
            json,
        } => cmd_bench(
            &config,
            &module,
            &params.bytes()?,
            BenchOptions {
                iterations,
                topics,
                value_size,
                seed,
                json,
            },
        ),
    }
}

fn load_module(config: &CliConfig, module: &Path) -> Result<CompiledModule> {
    let path = config.resolve_module(module)?;
    let runtime = BlueprintRuntime::new(config.engine.clone()).context("Failed to create runtime")?;
    runtime
        .load_file(&path)
        .with_context(|| format!("Failed to load blueprint {}", path.display()))
}

fn configured_instance(module: &CompiledModule, params: &[u8]) -> Result<ModuleInstance> {
    let mut instance = module
        .instantiate()
        .with_context(|| format!("Failed to instantiate '{}'", module.name()))?;
    instance
        .configure(params)
        .with_context(|| format!("'{}' rejected the parameters", module.name()))?;
    Ok(instance)
}

fn cmd_check(config: &CliConfig, module: &Path, instantiate: bool) -> Result<()> {
    let module = load_module(config, module)?;

    println!("Blueprint:  {}", module.name());
    println!(
        "Memory:     {} page(s) minimum{}",
        module.min_memory_pages(),
        module
            .max_memory_pages()
            .map(|max| format!(", {} maximum", max))
            .unwrap_or_default()
    );
    println!("Exports:");
    for export in module.exports() {
        println!("  {}", export);
    }
    println!("Imports:");
    for import in module.imports() {
        println!("  {}", import);
    }

    if instantiate {
        let instance = module
            .instantiate()
            .with_context(|| format!("Failed to instantiate '{}'", module.name()))?;
        println!(
            "Instance:   {} bytes of linear memory (arena included)",
            instance.memory_size().unwrap_or(0)
        );
    }

    println!("\n'{}' complies with the blueprint contract", module.name());
    Ok(())
}

fn cmd_import(config: &CliConfig, file: &Path, name: Option<String>, force: bool) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => file
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .context("Cannot derive a blueprint name from the file name; use --name")?,
    };

    let dir = config.filters_dir();
    let destination = dir.join(format!("{}.wasm", name));
    if destination.exists() && !force {
        anyhow::bail!(
            "Blueprint '{}' already exists. Delete it first or use --force.",
            destination.display()
        );
    }

    let runtime = BlueprintRuntime::new(config.engine.clone()).context("Failed to create runtime")?;
    let module = runtime
        .load_file(file)
        .with_context(|| format!("Failed to load blueprint {}", file.display()))?;
    runtime
        .instantiate(&module)
        .with_context(|| format!("Failed to instantiate '{}'", module.name()))?;

    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    fs::copy(file, &destination)
        .with_context(|| format!("Failed to copy blueprint to {}", destination.display()))?;

    info!("Imported '{}' into {}", name, destination.display());
    println!("{}", destination.display());
    Ok(())
}

/// One line of `eval` output.
#[derive(Debug, Serialize)]
struct EvalOutput {
    line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    partition: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    matched: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn stop_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;
    Ok(running)
}

fn cmd_eval(
    config: &CliConfig,
    module: &Path,
    params: &[u8],
    records: &Path,
    fail_fast: bool,
) -> Result<()> {
    let module = load_module(config, module)?;
    let mut instance = configured_instance(&module, params)?;

    let input: Box<dyn BufRead> = if records.as_os_str() == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(records)
            .with_context(|| format!("Failed to open records file {}", records.display()))?;
        Box::new(BufReader::new(file))
    };
    let mut out = BufWriter::new(io::stdout().lock());
    let running = stop_flag()?;

    let (mut evaluated, mut matched, mut failed) = (0usize, 0usize, 0usize);
    for (index, line) in input.lines().enumerate() {
        if !running.load(Ordering::SeqCst) {
            warn!("Interrupted after {} record(s)", evaluated + failed);
            break;
        }
        let line = line.context("Failed to read records")?;
        if line.trim().is_empty() {
            continue;
        }

        let output = match serde_json::from_str::<InputRecord>(&line) {
            Err(e) => EvalOutput {
                line: index + 1,
                partition: None,
                offset: None,
                matched: None,
                error: Some(format!("invalid record: {}", e)),
            },
            Ok(record) => {
                let result = instance.evaluate(&record);
                if let Err(e) = &result {
                    if e.is_terminal() {
                        warn!("'{}' faulted, replacing the instance: {}", module.name(), e);
                        instance = configured_instance(&module, params)?;
                    }
                }
                EvalOutput {
                    line: index + 1,
                    partition: Some(record.partition),
                    offset: Some(record.offset),
                    matched: result.as_ref().ok().map(|v| v.is_match()),
                    error: result.err().map(|e| e.to_string()),
                }
            }
        };

        match output.matched {
            Some(true) => matched += 1,
            Some(false) => {}
            None => failed += 1,
        }
        evaluated += output.matched.is_some() as usize;

        serde_json::to_writer(&mut out, &output)?;
        writeln!(out)?;
        out.flush()?;

        if fail_fast && output.error.is_some() {
            anyhow::bail!(
                "line {}: {}",
                output.line,
                output.error.unwrap_or_default()
            );
        }
    }

    info!(
        "{} record(s) evaluated, {} matched, {} failed",
        evaluated, matched, failed
    );
    Ok(())
}

struct BenchOptions {
    iterations: usize,
    topics: Vec<String>,
    value_size: usize,
    seed: Option<u64>,
    json: bool,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    blueprint: String,
    iterations: usize,
    matched: usize,
    faults: usize,
    end_to_end: LatencySummary,
    in_module: LatencySummary,
    avg_fuel: Option<u64>,
}

fn random_record(
    rng: &mut StdRng,
    topics: &[String],
    value_size: usize,
    offset: i64,
) -> InputRecord {
    let topic = topics.choose(rng).cloned().unwrap_or_default();
    let value: String = (0..value_size)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect();
    InputRecord::new(topic)
        .key(format!("key-{}", rng.gen::<u32>()))
        .value(value)
        .timestamp_millis(1_700_000_000_000 + offset)
        .at(rng.gen_range(0..12), offset)
}

fn cmd_bench(config: &CliConfig, module: &Path, params: &[u8], opts: BenchOptions) -> Result<()> {
    let module = load_module(config, module)?;
    let mut instance = configured_instance(&module, params)?;
    let running = stop_flag()?;

    let mut rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let records: Vec<InputRecord> = (0..opts.iterations.min(1024))
        .map(|i| random_record(&mut rng, &opts.topics, opts.value_size, i as i64))
        .collect();
    if records.is_empty() {
        anyhow::bail!("Nothing to benchmark: --iterations must be positive");
    }

    let mut end_to_end = LatencyStats::new();
    let mut in_module = LatencyStats::new();
    let (mut matched, mut faults) = (0usize, 0usize);
    let mut fuel = 0u64;

    for i in 0..opts.iterations {
        if !running.load(Ordering::SeqCst) {
            warn!("Interrupted after {} iteration(s)", i);
            break;
        }

        let start = Instant::now();
        let result = instance.evaluate(&records[i % records.len()]);
        end_to_end.record(start.elapsed().as_micros() as u64);
        if let Some(call) = instance.last_call() {
            in_module.record(call.execution_time_us);
            fuel += call.fuel_consumed.unwrap_or(0);
        }

        match result {
            Ok(verdict) => matched += verdict.is_match() as usize,
            Err(e) if e.is_terminal() => {
                faults += 1;
                warn!("{}", e);
                instance = configured_instance(&module, params)?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let report = BenchReport {
        blueprint: module.name().to_string(),
        iterations: end_to_end.count(),
        matched,
        faults,
        end_to_end: end_to_end.summarize(),
        in_module: in_module.summarize(),
        avg_fuel: config
            .engine
            .fuel_per_call
            .map(|_| fuel / in_module.count().max(1) as u64),
    };

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Blueprint Benchmark");
        println!("===================");
        println!("Blueprint:    {}", report.blueprint);
        println!("Iterations:   {}", report.iterations);
        println!("Matched:      {}", report.matched);
        println!("Faults:       {}", report.faults);
        println!("End to end:   {}", end_to_end.summary());
        println!("In module:    {}", in_module.summary());
        if let Some(avg) = report.avg_fuel {
            println!("Avg fuel:     {}", avg);
        }
    }
    Ok(())
}
