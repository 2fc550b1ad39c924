use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "tally workspace automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tracked-allocator benchmarks once per backend and compare them
    Bench {
        /// Lower sample size and measurement time
        #[arg(long, default_value_t = false)]
        quick: bool,

        /// Skip running; rebuild the report from existing criterion output
        #[arg(long, default_value_t = false)]
        report_only: bool,

        /// Benchmark target to run
        #[arg(long, default_value = "tracked_alloc_benchmark")]
        bench: String,

        /// Where to write the markdown report
        #[arg(long, default_value = "benchmark_results/backends.md")]
        output: PathBuf,
    },
}

/// Backend features, in report column order. The first one is the baseline.
const BACKENDS: &[&str] = &["alloc-system", "alloc-mimalloc", "alloc-snmalloc", "alloc-jemalloc"];

#[derive(Deserialize)]
struct Estimates {
    mean: Estimate,
}

#[derive(Deserialize)]
struct Estimate {
    point_estimate: f64,
}

/// Mean nanoseconds per iteration, by benchmark id then backend.
type Results = BTreeMap<String, BTreeMap<String, f64>>;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Bench {
            quick,
            report_only,
            bench,
            output,
        } => {
            if !report_only {
                run_benchmarks(&bench, quick)?;
            }
            let results = collect_results(Path::new("target/criterion"))?;
            write_report(&results, &output)?;
        }
    }

    Ok(())
}

fn baseline_name(feature: &str) -> &str {
    feature.trim_start_matches("alloc-")
}

fn run_benchmarks(bench: &str, quick: bool) -> Result<()> {
    for feature in BACKENDS {
        println!("\n>>> {bench} with {feature}");
        let start = Instant::now();

        let mut cmd = Command::new("cargo");
        cmd.env("CARGO_INCREMENTAL", "0")
            .args(["bench", "--bench", bench, "--no-default-features", "--features", feature])
            .arg("--")
            .args(["--save-baseline", baseline_name(feature)]);

        if quick {
            cmd.args(["--measurement-time", "0.5", "--sample-size", "10", "--noplot"]);
        }

        let status = cmd
            .status()
            .with_context(|| format!("failed to launch cargo bench for {feature}"))?;

        if status.success() {
            println!("finished {feature} in {:.2?}", start.elapsed());
        } else {
            // A backend that does not build on this host is reported as missing.
            eprintln!("warning: {bench} failed with {feature}");
        }
    }

    Ok(())
}

/// Walks criterion's output tree: `<group>/<function>[/<input>]/<baseline>/estimates.json`.
fn collect_results(root: &Path) -> Result<Results> {
    if !root.exists() {
        bail!("no criterion output at {}", root.display());
    }
    let baselines: Vec<&str> = BACKENDS.iter().map(|f| baseline_name(f)).collect();
    let mut results = Results::new();
    walk(root, root, &baselines, &mut results)?;
    Ok(results)
}

fn walk(root: &Path, dir: &Path, baselines: &[&str], results: &mut Results) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == "report" {
            continue;
        }

        let estimates = path.join("estimates.json");
        if baselines.contains(&name) && estimates.is_file() {
            let id = path
                .parent()
                .and_then(|p| p.strip_prefix(root).ok())
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            let text = fs::read_to_string(&estimates)?;
            let parsed: Estimates = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", estimates.display()))?;
            results
                .entry(id)
                .or_default()
                .insert(name.to_string(), parsed.mean.point_estimate);
        } else {
            walk(root, &path, baselines, results)?;
        }
    }
    Ok(())
}

fn format_ns(ns: f64) -> String {
    if ns >= 1_000_000.0 {
        format!("{:.2} ms", ns / 1_000_000.0)
    } else if ns >= 1_000.0 {
        format!("{:.2} µs", ns / 1_000.0)
    } else {
        format!("{ns:.1} ns")
    }
}

fn write_report(results: &Results, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(output).with_context(|| format!("creating {}", output.display()))?;

    writeln!(file, "# Backend Comparison")?;
    writeln!(file)?;
    write!(file, "| Benchmark |")?;
    for feature in BACKENDS {
        write!(file, " {} | vs {} |", baseline_name(feature), baseline_name(BACKENDS[0]))?;
    }
    writeln!(file)?;
    write!(file, "|---|")?;
    for _ in BACKENDS {
        write!(file, "---|---|")?;
    }
    writeln!(file)?;

    for (id, by_backend) in results {
        write!(file, "| {id} |")?;
        let baseline = by_backend.get(baseline_name(BACKENDS[0])).copied();
        for feature in BACKENDS {
            match by_backend.get(baseline_name(feature)) {
                Some(&ns) => {
                    let speedup = baseline.filter(|_| ns > 0.0).map_or(0.0, |b| b / ns);
                    write!(file, " {} | **{speedup:.2}x** |", format_ns(ns))?;
                }
                None => write!(file, " N/A | - |")?,
            }
        }
        writeln!(file)?;
    }

    println!("report written to {}", output.display());
    Ok(())
}
