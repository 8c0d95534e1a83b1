//! Kuhn poker training binary.
//!
//! Usage:
//!   cargo run --release --bin train_kuhn -- [OPTIONS]
//!
//! Options:
//!   --iterations <N>     Training iterations (default: 1,000,000)
//!   --threads <N>        Worker threads (default: auto)
//!   --seed <N>           Random seed for the deal sampler (optional)
//!   --weights <FILE>     Binary weights file to resume from and save to
//!   --track-visits       Persist per-node visit counters alongside weights
//!   --output <FILE>      JSON strategy output (default: kuhn_strategy.json)

use std::collections::BTreeMap;
use std::env;
use std::fs::File;
use std::io::Write;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use cfr_engine::cfr::{EngineConfig, ExecutionLoader, FileLoader, MultiThreadExecutor};
use cfr_engine::games::kuhn::KuhnGame;

/// One information set's average strategy in the JSON export.
#[derive(Debug, Serialize)]
struct StrategyEntry {
    /// Probability of pass (check/fold).
    pass: f64,
    /// Probability of bet (bet/call).
    bet: f64,
}

/// Complete training output.
#[derive(Debug, Serialize)]
struct TrainingOutput {
    iterations: u64,
    mean_utility: Vec<f64>,
    strategies: BTreeMap<String, StrategyEntry>,
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut iterations: u64 = 1_000_000;
    let mut threads: usize = 0;
    let mut seed: Option<u64> = None;
    let mut weights_file: Option<String> = None;
    let mut track_visits = false;
    let mut output_file = "kuhn_strategy.json".to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--iterations" | "-i" => {
                i += 1;
                if i < args.len() {
                    iterations = args[i].parse().unwrap_or(iterations);
                }
            }
            "--threads" | "-t" => {
                i += 1;
                if i < args.len() {
                    threads = args[i].parse().unwrap_or(0);
                }
            }
            "--seed" | "-s" => {
                i += 1;
                if i < args.len() {
                    seed = args[i].parse().ok();
                }
            }
            "--weights" | "-w" => {
                i += 1;
                if i < args.len() {
                    weights_file = Some(args[i].clone());
                }
            }
            "--track-visits" => {
                track_visits = true;
            }
            "--output" | "-o" => {
                i += 1;
                if i < args.len() {
                    output_file = args[i].clone();
                }
            }
            "--help" | "-h" => {
                print_help();
                return;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                return;
            }
        }
        i += 1;
    }

    println!("=================================================");
    println!("  Kuhn Poker CS-CFR Trainer");
    println!("=================================================");
    println!("  Iterations: {}", iterations);
    println!(
        "  Threads:    {}",
        if threads == 0 {
            "auto".to_string()
        } else {
            threads.to_string()
        }
    );
    println!();

    let game = KuhnGame::new(seed);
    let config = EngineConfig::default().with_visit_tracking(track_visits);
    let loader = weights_file
        .as_ref()
        .map(|path| Box::new(FileLoader::new(path, 2, track_visits)) as Box<dyn ExecutionLoader>);

    let mut executor = match MultiThreadExecutor::new(game, config, threads, loader) {
        Ok(executor) => executor,
        Err(error) => {
            eprintln!("Failed to build executor: {}", error);
            std::process::exit(1);
        }
    };

    let progress = ProgressBar::new(iterations);
    progress.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({per_sec})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let start = Instant::now();
    let batch = (iterations / 100).max(1);
    let mut remaining = iterations;
    while remaining > 0 {
        let chunk = batch.min(remaining);
        if let Err(error) = executor.run(chunk) {
            progress.abandon();
            eprintln!("Training failed: {}", error);
            std::process::exit(1);
        }
        progress.inc(chunk);
        remaining -= chunk;
    }
    progress.finish();

    let elapsed = start.elapsed().as_secs_f64();
    let total = executor.utility_manager().iterations();
    println!(
        "\nTrained {} iterations in {:.2}s ({:.0} it/s)",
        total,
        elapsed,
        total as f64 / elapsed.max(f64::EPSILON)
    );

    let mut mean = [0.0; 2];
    executor.utility_manager().read(&mut mean);
    println!(
        "Mean utility: P1 {:+.4}  P2 {:+.4}  (equilibrium: -1/18 = {:+.4})",
        mean[0],
        mean[1],
        -1.0 / 18.0
    );

    let game = executor.engines()[0].game();
    let mut strategies = BTreeMap::new();
    for key in game.info_set_keys() {
        if let Some(strategy) = game.average_strategy(&key) {
            strategies.insert(
                key,
                StrategyEntry {
                    pass: strategy[0],
                    bet: strategy[1],
                },
            );
        }
    }

    println!("\nAverage strategies (card:history -> pass/bet):");
    for (key, entry) in &strategies {
        println!("  {:<6} pass {:.3}  bet {:.3}", key, entry.pass, entry.bet);
    }

    let output = TrainingOutput {
        iterations: total,
        mean_utility: mean.to_vec(),
        strategies,
    };
    match File::create(&output_file)
        .map_err(|e| e.to_string())
        .and_then(|mut file| {
            serde_json::to_string_pretty(&output)
                .map_err(|e| e.to_string())
                .and_then(|json| file.write_all(json.as_bytes()).map_err(|e| e.to_string()))
        }) {
        Ok(()) => println!("\nStrategies written to {}", output_file),
        Err(error) => eprintln!("Failed to write {}: {}", output_file, error),
    }

    if weights_file.is_some() {
        match executor.save() {
            Ok(()) => println!("Weights saved"),
            Err(error) => eprintln!("Failed to save weights: {}", error),
        }
    }
}

fn print_help() {
    println!("Kuhn poker CS-CFR trainer");
    println!();
    println!("Usage: train_kuhn [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -i, --iterations <N>   Training iterations (default: 1,000,000)");
    println!("  -t, --threads <N>      Worker threads (default: auto)");
    println!("  -s, --seed <N>         Random seed for the deal sampler");
    println!("  -w, --weights <FILE>   Binary weights file to resume from and save to");
    println!("      --track-visits     Persist per-node visit counters");
    println!("  -o, --output <FILE>    JSON strategy output (default: kuhn_strategy.json)");
    println!("  -h, --help             Show this help");
}
