use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use serde_json::{Value, json};
use store::{PlacementStore, RegistryLockMode, StoreConfig};

#[derive(Debug, Clone)]
struct Config {
    readers: usize,
    lookups_per_reader: usize,
    locations: usize,
    records: usize,
    cache_capacity: usize,
    replace_every_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            readers: 8,
            lookups_per_reader: 50_000,
            locations: 256,
            records: 4_096,
            cache_capacity: 128,
            replace_every_ms: 5,
        }
    }
}

#[derive(Debug, Clone)]
struct RunSummary {
    lock_mode: RegistryLockMode,
    elapsed_seconds: f64,
    lookups: usize,
    replaces: usize,
    hit_rate_pct: f64,
    stale_inserts_skipped: u64,
    latencies_us: Vec<f64>,
}

fn main() {
    let config = match parse_args(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    println!("Placement store contention benchmark");
    println!("readers: {}", config.readers);
    println!("lookups_per_reader: {}", config.lookups_per_reader);
    println!("locations: {}", config.locations);
    println!("records: {}", config.records);
    println!("cache_capacity: {}", config.cache_capacity);
    println!("replace_every_ms: {}", config.replace_every_ms);

    for lock_mode in [RegistryLockMode::Exclusive, RegistryLockMode::SharedRead] {
        match run(&config, lock_mode) {
            Ok(summary) => print_summary(&summary),
            Err(err) => {
                eprintln!("benchmark failed for lock mode {}: {err}", lock_mode.as_str());
                std::process::exit(1);
            }
        }
    }
}

fn run(config: &Config, lock_mode: RegistryLockMode) -> Result<RunSummary, String> {
    let cache_capacity = NonZeroUsize::new(config.cache_capacity)
        .ok_or_else(|| "cache capacity must be greater than zero".to_string())?;
    let store = Arc::new(PlacementStore::new(StoreConfig {
        cache_capacity,
        lock_mode,
    }));
    store
        .replace_all(build_payload(config, 0))
        .map_err(|err| format!("initial ingest failed: {err}"))?;

    let done = AtomicBool::new(false);
    let started_at = Instant::now();
    let (replaces, mut latencies_us) = std::thread::scope(|scope| {
        let writer = scope.spawn(|| {
            let mut round = 1;
            while !done.load(Ordering::Relaxed) {
                if store.replace_all(build_payload(config, round)).is_ok() {
                    round += 1;
                }
                std::thread::sleep(std::time::Duration::from_millis(config.replace_every_ms));
            }
            round - 1
        });

        let readers: Vec<_> = (0..config.readers)
            .map(|reader_idx| {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    let mut latencies = Vec::with_capacity(config.lookups_per_reader);
                    for lookup_idx in 0..config.lookups_per_reader {
                        let location = pick_location(config, reader_idx, lookup_idx);
                        let lookup_started = Instant::now();
                        let _ = store.lookup(&location);
                        latencies.push(lookup_started.elapsed().as_secs_f64() * 1_000_000.0);
                    }
                    latencies
                })
            })
            .collect();

        let mut latencies = Vec::new();
        for reader in readers {
            latencies.extend(reader.join().unwrap_or_default());
        }
        done.store(true, Ordering::Relaxed);
        (writer.join().unwrap_or_default(), latencies)
    });
    let elapsed_seconds = started_at.elapsed().as_secs_f64();

    latencies_us.sort_by(|a, b| a.total_cmp(b));
    let stats = store.stats();
    let lookups = (stats.cache.hits + stats.cache.misses) as usize;
    if lookups == 0 {
        return Err("no lookups completed".to_string());
    }
    Ok(RunSummary {
        lock_mode,
        elapsed_seconds,
        lookups,
        replaces,
        hit_rate_pct: stats.cache.hits as f64 / lookups as f64 * 100.0,
        stale_inserts_skipped: stats.cache.stale_inserts_skipped,
        latencies_us,
    })
}

fn build_payload(config: &Config, round: usize) -> Value {
    Value::Array(
        (0..config.records)
            .map(|idx| {
                json!({
                    "location": format!("slot-{}", idx % config.locations.max(1)),
                    "id": idx,
                    "round": round,
                })
            })
            .collect(),
    )
}

// Skewed so a handful of locations dominate, like popular page regions.
fn pick_location(config: &Config, reader_idx: usize, lookup_idx: usize) -> String {
    let seed = reader_idx.wrapping_mul(7919).wrapping_add(lookup_idx);
    let slot = if seed % 10 < 8 {
        seed % 8
    } else {
        seed % config.locations.max(1)
    };
    format!("slot-{slot}")
}

fn print_summary(summary: &RunSummary) {
    println!("lock_mode: {}", summary.lock_mode.as_str());
    println!("  elapsed_seconds: {:.4}", summary.elapsed_seconds);
    println!("  lookups: {}", summary.lookups);
    println!("  replaces: {}", summary.replaces);
    println!(
        "  throughput_lookups_per_sec: {:.2}",
        summary.lookups as f64 / summary.elapsed_seconds.max(0.0001)
    );
    println!("  cache_hit_rate_pct: {:.2}", summary.hit_rate_pct);
    println!("  stale_inserts_skipped: {}", summary.stale_inserts_skipped);
    println!(
        "  latency_p50_us: {:.3}",
        percentile(&summary.latencies_us, 0.50)
    );
    println!(
        "  latency_p99_us: {:.3}",
        percentile(&summary.latencies_us, 0.99)
    );
}

fn percentile(sorted: &[f64], quantile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (((sorted.len() - 1) as f64) * quantile).round() as usize;
    sorted[idx]
}

fn parse_args<I>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = String>,
{
    let mut config = Config::default();
    let mut args = args.into_iter();
    while let Some(flag) = args.next() {
        let value = args
            .next()
            .ok_or_else(|| format!("missing value for {flag}"))?;
        let parsed = value
            .parse::<u64>()
            .map_err(|_| format!("invalid value for {flag}: {value}"))?;
        match flag.as_str() {
            "--readers" => config.readers = parsed.max(1) as usize,
            "--lookups-per-reader" => config.lookups_per_reader = parsed as usize,
            "--locations" => config.locations = parsed.max(1) as usize,
            "--records" => config.records = parsed as usize,
            "--cache-capacity" => config.cache_capacity = parsed as usize,
            "--replace-every-ms" => config.replace_every_ms = parsed,
            _ => return Err(format!("unknown flag: {flag}")),
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_args_overrides_defaults() {
        let config = parse_args(
            ["--readers", "2", "--cache-capacity", "16"]
                .into_iter()
                .map(String::from),
        )
        .unwrap();
        assert_eq!(config.readers, 2);
        assert_eq!(config.cache_capacity, 16);
        assert_eq!(config.locations, 256);
    }

    #[test]
    fn parse_args_rejects_unknown_flag() {
        let err = parse_args(["--nope", "1"].into_iter().map(String::from)).unwrap_err();
        assert!(err.contains("unknown flag"));
    }

    #[test]
    fn run_completes_for_both_lock_modes() {
        let config = Config {
            readers: 2,
            lookups_per_reader: 200,
            locations: 16,
            records: 64,
            cache_capacity: 4,
            replace_every_ms: 1,
        };
        for lock_mode in [RegistryLockMode::Exclusive, RegistryLockMode::SharedRead] {
            let summary = run(&config, lock_mode).unwrap();
            assert_eq!(summary.lookups, 400);
            assert_eq!(summary.latencies_us.len(), 400);
        }
    }
}
