use std::num::NonZeroUsize;

use ingestion::{
    ingest_payload,
    transport::{IngestionRuntime, serve_http_with_workers},
};
use store::{DEFAULT_CACHE_CAPACITY, PlacementStore, RegistryLockMode, StoreConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let serve_mode = std::env::args().any(|arg| arg == "--serve");
    let bind_addr = env_with_fallback("ADS_BIND", "AD_PLACEMENTS_BIND")
        .unwrap_or_else(|| "127.0.0.1:8080".to_string());
    let http_workers = parse_http_workers();
    let transport_runtime = parse_transport_runtime();
    let store_config = match parse_store_config() {
        Ok(config) => config,
        Err(reason) => {
            error!("ads store configuration error: {reason}");
            std::process::exit(2);
        }
    };

    let store = PlacementStore::new(store_config);
    info!(
        cache_capacity = store_config.cache_capacity.get(),
        lock_mode = store_config.lock_mode.as_str(),
        "ads registry initialized"
    );

    if let Some(seed_path) = env_with_fallback("ADS_SEED_PATH", "AD_PLACEMENTS_SEED_PATH") {
        let body = match std::fs::read(&seed_path) {
            Ok(body) => body,
            Err(err) => {
                error!("ads failed reading seed file '{seed_path}': {err}");
                std::process::exit(1);
            }
        };
        match ingest_payload(&store, &body) {
            Ok(stats) => info!(
                seed_path = %seed_path,
                records = stats.record_count,
                locations = stats.location_count,
                "ads seed ingested"
            ),
            Err(err) => {
                error!("ads seed file '{seed_path}' rejected: {err}");
                std::process::exit(1);
            }
        }
    }

    if !serve_mode {
        let stats = store.stats();
        println!(
            "ads ready: records={}, locations={} (pass --serve to start the HTTP transport)",
            stats.registry.record_count, stats.registry.location_count
        );
        return;
    }

    info!("ads transport listening on http://{bind_addr}");
    info!("ads transport workers: {http_workers}");
    info!("ads transport runtime: {}", transport_runtime.as_str());
    info!("ads health endpoint: http://{bind_addr}/health");
    info!("ads metrics endpoint: http://{bind_addr}/metrics");
    info!("ads upload endpoint: http://{bind_addr}/upload/");
    info!("ads lookup endpoint: http://{bind_addr}/ads/{{location}}/");

    let runtime = IngestionRuntime::new(store);
    match transport_runtime {
        TransportRuntime::Std => {
            if let Err(err) = serve_http_with_workers(runtime, &bind_addr, http_workers) {
                error!("ads transport failed: {err}");
                std::process::exit(1);
            }
        }
        TransportRuntime::Axum => {
            #[cfg(feature = "async-transport")]
            {
                if let Err(err) = ingestion::transport_axum::serve_http_with_axum(
                    runtime,
                    &bind_addr,
                    http_workers,
                ) {
                    error!("ads transport failed: {err}");
                    std::process::exit(1);
                }
            }
            #[cfg(not(feature = "async-transport"))]
            {
                drop(runtime);
                error!("ads transport runtime 'axum' requires build feature 'async-transport'");
                std::process::exit(2);
            }
        }
    }
}

fn env_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .or_else(|| std::env::var(fallback).ok())
}

fn parse_env_with_fallback<T>(primary: &str, fallback: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env_with_fallback(primary, fallback).and_then(|value| value.parse::<T>().ok())
}

fn parse_store_config() -> Result<StoreConfig, String> {
    let cache_capacity =
        match env_with_fallback("ADS_CACHE_CAPACITY", "AD_PLACEMENTS_CACHE_CAPACITY") {
            Some(raw) => parse_cache_capacity(&raw)?,
            None => DEFAULT_CACHE_CAPACITY,
        };
    let lock_mode = match env_with_fallback("ADS_REGISTRY_LOCK", "AD_PLACEMENTS_REGISTRY_LOCK") {
        Some(raw) => raw.parse::<RegistryLockMode>()?,
        None => RegistryLockMode::default(),
    };
    Ok(StoreConfig {
        cache_capacity,
        lock_mode,
    })
}

fn parse_cache_capacity(raw: &str) -> Result<NonZeroUsize, String> {
    raw.trim()
        .parse::<NonZeroUsize>()
        .map_err(|_| format!("invalid cache capacity '{raw}', expected a positive integer"))
}

fn parse_http_workers() -> usize {
    parse_env_with_fallback::<usize>("ADS_HTTP_WORKERS", "AD_PLACEMENTS_HTTP_WORKERS")
        .filter(|workers| *workers > 0)
        .unwrap_or_else(default_http_workers)
}

fn default_http_workers() -> usize {
    std::thread::available_parallelism()
        .map(|parallelism| parallelism.get().clamp(1, 32))
        .unwrap_or(4)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportRuntime {
    Std,
    Axum,
}

impl TransportRuntime {
    fn as_str(self) -> &'static str {
        match self {
            Self::Std => "std",
            Self::Axum => "axum",
        }
    }
}

fn parse_transport_runtime() -> TransportRuntime {
    let runtime_raw = env_with_fallback("ADS_TRANSPORT_RUNTIME", "AD_PLACEMENTS_TRANSPORT_RUNTIME");
    match runtime_raw.as_deref() {
        Some("axum") => TransportRuntime::Axum,
        Some("std") | None => TransportRuntime::Std,
        Some(other) => {
            warn!("unknown ads transport runtime '{other}', falling back to std");
            TransportRuntime::Std
        }
    }
}
