pub mod models {
    pub mod pollution;
    pub mod weather;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod models;
}
pub mod fields;
pub mod geo;
pub mod idw;
pub mod imputation;
pub mod locations;
pub mod schema;
pub mod store;
pub mod services {
    pub mod cycle;
    pub mod ingest;
    pub mod scheduler;
}

use crate::client::WeatherApiClient;
use crate::config::Config;
use crate::models::pollution::CycleKey;
use crate::services::cycle::{Pipeline, PipelineSettings};
use crate::services::scheduler::{Schedule, SystemClock};
use crate::store::PgStore;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{error, info};
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Scheduled,
    /// Run a single cycle now and exit.
    Once,
    /// Recompute interpolated fields of an already persisted cycle and exit.
    Reinterpolate(CycleKey),
}

#[derive(Debug)]
struct CliOptions {
    env_file: Option<LoadedEnvFile>,
    mode: RunMode,
}

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

fn apply_database_migrations(conn: &mut PgConnection) -> Result<(), String> {
    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                info!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(format!("Applying database migrations failed: {}", e)),
    }
}

fn run(mode: RunMode) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    fields::validate_alignment()?;
    info!(
        "Config loaded (timezone={}, triggers={}, lag={}min, idw_power={}, k_nearest={}, metric={:?}, input={:?}, history={:?}, fetch_timeout={}s, fetch_attempts={})",
        cfg.timezone,
        cfg.trigger_times
            .iter()
            .map(|t| t.format("%H:%M").to_string())
            .collect::<Vec<_>>()
            .join(","),
        cfg.observation_lag.num_minutes(),
        cfg.idw.power,
        cfg.idw
            .k_nearest
            .map(|k| k.get().to_string())
            .unwrap_or_else(|| "-".to_string()),
        cfg.distance_metric,
        cfg.interpolation_input,
        cfg.history_input,
        cfg.fetch_timeout.as_secs(),
        cfg.fetch_max_attempts.get()
    );

    // 2) Sensor locations
    let locations = locations::load_locations(&cfg.locations_file)?;
    info!("Loaded {} sensor location(s) from {}", locations.len(), cfg.locations_file.display());

    // 3) Connect DB and apply pending migrations
    let mut conn = PgConnection::establish(&cfg.database_url).map_err(|e| format!("DB connection failed: {}", e))?;
    info!("Connected to database");
    apply_database_migrations(&mut conn)?;
    drop(conn);

    // 4) Wire the pipeline
    let client = WeatherApiClient::new(
        cfg.weather_api_url.clone(),
        cfg.weather_api_key.clone(),
        cfg.fetch_timeout,
        cfg.fetch_max_attempts,
    );
    let store = PgStore::new(cfg.database_url.clone());
    let settings = PipelineSettings {
        idw: cfg.idw,
        metric: cfg.distance_metric,
        input: cfg.interpolation_input,
        history: cfg.history_input,
    };
    let pipeline = Pipeline::new(&client, &store, &locations, settings);
    let schedule = Schedule::new(cfg.timezone, cfg.trigger_times.clone())?;

    // 5) One-shot modes and immediate cycle
    if let RunMode::Reinterpolate(key) = mode {
        let updated = pipeline
            .interpolate(key)
            .map_err(|e| format!("Re-interpolating cycle {} failed: {}", key, e))?;
        info!("Re-interpolated {} row(s) for cycle {}; exiting", updated, key);
        return Ok(());
    }
    let once = mode == RunMode::Once;
    if once || cfg.run_on_startup {
        let key = CycleKey::for_trigger(chrono::Utc::now(), &schedule.timezone(), cfg.observation_lag);
        let report = pipeline.run_cycle(key).map_err(|e| format!("Cycle {} failed: {}", key, e))?;
        if once {
            info!("Single cycle finished ({} row(s) interpolated); exiting", report.interpolated);
            return Ok(());
        }
    }

    // 6) Scheduled loop
    info!(
        "Starting scheduler: {} trigger(s) per day in {}",
        schedule.triggers().len(),
        schedule.timezone()
    );
    schedule.run_forever(&SystemClock, |fired| {
        let key = CycleKey::for_trigger(fired, &schedule.timezone(), cfg.observation_lag);
        if let Err(e) = pipeline.run_cycle(key) {
            error!("Cycle {} failed: {}", key, e);
        }
    })
}

fn configure_env_from_cli() -> Result<CliOptions, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut env_file: Option<PathBuf> = None;
    let mut mode = RunMode::Scheduled;

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--once") => mode = RunMode::Once,
            Some("--reinterpolate") => {
                let value = args
                    .next()
                    .and_then(|v| v.into_string().ok())
                    .ok_or_else(|| "`--reinterpolate` requires a \"YYYY-MM-DD HH:MM:SS\" argument".to_string())?;
                mode = RunMode::Reinterpolate(parse_cycle_key(&value)?);
            }
            Some("--env-file") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                env_file = Some(PathBuf::from(path_str));
            }
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    let env_file = if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        Some(LoadedEnvFile { path, explicit: true })
    } else {
        let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
        let default_path = cwd.join(".env");
        if default_path.is_file() {
            load_env_file(&default_path)?;
            Some(LoadedEnvFile {
                path: default_path,
                explicit: false,
            })
        } else {
            None
        }
    };

    Ok(CliOptions { env_file, mode })
}

fn parse_cycle_key(value: &str) -> Result<CycleKey, String> {
    let dt = chrono::NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S")
        .map_err(|e| format!("invalid cycle key '{}' (expected \"YYYY-MM-DD HH:MM:SS\"): {}", value, e))?;
    Ok(CycleKey::new(dt.date(), dt.time()))
}

/// Apply `KEY=value` lines from `path` without overriding variables that are
/// already set in the process environment.
fn load_env_file(path: &Path) -> Result<(), String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

    for (index, line) in contents.lines().enumerate() {
        let Some((key, value)) = parse_env_assignment(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        if std::env::var_os(key).is_none() {
            // Single-threaded at this point; no other thread reads the environment yet.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// One `.env` line: blank and `#` lines are skipped, `export ` is tolerated.
/// Values may be wrapped in single or double quotes (taken literally);
/// unquoted values end at an inline `#`.
fn parse_env_assignment(line: &str) -> Result<Option<(&str, &str)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").unwrap_or(line);

    let (key, value) = line.split_once('=').ok_or("missing '=' in assignment")?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(format!("invalid variable name '{}'", key));
    }

    let value = value.trim();
    let value = match value.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let inner = &value[1..];
            let close = inner.find(quote).ok_or("unterminated quoted value")?;
            let rest = inner[close + 1..].trim_start();
            if !(rest.is_empty() || rest.starts_with('#')) {
                return Err("unexpected characters after closing quote".to_string());
            }
            &inner[..close]
        }
        _ => value.split('#').next().unwrap_or_default().trim_end(),
    };
    Ok(Some((key, value)))
}

fn main() {
    let cli = match configure_env_from_cli() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = cli.env_file.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "pollution-idw {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cli.mode) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
