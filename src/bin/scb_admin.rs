/**
 * `scb-admin` — administrative CLI binary (§6)
 *
 * DESIGN DECISION: argv parsing and exit-code mapping only; every
 * subcommand's actual behavior lives in `scb_core::cli::AdminCli`
 * WHY: keeps the administrative surface testable without spawning a
 * subprocess (see `cli::tests`), matching the teacher's pattern of a thin
 * `main.rs` delegating to a library-level CLI type
 *
 * Usage:
 *   scb-admin bus status
 *   scb-admin bus replay --from-offset N
 *   scb-admin store snapshot
 *   scb-admin store restore <file>
 *   scb-admin circuit reset <name>
 */

use std::path::PathBuf;
use std::process::ExitCode as ProcessExitCode;
use std::sync::Arc;

use scb_core::bus::CoherenceBus;
use scb_core::cli::{AdminCli, ExitCode};
use scb_core::config::ConfigLoader;
use scb_core::store::KnowledgeStore;

fn main() -> ProcessExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return map_exit_code(ExitCode::Misuse);
        }
    };

    runtime.block_on(async { run(args).await })
}

async fn run(args: Vec<String>) -> ProcessExitCode {
    let config = match ConfigLoader::from_env().load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return map_exit_code(ExitCode::Misuse);
        }
    };

    let bus = Arc::new(CoherenceBus::new(config.options.clone()));
    let store = match KnowledgeStore::open(config.data_dir.clone(), &config.options.store) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("failed to open knowledge store at {}: {e}", config.data_dir.display());
            return map_exit_code(ExitCode::StoreCorruption);
        }
    };
    let cli = AdminCli::new(bus, store);

    let refs: Vec<&str> = args.iter().map(String::as_str).collect();
    match refs.as_slice() {
        ["bus", "status"] => match cli.bus_status() {
            Ok(report) => {
                println!("{report}");
                map_exit_code(ExitCode::Ok)
            }
            Err(e) => fail(&e),
        },
        ["bus", "replay", "--from-offset", offset] => match offset.parse::<u64>() {
            Ok(from_offset) => match cli.bus_replay(from_offset).await {
                Ok(report) => {
                    println!("{report}");
                    map_exit_code(ExitCode::Ok)
                }
                Err(e) => fail(&e),
            },
            Err(_) => usage(&format!("--from-offset expects an integer, got {offset}")),
        },
        ["store", "snapshot"] => match cli.store_snapshot() {
            Ok(path) => {
                println!("snapshot written to {}", path.display());
                map_exit_code(ExitCode::Ok)
            }
            Err(e) => fail(&e),
        },
        ["store", "restore", file] => match cli.store_restore(&PathBuf::from(file)) {
            Ok(()) => {
                println!("restored from {file}");
                map_exit_code(ExitCode::Ok)
            }
            Err(e) => fail(&e),
        },
        ["circuit", "reset", name] => match cli.circuit_reset(name) {
            Ok(()) => {
                println!("circuit breaker {name} reset to closed");
                map_exit_code(ExitCode::Ok)
            }
            Err(e) => fail(&e),
        },
        _ => usage("expected one of: bus status | bus replay --from-offset N | store snapshot | store restore <file> | circuit reset <name>"),
    }
}

fn fail(err: &scb_core::error::Error) -> ProcessExitCode {
    eprintln!("error: {err}");
    map_exit_code(ExitCode::for_error(err))
}

fn usage(message: &str) -> ProcessExitCode {
    eprintln!("usage: {message}");
    map_exit_code(ExitCode::Misuse)
}

fn map_exit_code(code: ExitCode) -> ProcessExitCode {
    ProcessExitCode::from(code as u8)
}
