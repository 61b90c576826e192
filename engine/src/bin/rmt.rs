use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use engine::config::Config;
use engine::orchestrator::Orchestrator;
use logger::logger::Logger;

/// Entry point for the migration engine. Accepts a subcommand followed
/// by a config file path:
///
/// ```bash
/// rmt migrate /path/to/rmt.conf
/// rmt compare /path/to/rmt.conf
/// rmt group_state /path/to/rmt.conf
/// ```
///
/// Every subcommand shares the same config file; `--source`/`--target`
/// inline overrides are not supported here — use the config file's
/// `source`/`target` keys.
fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: {} <migrate|compare|group_state> <config-file>", args[0]);
        return ExitCode::FAILURE;
    }

    let subcommand = &args[1];
    let config_path = &args[2];

    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error loading config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let logger = Logger::new(config.get_log_file());

    let orchestrator = Orchestrator::new(config, logger);
    let shutdown = Arc::new(AtomicBool::new(false));

    let result = match subcommand.as_str() {
        "migrate" => orchestrator.run_migrate(shutdown).map(|_| ()),
        "compare" => orchestrator.run_compare(shutdown),
        "group_state" => orchestrator.run_group_state().map(|state| {
            println!("{state}");
        }),
        other => {
            eprintln!("unknown subcommand '{other}'");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
