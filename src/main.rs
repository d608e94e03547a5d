mod calc;
mod config;
mod db;
mod ipc;
mod parts;
mod recalc;
mod stats;
mod telemetry;

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cfg = match config::AppConfig::load() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("correctord: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = telemetry::init(&cfg.telemetry) {
        eprintln!("correctord: {e}");
        return ExitCode::FAILURE;
    }
    tracing::info!(
        grade_floor = cfg.policy.grade_floor,
        pass_threshold = cfg.policy.pass_threshold,
        "correctord ready"
    );

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        policy: cfg.policy,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    ExitCode::SUCCESS
}
