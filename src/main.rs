fn is_robot_mode_args() -> bool {
    std::env::args().any(|arg| arg == "--json" || arg == "--robot")
}

fn report(err: &onceupon::CliError) {
    if is_robot_mode_args() {
        let payload = serde_json::json!({
            "error": {
                "code": err.code,
                "kind": err.kind,
                "message": err.message,
                "hint": err.hint,
                "retryable": err.retryable,
            }
        });
        eprintln!("{payload}");
    } else {
        eprintln!("Error: {}", err.message);
        if let Some(hint) = &err.hint {
            eprintln!("{hint}");
        }
    }
}

fn main() {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let raw_args: Vec<String> = std::env::args().collect();
    let parsed = match onceupon::parse_cli(raw_args) {
        Ok(parsed) => parsed,
        Err(err) => {
            report(&err);
            std::process::exit(err.code);
        }
    };

    if let Err(err) = onceupon::run_with_parsed(parsed) {
        report(&err);
        std::process::exit(err.code);
    }
}
