use chrono::Utc;
use std::io;
use std::path::Path;

/// Logs to stderr and, when it can be opened, to `log_path`.
pub fn setup_logging(log_path: &Path, level: log::LevelFilter) {
    let base = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} {}: {}",
                Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(io::stderr());

    let dispatch = if let Ok(log_file) = fern::log_file(log_path) {
        base.chain(log_file)
    } else {
        eprintln!(
            "Warning: could not open log file {:?}, logging to stderr only",
            log_path
        );
        base
    };

    if let Err(e) = dispatch.apply() {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }
}
