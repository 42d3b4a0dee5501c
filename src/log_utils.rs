use std::path::*;
use flexi_logger::*;

pub struct TimeLogger {
    start_time: std::time::Instant,
}

impl TimeLogger {
    pub fn start() -> TimeLogger {
        TimeLogger { start_time: std::time::Instant::now() }
    }

    pub fn log(self, text: &str) -> f64 {
        let time = self.start_time.elapsed().as_secs_f64();
        log::debug!("BENCH {} time = {:.6} s", text, time);
        time
    }
}

/// Starts logging into stderr and, when `log_path` is given, into file there too
pub fn start_logger(log_path: Option<&Path>, verbose: bool) -> anyhow::Result<LoggerHandle> {
    let custom_format_fun = |
        w:      &mut dyn std::io::Write,
        now:    &mut DeferredNow,
        record: &Record
    | -> Result<(), std::io::Error> {
        write!(
            w, "[{}] {} {}",
            now.format(TS_DASHES_BLANK_COLONS_DOT_BLANK),
            record.level(),
            record.args()
        )
    };

    let level = if verbose { "debug" } else { "info" };
    let mut logger = Logger::try_with_str(level)?
        .format(custom_format_fun);
    logger = if let Some(log_path) = log_path {
        logger
            .log_to_file(
                FileSpec::default()
                    .directory(log_path)
                    .basename(env!("CARGO_PKG_NAME"))
            )
            .duplicate_to_stderr(Duplicate::All)
            .print_message()
    } else {
        logger.log_to_stderr()
    };
    let handle = logger.start()?;
    Ok(handle)
}

/// Removes log files older than `days`
pub fn cleanup_old_logs(log_path: &Path, days: u64) {
    let Ok(dir) = std::fs::read_dir(log_path) else { return; };
    let max_age = std::time::Duration::from_secs(days * 24 * 60 * 60);
    for entry in dir.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let age = entry.metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok());
        if matches!(age, Some(age) if age > max_age) {
            _ = std::fs::remove_file(&path);
        }
    }
}

#[test]
fn test_cleanup_old_logs_keeps_fresh_files() {
    let dir = std::env::temp_dir().join(format!("efinder_logs_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let fresh = dir.join("efinder_fresh.log");
    let other = dir.join("notes.txt");
    std::fs::write(&fresh, "x").unwrap();
    std::fs::write(&other, "x").unwrap();
    cleanup_old_logs(&dir, 14);
    assert!(fresh.is_file());
    assert!(other.is_file());
    _ = std::fs::remove_dir_all(&dir);
}
