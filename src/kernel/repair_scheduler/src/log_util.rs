use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, TermLogger, TerminalMode,
    WriteLogger,
};
use std::fs::File;
use std::path::Path;
use time::macros::format_description;

use crate::{RepairError, RepairResult};

pub const LOG_LEVEL_ENV: &str = "REPAIR_LOG";

// level comes from REPAIR_LOG, default is info
pub fn get_log_level() -> LevelFilter {
    std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::Info)
}

pub fn init_logging(service_name: &str, log_dir: &Path) -> RepairResult<()> {
    let log_level = get_log_level();
    std::fs::create_dir_all(log_dir).map_err(|err| {
        RepairError::LogInitError(format!(
            "create log dir {} failed: {}",
            log_dir.to_string_lossy(),
            err
        ))
    })?;
    let log_file = log_dir.join(format!("{}.log", service_name));
    let file = File::create(&log_file).map_err(|err| {
        RepairError::LogInitError(format!(
            "create log file {} failed: {}",
            log_file.to_string_lossy(),
            err
        ))
    })?;

    let config = ConfigBuilder::new()
        .set_time_format_custom(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        ))
        .build();

    CombinedLogger::init(vec![
        TermLogger::new(
            log_level,
            config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(log_level, config, file),
    ])
    .map_err(|err| RepairError::LogInitError(err.to_string()))?;

    info!(
        "{} logging to {}, level:{}",
        service_name,
        log_file.to_string_lossy(),
        log_level
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        // the global logger may already be set by another test in this binary
        let _ = init_logging("repair_scheduler", &log_dir);
        assert!(log_dir.join("repair_scheduler.log").exists());
    }
}
