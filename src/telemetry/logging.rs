use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "LOOTKIT_LOG";
pub const LOG_FILE: &str = "automation.log";

static INSTALLED: OnceLock<PathBuf> = OnceLock::new();

const HEADER_LINE: &str =
    "-------------------------------------------------------------------------------";
const HEADER_TITLE: &str = "lootkit - item automation";


/// Installs the global subscriber writing to `<root>/log/automation.log`.
/// `LOOTKIT_LOG` takes precedence over `level`. Later calls are no-ops and
/// return the path chosen by the first one.
pub fn init(root: &Path, level: &str) -> Result<PathBuf, String> {
    if let Some(path) = INSTALLED.get() {
        return Ok(path.clone());
    }
    let log_dir = root.join("log");
    std::fs::create_dir_all(&log_dir)
        .map_err(|err| format!("log directory create failed: {}", err))?;

    let path = log_dir.join(LOG_FILE);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| format!("open log {} failed: {}", path.display(), err))?;
    if file.metadata().map(|m| m.len()).unwrap_or(0) == 0 {
        write_header(&mut file)?;
    }

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|err| format!("log subscriber install failed: {}", err))?;

    let _ = INSTALLED.set(path.clone());
    tracing::info!(target: "lootkit", log = %path.display(), "logging started");
    Ok(path)
}

fn write_header(file: &mut impl Write) -> Result<(), String> {
    let started = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    writeln!(file, "{HEADER_LINE}")
        .map_err(|err| format!("header write failed: {}", err))?;
    writeln!(file, "{HEADER_TITLE}")
        .map_err(|err| format!("header write failed: {}", err))?;
    writeln!(file, "{LOG_FILE} - started at unix {started}")
        .map_err(|err| format!("header write failed: {}", err))?;
    Ok(())
}
