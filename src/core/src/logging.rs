//! Process-wide logger: `<timestamp> <LEVEL> <message>` lines on stderr, copied into a
//! per-run file when a log directory is configured.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::LevelFilter;

/// `<dir>/<YYYYmmddHHMMSS>.log`
pub fn log_file_path(dir: &Path, started: DateTime<Local>) -> PathBuf {
    dir.join(format!("{}.log", started.format("%Y%m%d%H%M%S")))
}

struct Tee {
    file: Option<File>,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Installs the global logger. `RUST_LOG`, when set, overrides `level`.
///
/// Returns the path of the log file, if one was opened.
pub fn init(level: LevelFilter, log_dir: Option<&Path>) -> io::Result<Option<PathBuf>> {
    let (file, path) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let path = log_file_path(dir, Local::now());
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            (Some(file), Some(path))
        }
        None => (None, None),
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(Tee { file })))
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn log_file_is_named_after_start_time() {
        let started = Local.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        assert_eq!(
            log_file_path(Path::new("logs"), started),
            PathBuf::from("logs/20240301090507.log")
        );
    }

    #[test]
    fn tee_copies_into_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("copy.log");
        let mut tee = Tee {
            file: Some(File::create(&path).unwrap()),
        };

        tee.write_all(b"line one\n").unwrap();
        tee.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "line one\n");
    }

    #[test]
    #[serial]
    fn init_writes_formatted_lines() {
        let dir = tempdir().unwrap();
        let path = init(LevelFilter::Info, Some(&dir.path().join("logs")))
            .unwrap()
            .unwrap();

        log::info!("gateway started");
        log::logger().flush();

        let contents = fs::read_to_string(&path).unwrap();
        let line = contents
            .lines()
            .find(|l| l.ends_with("gateway started"))
            .unwrap();
        assert!(line.contains(" INFO gateway started"));
        assert!(init(LevelFilter::Info, None).is_err());
    }
}
