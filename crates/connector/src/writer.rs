use chrono::{Local, NaiveDate, NaiveDateTime};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Appends notices to a text log partitioned by day (`YYYY.MM.DD_Log.txt`).
pub struct DailyLogWriter {
    base_dir: PathBuf,
    inner: Mutex<DailyLogInner>,
}

struct DailyLogInner {
    writer: Option<BufWriter<File>>,
    current_date: Option<NaiveDate>,
}

impl DailyLogWriter {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            inner: Mutex::new(DailyLogInner {
                writer: None,
                current_date: None,
            }),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.base_dir
            .join(format!("{}_Log.txt", date.format("%Y.%m.%d")))
    }

    /// Append with the local wall-clock time
    pub fn append(&self, message: &str) -> io::Result<()> {
        self.append_at(Local::now().naive_local(), message)
    }

    pub fn append_at(&self, now: NaiveDateTime, message: &str) -> io::Result<()> {
        let date = now.date();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        // Rotate file if date changed
        if inner.current_date != Some(date) {
            if let Some(ref mut writer) = inner.writer {
                writer.flush()?;
            }

            fs::create_dir_all(&self.base_dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for(date))?;

            inner.writer = Some(BufWriter::new(file));
            inner.current_date = Some(date);
        }

        if let Some(ref mut writer) = inner.writer {
            writeln!(
                writer,
                "{}  {}  {}",
                date.format("%Y-%m-%d"),
                now.format("%H:%M:%S"),
                message
            )?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn close(&self) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ref mut writer) = inner.writer {
            writer.flush()?;
        }
        inner.writer = None;
        inner.current_date = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
    }

    #[test]
    fn test_append_writes_dated_line() {
        let tmp_dir = TempDir::new().unwrap();
        let writer = DailyLogWriter::new(tmp_dir.path());

        writer
            .append_at(at(2020, 12, 4, 9, 30), "SERVER CONNECTED")
            .unwrap();
        writer.close().unwrap();

        let path = tmp_dir.path().join("2020.12.04_Log.txt");
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content, "2020-12-04  09:30:00  SERVER CONNECTED\n");
    }

    #[test]
    fn test_rotates_on_date_change() {
        let tmp_dir = TempDir::new().unwrap();
        let writer = DailyLogWriter::new(tmp_dir.path().join("logs"));

        writer.append_at(at(2020, 12, 4, 23, 59), "first").unwrap();
        writer.append_at(at(2020, 12, 5, 0, 1), "second").unwrap();
        writer.close().unwrap();

        let day1 = fs::read_to_string(writer.path_for(NaiveDate::from_ymd_opt(2020, 12, 4).unwrap()))
            .unwrap();
        let day2 = fs::read_to_string(writer.path_for(NaiveDate::from_ymd_opt(2020, 12, 5).unwrap()))
            .unwrap();
        assert!(day1.contains("first"));
        assert!(!day1.contains("second"));
        assert!(day2.contains("second"));
    }

    #[test]
    fn test_reopen_appends() {
        let tmp_dir = TempDir::new().unwrap();
        let writer = DailyLogWriter::new(tmp_dir.path());
        writer.append_at(at(2021, 1, 4, 8, 0), "one").unwrap();
        writer.close().unwrap();
        writer.append_at(at(2021, 1, 4, 8, 5), "two").unwrap();
        writer.close().unwrap();

        let content = fs::read_to_string(tmp_dir.path().join("2021.01.04_Log.txt")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
