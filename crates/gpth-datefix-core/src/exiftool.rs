//! Embedded metadata access through the `exiftool` executable.
//!
//! Everything that touches file metadata goes through [`MetadataTool`] so the
//! pipeline can be exercised without the real binary.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use log::warn;

use crate::media::MediaKind;
use crate::sidecar::GeoData;

/// Date format exiftool reads and writes.
pub const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Known-recoverable complaints: container quirks and damaged-but-readable structures.
const BENIGN_MARKERS: &[&str] = &[
    "[minor]",
    "OtherImageStart",
    "Truncated",
    "trailer",
    "MakerNotes",
    "QuickTime",
    "doesn't exist or isn't writable",
    "Non-standard",
];

pub type ToolWarnings = Vec<String>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("failed to run {program}: {message}")]
    Spawn { program: String, message: String },
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("{0}")]
    Failed(String),
}

/// What to write into one file.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    /// Written to DateTimeOriginal, CreateDate and ModifyDate
    pub date: NaiveDateTime,
    pub gps: Option<GeoData>,
    pub description: Option<String>,
    pub kind: MediaKind,
    /// Also set the filesystem modification time
    pub set_file_time: bool,
}

pub trait MetadataTool: Send + Sync {
    /// Extension matching the detected content format, lowercase.
    fn detect_extension(&self, path: &Path) -> Result<Option<String>, ToolError>;

    /// Write the dates. Benign complaints come back as warnings.
    fn write_dates(&self, path: &Path, request: &WriteRequest) -> Result<ToolWarnings, ToolError>;

    /// DateTimeOriginal as currently stored in the file.
    fn read_original_capture(&self, path: &Path) -> Result<Option<NaiveDateTime>, ToolError>;
}

/// Subprocess adapter for Phil Harvey's exiftool.
#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
    timeout: Duration,
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn run(&self, args: &[String], path: &Path) -> Result<Output, ToolError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .arg(path_arg(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::Spawn {
                program: self.program.display().to_string(),
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        std::thread::scope(|s| {
            let out_handle = s.spawn(move || drain(stdout));
            let err_handle = s.spawn(move || drain(stderr));

            let deadline = Instant::now() + self.timeout;
            let status = loop {
                match child.try_wait() {
                    Ok(Some(status)) => break Ok(status),
                    Ok(None) if Instant::now() >= deadline => {
                        let _ = child.kill();
                        let _ = child.wait();
                        break Err(ToolError::Timeout(self.timeout.as_secs()));
                    }
                    Ok(None) => std::thread::sleep(POLL_INTERVAL),
                    Err(e) => break Err(ToolError::Failed(e.to_string())),
                }
            };

            let stdout = out_handle.join().unwrap_or_default();
            let stderr = err_handle.join().unwrap_or_default();
            status.map(|status| Output { status, stdout, stderr })
        })
    }

    /// First non-empty stdout line of a `-s3` query.
    fn query(&self, args: &[String], path: &Path) -> Result<Option<String>, ToolError> {
        let output = self.run(args, path)?;
        let report = classify_stderr(&String::from_utf8_lossy(&output.stderr));
        if !report.errors.is_empty() {
            return Err(ToolError::Failed(report.errors.join("; ")));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }
}

impl MetadataTool for ExifTool {
    fn detect_extension(&self, path: &Path) -> Result<Option<String>, ToolError> {
        let args = ["-s3".to_string(), "-FileTypeExtension".to_string()];
        Ok(self.query(&args, path)?.map(|ext| ext.to_ascii_lowercase()))
    }

    fn write_dates(&self, path: &Path, request: &WriteRequest) -> Result<ToolWarnings, ToolError> {
        let output = self.run(&write_args(request), path)?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        let report = classify_stderr(&stderr);

        if !report.errors.is_empty() {
            return Err(ToolError::Failed(report.errors.join("; ")));
        }
        if !output.status.success() && report.warnings.is_empty() {
            return Err(ToolError::Failed(format!(
                "exiftool failed (exit {})",
                output.status.code().unwrap_or(-1)
            )));
        }

        let mut warnings = report.warnings;
        if request.set_file_time {
            // exiftool's overwrite replaces the file, so the mtime is set afterwards
            if let Err(e) = set_file_mtime(path, &request.date) {
                warn!("{}: could not set file time: {}", path.display(), e);
                warnings.push(format!("file time not set: {}", e));
            }
        }
        Ok(warnings)
    }

    fn read_original_capture(&self, path: &Path) -> Result<Option<NaiveDateTime>, ToolError> {
        let args = [
            "-s3".to_string(),
            "-d".to_string(),
            EXIF_DATE_FORMAT.to_string(),
            "-DateTimeOriginal".to_string(),
        ];
        Ok(self.query(&args, path)?.and_then(|v| parse_exif_datetime(&v)))
    }
}

/// Arguments for one write, without the file path.
pub fn write_args(request: &WriteRequest) -> Vec<String> {
    let date = request.date.format(EXIF_DATE_FORMAT).to_string();
    let mut args = vec![
        "-overwrite_original".to_string(),
        "-ignoreMinorErrors".to_string(),
        format!("-DateTimeOriginal={}", date),
        format!("-CreateDate={}", date),
        format!("-ModifyDate={}", date),
    ];

    if let Some(gps) = &request.gps {
        let lat_ref = if gps.latitude < 0.0 { "S" } else { "N" };
        let lon_ref = if gps.longitude < 0.0 { "W" } else { "E" };
        args.push(format!("-GPSLatitude={}", gps.latitude.abs()));
        args.push(format!("-GPSLatitudeRef={}", lat_ref));
        args.push(format!("-GPSLongitude={}", gps.longitude.abs()));
        args.push(format!("-GPSLongitudeRef={}", lon_ref));
    }

    if let Some(description) = &request.description {
        let tag = match request.kind {
            MediaKind::Video => "Description",
            MediaKind::Image | MediaKind::Other => "ImageDescription",
        };
        args.push(format!("-{}={}", tag, description));
    }

    args
}

/// exiftool stderr split into benign warnings and hard errors.
#[derive(Debug, Default, PartialEq)]
pub struct StderrReport {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

pub fn classify_stderr(stderr: &str) -> StderrReport {
    let mut report = StderrReport::default();
    for line in stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let benign = BENIGN_MARKERS.iter().any(|m| line.contains(m));
        if line.starts_with("Error") && !benign {
            report.errors.push(line.to_string());
        } else {
            report.warnings.push(line.to_string());
        }
    }
    report
}

/// Lenient EXIF datetime parse: separators vary between writers.
pub fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let cleaned = s
        .trim()
        .replace('-', ":")
        .replace('/', ":")
        .replace('T', " ");
    // Drop subseconds / zone suffixes ("+09:00", ".123", "Z")
    let head: String = cleaned.chars().take(19).collect();
    NaiveDateTime::parse_from_str(&head, EXIF_DATE_FORMAT).ok()
}

fn set_file_mtime(path: &Path, date: &NaiveDateTime) -> std::io::Result<()> {
    let Some(local) = date.and_local_timezone(chrono::Local).earliest() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} does not exist in local time", date),
        ));
    };
    let ft = filetime::FileTime::from_unix_time(local.timestamp(), 0);
    filetime::set_file_mtime(path, ft)
}

fn drain(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

/// exiftool would read a leading '-' as an option.
fn path_arg(path: &Path) -> PathBuf {
    if path.as_os_str().to_string_lossy().starts_with('-') {
        Path::new(".").join(path)
    } else {
        path.to_path_buf()
    }
}
