//! Per-file reconciliation: sidecar lookup, extension correction, resolution,
//! metadata write and read-back verification.
//!
//! Every file ends in exactly one [`Outcome`]. Nothing here returns an error
//! to the caller; failures are scoped to the file being processed.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use serde::Serialize;

use crate::date::{ResolveInput, ResolvedDate, Resolver};
use crate::exiftool::{MetadataTool, ToolError, ToolWarnings, WriteRequest};
use crate::media::MediaFile;
use crate::sidecar::{self, SidecarRecord};

pub const NO_DATE_EVIDENCE: &str = "no date evidence";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FileError {
    #[error("unreadable sidecar {}: {message}", .path.display())]
    SidecarUnreadable { path: PathBuf, message: String },
    #[error("rename target already exists: {}", .target.display())]
    RenameConflict { target: PathBuf },
    #[error("rename to {} failed: {message}", .target.display())]
    Rename { target: PathBuf, message: String },
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("verification mismatch")]
    VerificationMismatch {
        expected: NaiveDateTime,
        actual: Option<NaiveDateTime>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Updated,
    Skipped,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Updated => "UPDATED",
            Status::Skipped => "SKIPPED",
            Status::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Updated,
    Skipped(String),
    Failed(FileError),
}

impl Outcome {
    pub fn status(&self) -> Status {
        match self {
            Outcome::Updated => Status::Updated,
            Outcome::Skipped(_) => Status::Skipped,
            Outcome::Failed(_) => Status::Failed,
        }
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            Outcome::Updated => None,
            Outcome::Skipped(reason) => Some(reason.clone()),
            Outcome::Failed(e) => Some(e.to_string()),
        }
    }
}

/// Result of processing one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    /// Final identity of the file (after any extension correction)
    pub path: PathBuf,
    /// Set when the file was renamed to match its content format
    pub renamed_from: Option<PathBuf>,
    pub resolved: ResolvedDate,
    pub outcome: Outcome,
    pub warnings: ToolWarnings,
}

impl FileReport {
    fn new(file: &MediaFile, outcome: Outcome) -> Self {
        Self {
            path: file.path.clone(),
            renamed_from: None,
            resolved: ResolvedDate::unresolved(),
            outcome,
            warnings: Vec::new(),
        }
    }

    /// `[UPDATED] <path> — <source>` or `[SKIPPED|FAILED] <path> — <reason>`
    pub fn log_line(&self) -> String {
        let note = match &self.outcome {
            Outcome::Updated => self.resolved.source.to_string(),
            other => other.reason().unwrap_or_default(),
        };
        format!("[{}] {} — {}", self.outcome.status(), self.path.display(), note)
    }
}

/// HEIC/JPEG family extensions that exiftool may find mislabeled.
fn family_canonical(ext: &str) -> Option<&'static str> {
    match ext {
        "jpg" | "jpeg" => Some("jpg"),
        "heic" | "heif" => Some("heic"),
        _ => None,
    }
}

pub struct Pipeline<'a> {
    pub tool: &'a dyn MetadataTool,
    pub resolver: &'a Resolver,
    /// Folder-year evidence is not taken from above this directory
    pub root: Option<&'a Path>,
    pub set_file_time: bool,
}

impl<'a> Pipeline<'a> {
    pub fn process_file(&self, file: &MediaFile) -> FileReport {
        let sidecar_path = sidecar::find_sidecar(&file.path);
        let sidecar = match &sidecar_path {
            Some(p) => match sidecar::load_sidecar(p) {
                Ok(record) => Some(record),
                Err(e) => {
                    let error = FileError::SidecarUnreadable {
                        path: p.clone(),
                        message: format!("{:#}", e),
                    };
                    return FileReport::new(file, Outcome::Failed(error));
                }
            },
            None => None,
        };

        let corrected = match self.correct_extension(file, sidecar_path.as_deref()) {
            Ok(corrected) => corrected,
            Err(e) => return FileReport::new(file, Outcome::Failed(e)),
        };

        let mut report = FileReport::new(&corrected, Outcome::Updated);
        if corrected.path != file.path {
            report.renamed_from = Some(file.path.clone());
        }

        let mut input = ResolveInput::new(&corrected.path).with_sidecar(sidecar.as_ref());
        if let Some(root) = self.root {
            input = input.with_root(root);
        }
        report.resolved = self.resolver.resolve(&input);

        report.outcome = match report.resolved.date {
            None => Outcome::Skipped(NO_DATE_EVIDENCE.to_string()),
            Some(date) => match self.write_and_verify(&corrected, date, sidecar.as_ref()) {
                Ok(warnings) => {
                    report.warnings = warnings;
                    Outcome::Updated
                }
                Err((e, warnings)) => {
                    report.warnings = warnings;
                    Outcome::Failed(e)
                }
            },
        };
        report
    }

    /// Rename a HEIC/JPEG whose extension disagrees with its content, before
    /// anything is written to it. The sidecar follows when its name is
    /// prefixed by the media name, so later runs still find it.
    pub fn correct_extension(
        &self,
        file: &MediaFile,
        sidecar_path: Option<&Path>,
    ) -> Result<MediaFile, FileError> {
        let Some(declared) = file.extension() else {
            return Ok(file.clone());
        };
        let Some(declared_family) = family_canonical(&declared) else {
            return Ok(file.clone());
        };

        let detected = match self.tool.detect_extension(&file.path) {
            Ok(Some(ext)) => ext,
            Ok(None) => return Ok(file.clone()),
            Err(e) => {
                warn!("{}: format detection failed: {}", file.path.display(), e);
                return Ok(file.clone());
            }
        };
        match family_canonical(&detected) {
            Some(detected_family) if detected_family != declared_family => {}
            _ => return Ok(file.clone()),
        }

        let target = file.path.with_extension(&detected);
        if target.exists() {
            return Err(FileError::RenameConflict { target });
        }
        fs::rename(&file.path, &target).map_err(|e| FileError::Rename {
            target: target.clone(),
            message: e.to_string(),
        })?;
        info!("renamed {} -> {}", file.path.display(), target.display());

        if let Some(sidecar_path) = sidecar_path {
            rename_sidecar(sidecar_path, &file.path, &target);
        }
        Ok(file.with_path(target))
    }

    fn write_and_verify(
        &self,
        file: &MediaFile,
        date: NaiveDateTime,
        sidecar: Option<&SidecarRecord>,
    ) -> Result<ToolWarnings, (FileError, ToolWarnings)> {
        let request = WriteRequest {
            date,
            gps: sidecar.and_then(SidecarRecord::gps),
            description: sidecar.and_then(|s| s.description()).map(str::to_string),
            kind: file.kind,
            set_file_time: self.set_file_time,
        };

        let warnings = self
            .tool
            .write_dates(&file.path, &request)
            .map_err(|e| (FileError::Tool(e), Vec::new()))?;
        for w in &warnings {
            warn!("{}: {}", file.path.display(), w);
        }

        let actual = match self.tool.read_original_capture(&file.path) {
            Ok(actual) => actual,
            Err(e) => return Err((FileError::Tool(e), warnings)),
        };
        if actual != Some(date) {
            debug!(
                "{}: wrote {}, read back {:?}",
                file.path.display(),
                date,
                actual
            );
            return Err((
                FileError::VerificationMismatch {
                    expected: date,
                    actual,
                },
                warnings,
            ));
        }
        Ok(warnings)
    }
}

/// Carry a sidecar along with a renamed media file. Failures are only logged.
///
/// A sidecar named `<old name>...json` is renamed to `<new name>...json`.
/// One matched through another convention (bracket swap, truncation, edited
/// suffix, no extension) may be shared with other files, so it is copied to
/// `<new name>.json` instead.
fn rename_sidecar(sidecar_path: &Path, old_media: &Path, new_media: &Path) {
    let (Some(sidecar_name), Some(old_name), Some(new_name)) = (
        sidecar_path.file_name().and_then(|n| n.to_str()),
        old_media.file_name().and_then(|n| n.to_str()),
        new_media.file_name().and_then(|n| n.to_str()),
    ) else {
        return;
    };

    let prefixed = sidecar_name
        .get(..old_name.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(old_name));
    let new_sidecar = if prefixed {
        sidecar_path.with_file_name(format!("{}{}", new_name, &sidecar_name[old_name.len()..]))
    } else {
        sidecar_path.with_file_name(format!("{}.json", new_name))
    };

    if new_sidecar.exists() {
        warn!("sidecar {} already exists, leaving {}", new_sidecar.display(), sidecar_path.display());
        return;
    }
    let result = if prefixed {
        fs::rename(sidecar_path, &new_sidecar)
    } else {
        fs::copy(sidecar_path, &new_sidecar).map(|_| ())
    };
    if let Err(e) = result {
        warn!("could not carry sidecar {} to {}: {}", sidecar_path.display(), new_sidecar.display(), e);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::date::{DateSource, TimeBasis};
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(h, mi, s).unwrap()
    }

    /// In-memory stand-in for exiftool.
    #[derive(Default)]
    pub(crate) struct FakeTool {
        pub stored: Mutex<HashMap<PathBuf, NaiveDateTime>>,
        pub requests: Mutex<Vec<(PathBuf, WriteRequest)>>,
        /// Content format by file name
        pub formats: HashMap<String, String>,
        /// Read-back always returns this instead of what was written
        pub forced_read: Option<NaiveDateTime>,
        pub write_error: Option<ToolError>,
        pub write_warnings: ToolWarnings,
    }

    impl MetadataTool for FakeTool {
        fn detect_extension(&self, path: &Path) -> Result<Option<String>, ToolError> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if let Some(ext) = self.formats.get(&name) {
                return Ok(Some(ext.clone()));
            }
            Ok(path.extension().map(|e| e.to_string_lossy().to_lowercase()))
        }

        fn write_dates(&self, path: &Path, request: &WriteRequest) -> Result<ToolWarnings, ToolError> {
            if let Some(e) = &self.write_error {
                return Err(e.clone());
            }
            self.requests.lock().unwrap().push((path.to_path_buf(), request.clone()));
            self.stored.lock().unwrap().insert(path.to_path_buf(), request.date);
            Ok(self.write_warnings.clone())
        }

        fn read_original_capture(&self, path: &Path) -> Result<Option<NaiveDateTime>, ToolError> {
            if self.forced_read.is_some() {
                return Ok(self.forced_read);
            }
            Ok(self.stored.lock().unwrap().get(path).copied())
        }
    }

    fn run(tool: &FakeTool, root: &Path, file: &Path) -> FileReport {
        let resolver = Resolver::standard(TimeBasis::Utc, true);
        let pipeline = Pipeline {
            tool,
            resolver: &resolver,
            root: Some(root),
            set_file_time: true,
        };
        pipeline.process_file(&MediaFile::from_path(file))
    }

    fn touch(path: &Path, contents: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_filename_date_updated() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("Photos from 2023/IMG_20230126_203929.jpg");
        touch(&file, b"jpeg");

        let tool = FakeTool::default();
        let report = run(&tool, dir.path(), &file);
        assert_eq!(report.outcome, Outcome::Updated);
        assert_eq!(report.resolved.source, DateSource::Filename);
        assert_eq!(report.resolved.date, Some(dt(2023, 1, 26, 20, 39, 29)));
        assert!(report.log_line().starts_with("[UPDATED] "));
        assert!(report.log_line().ends_with(" — filename"));

        let requests = tool.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].1.set_file_time);
        assert!(requests[0].1.gps.is_none());
    }

    #[test]
    fn test_sidecar_date_with_gps_and_description() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("VID_001.mp4");
        touch(&file, b"mp4");
        touch(
            &dir.path().join("VID_001.mp4.json"),
            br#"{"photoTakenTime": {"timestamp": "1674766769"},
                "geoData": {"latitude": 48.8584, "longitude": 2.2945},
                "description": "tower"}"#,
        );

        let tool = FakeTool::default();
        let report = run(&tool, dir.path(), &file);
        assert_eq!(report.outcome, Outcome::Updated);
        assert_eq!(report.resolved.source, DateSource::Json);
        assert_eq!(report.resolved.date, Some(dt(2023, 1, 26, 20, 59, 29)));

        let requests = tool.requests.lock().unwrap();
        let req = &requests[0].1;
        assert_eq!(req.gps.unwrap().latitude, 48.8584);
        assert_eq!(req.description.as_deref(), Some("tower"));
    }

    #[test]
    fn test_no_evidence_is_skipped_without_write() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("Trip/IMG_0001.jpg");
        touch(&file, b"jpeg");

        let tool = FakeTool::default();
        let report = run(&tool, dir.path(), &file);
        assert_eq!(report.outcome, Outcome::Skipped(NO_DATE_EVIDENCE.to_string()));
        assert_eq!(report.resolved.source, DateSource::None);
        assert!(tool.requests.lock().unwrap().is_empty());
        assert!(report.log_line().ends_with(" — no date evidence"));
    }

    #[test]
    fn test_verification_mismatch_fails() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("IMG_20230126_203929.jpg");
        touch(&file, b"jpeg");

        let tool = FakeTool {
            forced_read: Some(dt(1999, 1, 1, 0, 0, 0)),
            ..Default::default()
        };
        let report = run(&tool, dir.path(), &file);
        assert!(matches!(
            report.outcome,
            Outcome::Failed(FileError::VerificationMismatch { .. })
        ));
        assert_eq!(report.outcome.reason().as_deref(), Some("verification mismatch"));
    }

    #[test]
    fn test_tool_error_fails_with_its_text() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("IMG_20230126_203929.jpg");
        touch(&file, b"jpeg");

        let tool = FakeTool {
            write_error: Some(ToolError::Failed("Error: File format error - x.jpg".to_string())),
            ..Default::default()
        };
        let report = run(&tool, dir.path(), &file);
        assert_eq!(report.outcome.status(), Status::Failed);
        assert_eq!(report.outcome.reason().as_deref(), Some("Error: File format error - x.jpg"));

        let tool = FakeTool {
            write_error: Some(ToolError::Timeout(60)),
            ..Default::default()
        };
        let report = run(&tool, dir.path(), &file);
        assert_eq!(report.outcome.reason().as_deref(), Some("timed out after 60s"));
    }

    #[test]
    fn test_benign_warnings_still_update() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("IMG_20230126_203929.jpg");
        touch(&file, b"jpeg");

        let tool = FakeTool {
            write_warnings: vec!["Warning: [minor] Bad MakerNotes offset".to_string()],
            ..Default::default()
        };
        let report = run(&tool, dir.path(), &file);
        assert_eq!(report.outcome, Outcome::Updated);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_unreadable_sidecar_fails() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("IMG_20230126_203929.jpg");
        touch(&file, b"jpeg");
        touch(&dir.path().join("IMG_20230126_203929.jpg.json"), b"{broken");

        let tool = FakeTool::default();
        let report = run(&tool, dir.path(), &file);
        assert!(matches!(
            report.outcome,
            Outcome::Failed(FileError::SidecarUnreadable { .. })
        ));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("VID_001.mp4");
        touch(&file, b"mp4");
        touch(
            &dir.path().join("VID_001.mp4.supplemental-metadata.json"),
            br#"{"photoTakenTime": {"timestamp": "1674766769"}}"#,
        );

        let tool = FakeTool::default();
        let first = run(&tool, dir.path(), &file);
        let second = run(&tool, dir.path(), &file);
        assert_eq!(first.outcome, Outcome::Updated);
        assert_eq!(second.outcome, Outcome::Updated);
        assert_eq!(first.resolved, second.resolved);
    }

    #[test]
    fn test_heic_that_is_jpeg_is_renamed_with_sidecar() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("IMG_1234.HEIC");
        touch(&file, b"jpeg really");
        touch(
            &dir.path().join("IMG_1234.HEIC.supplemental-metadata.json"),
            br#"{"photoTakenTime": {"timestamp": "1674766769"}}"#,
        );

        let mut tool = FakeTool::default();
        tool.formats.insert("IMG_1234.HEIC".to_string(), "jpg".to_string());
        let report = run(&tool, dir.path(), &file);

        let renamed = dir.path().join("IMG_1234.jpg");
        assert_eq!(report.outcome, Outcome::Updated);
        assert_eq!(report.path, renamed);
        assert_eq!(report.renamed_from, Some(file.clone()));
        assert!(renamed.exists());
        assert!(!file.exists());
        assert!(dir.path().join("IMG_1234.jpg.supplemental-metadata.json").exists());
        assert_eq!(tool.requests.lock().unwrap()[0].0, renamed);

        // The renamed file and its sidecar are found again on the next run
        let again = run(&tool, dir.path(), &renamed);
        assert_eq!(again.outcome, Outcome::Updated);
        assert_eq!(again.resolved.source, DateSource::Json);
        assert!(again.renamed_from.is_none());
    }

    #[test]
    fn test_bracket_sidecar_follows_renamed_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("IMG(1).HEIC");
        touch(&file, b"jpeg really");
        let sidecar = dir.path().join("IMG.HEIC(1).json");
        touch(&sidecar, br#"{"photoTakenTime": {"timestamp": "1674766769"}}"#);

        let mut tool = FakeTool::default();
        tool.formats.insert("IMG(1).HEIC".to_string(), "jpg".to_string());
        let first = run(&tool, dir.path(), &file);

        let renamed = dir.path().join("IMG(1).jpg");
        assert_eq!(first.outcome, Outcome::Updated);
        assert_eq!(first.path, renamed);
        assert_eq!(first.resolved.source, DateSource::Json);
        assert!(dir.path().join("IMG(1).jpg.json").exists());
        assert!(sidecar.exists());

        let again = run(&tool, dir.path(), &renamed);
        assert_eq!(again.outcome, Outcome::Updated);
        assert_eq!(again.resolved, first.resolved);
    }

    #[test]
    fn test_shared_sidecar_is_copied_not_moved() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("IMG_5000.HEIC");
        touch(&file, b"jpeg really");
        touch(&dir.path().join("IMG_5000.MP4"), b"mp4");
        let sidecar = dir.path().join("IMG_5000.json");
        touch(&sidecar, br#"{"photoTakenTime": {"timestamp": "1674766769"}}"#);

        let mut tool = FakeTool::default();
        tool.formats.insert("IMG_5000.HEIC".to_string(), "jpg".to_string());
        let report = run(&tool, dir.path(), &file);
        assert_eq!(report.outcome, Outcome::Updated);
        assert!(dir.path().join("IMG_5000.jpg.json").exists());

        // The live-photo video still finds its sidecar
        let video = run(&tool, dir.path(), &dir.path().join("IMG_5000.MP4"));
        assert_eq!(video.resolved.source, DateSource::Json);
    }

    #[test]
    fn test_rename_conflict_fails_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("IMG_20230126_203929.HEIC");
        touch(&file, b"jpeg really");
        touch(&dir.path().join("IMG_20230126_203929.jpg"), b"other");

        let mut tool = FakeTool::default();
        tool.formats.insert("IMG_20230126_203929.HEIC".to_string(), "jpg".to_string());
        let report = run(&tool, dir.path(), &file);
        assert!(matches!(
            report.outcome,
            Outcome::Failed(FileError::RenameConflict { .. })
        ));
        assert!(file.exists());
        assert!(tool.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_jpeg_extension_variants_not_renamed() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("IMG_20230126_203929.JPEG");
        touch(&file, b"jpeg");

        let mut tool = FakeTool::default();
        tool.formats.insert("IMG_20230126_203929.JPEG".to_string(), "jpg".to_string());
        let report = run(&tool, dir.path(), &file);
        assert_eq!(report.outcome, Outcome::Updated);
        assert!(report.renamed_from.is_none());
        assert!(file.exists());
    }
}
