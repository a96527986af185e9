use chrono::{NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::LazyLock;

use super::{DateSource, DateStrategy, ResolveInput};

/// `YYYYMMDD_HHMMSS` anywhere in the name; trailing digits (Pixel milliseconds) are fine.
static CAMERA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?P<y>\d{4})(?P<mo>\d{2})(?P<d>\d{2})_(?P<h>\d{2})(?P<mi>\d{2})(?P<s>\d{2})").unwrap());

// Extended shapes start at a non-digit, so they never match inside a longer number.
static RE_1: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\D)(?P<y>\d{4})(?P<mo>\d{2})(?P<d>\d{2})-(?P<h>\d{2})(?P<mi>\d{2})(?P<s>\d{2})").unwrap());
static RE_2: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\D)(?P<y>\d{4})-(?P<mo>\d{2})-(?P<d>\d{2})-(?P<h>\d{2})-(?P<mi>\d{2})-(?P<s>\d{2})").unwrap());
static RE_3: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\D)(?P<y>\d{4})-(?P<mo>\d{2})-(?P<d>\d{2})-(?P<h>\d{2})(?P<mi>\d{2})(?P<s>\d{2})").unwrap());
static RE_4: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\D)(?P<y>\d{4})(?P<mo>\d{2})(?P<d>\d{2})(?P<h>\d{2})(?P<mi>\d{2})(?P<s>\d{2})").unwrap());
static RE_5: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\D)(?P<y>\d{4})_(?P<mo>\d{2})_(?P<d>\d{2})_(?P<h>\d{2})_(?P<mi>\d{2})_(?P<s>\d{2})").unwrap());

/// Screenshot, messenger and camcorder shapes, tried after `YYYYMMDD_HHMMSS`.
static EXTENDED_PATTERNS: [&LazyLock<Regex>; 5] = [&RE_1, &RE_2, &RE_3, &RE_4, &RE_5];

/// Timestamp embedded in the file name.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameTimestamp {
    /// Also accept the extended shapes
    pub extended: bool,
}

impl DateStrategy for FilenameTimestamp {
    fn source(&self) -> DateSource {
        DateSource::Filename
    }

    fn resolve(&self, input: &ResolveInput) -> Option<NaiveDateTime> {
        let name = input.path.file_name()?.to_str()?;
        if self.extended {
            guess_date_extended(name)
        } else {
            guess_date_from_filename(name)
        }
    }
}

fn basename(filename: &str) -> &str {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename)
}

/// First calendar-valid `YYYYMMDD_HHMMSS` in the base name. Impossible dates never match.
pub fn guess_date_from_filename(filename: &str) -> Option<NaiveDateTime> {
    CAMERA_RE
        .captures_iter(basename(filename))
        .find_map(|caps| to_datetime(&caps))
}

/// Like [`guess_date_from_filename`], falling back to the extended shapes.
pub fn guess_date_extended(filename: &str) -> Option<NaiveDateTime> {
    let name = basename(filename);
    guess_date_from_filename(name).or_else(|| {
        EXTENDED_PATTERNS
            .iter()
            .flat_map(|re| re.captures_iter(name))
            .find_map(|caps| to_datetime(&caps))
    })
}

fn to_datetime(caps: &Captures) -> Option<NaiveDateTime> {
    let num = |name: &str| caps.name(name)?.as_str().parse::<u32>().ok();
    let year = num("y")? as i32;
    NaiveDate::from_ymd_opt(year, num("mo")?, num("d")?)?.and_hms_opt(num("h")?, num("mi")?, num("s")?)
}
