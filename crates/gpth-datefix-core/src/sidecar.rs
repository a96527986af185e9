use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime};
use regex::Regex;
use serde::Deserialize;
use unicode_normalization::UnicodeNormalization;

use crate::scan::is_sidecar_name;

/// Google caps the whole JSON filename (including ".json") at this many chars.
const MAX_JSON_NAME_LEN: usize = 51;

/// Localized "edited" suffixes (lowercase)
const EDITED_SUFFIXES: &[&str] = &[
    "-edited",      // EN
    "-effects",     // EN
    "-smile",       // EN
    "-mix",         // EN
    "-edytowane",   // PL
    "-bearbeitet",  // DE
    "-bewerkt",     // NL
    "-編集済み",     // JA
    "-modificato",  // IT
    "-modifié",     // FR
    "-ha editado",  // ES
    "-editat",      // CA
];

static BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((\d+)\)\.").unwrap());

/// Takeout metadata record for one media file. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarRecord {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photo_taken_time: Option<TakenTime>,
    #[serde(default)]
    pub geo_data: Option<GeoData>,
    #[serde(default)]
    pub geo_data_exif: Option<GeoData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TakenTime {
    #[serde(default)]
    pub timestamp: Option<EpochField>,
    #[serde(default)]
    pub formatted: Option<String>,
}

/// Takeout writes the epoch as a string, older exports as a number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EpochField {
    Int(i64),
    Float(f64),
    Text(String),
}

impl EpochField {
    fn seconds(&self) -> Option<i64> {
        match self {
            EpochField::Int(v) => Some(*v),
            EpochField::Float(v) if v.is_finite() => Some(*v as i64),
            EpochField::Float(_) => None,
            EpochField::Text(s) => s.trim().parse::<i64>().ok(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct GeoData {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
}

impl GeoData {
    /// Takeout fills missing locations with zeros.
    pub fn is_known(&self) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0
    }
}

impl SidecarRecord {
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Capture time in UTC. Zero, negative or unparsable values count as absent.
    pub fn taken_time(&self) -> Option<NaiveDateTime> {
        let taken = self.photo_taken_time.as_ref()?;
        let from_epoch = taken
            .timestamp
            .as_ref()
            .and_then(EpochField::seconds)
            .filter(|&s| s > 0)
            .and_then(|s| DateTime::from_timestamp(s, 0))
            .map(|dt| dt.naive_utc());
        from_epoch.or_else(|| taken.formatted.as_deref().and_then(parse_formatted))
    }

    pub fn gps(&self) -> Option<GeoData> {
        [self.geo_data_exif, self.geo_data]
            .into_iter()
            .flatten()
            .find(GeoData::is_known)
    }

    pub fn description(&self) -> Option<&str> {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// Parse the human-readable `formatted` field, always UTC.
/// "Jan 26, 2023, 8:59:29 PM UTC" and "26 Jan 2023, 20:59:29 UTC".
fn parse_formatted(s: &str) -> Option<NaiveDateTime> {
    let cleaned: String = s
        .chars()
        .map(|c| if c == '\u{202f}' || c == '\u{a0}' { ' ' } else { c })
        .filter(|&c| c != ',')
        .collect();
    let cleaned = cleaned.trim();
    let cleaned = cleaned.strip_suffix("UTC").unwrap_or(cleaned).trim();

    ["%b %d %Y %I:%M:%S %p", "%d %b %Y %H:%M:%S", "%b %d %Y %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(cleaned, fmt).ok())
}

/// Read and parse a sidecar file.
pub fn load_sidecar(path: &Path) -> anyhow::Result<SidecarRecord> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    SidecarRecord::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

/// Find the sidecar JSON for a media file in its own directory.
/// Matching is case-insensitive; a missing sidecar is not an error.
pub fn find_sidecar(media_path: &Path) -> Option<PathBuf> {
    let name = media_path.file_name()?.to_str()?;
    let dir = match media_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut candidates: Vec<(String, PathBuf)> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter_map(|entry| {
            let file_name = entry.file_name().into_string().ok()?;
            if !is_sidecar_name(&file_name) || !entry.file_type().ok()?.is_file() {
                return None;
            }
            Some((normalize(&file_name), entry.path()))
        })
        .collect();
    candidates.sort();

    match_sidecar(name, &candidates).cloned()
}

fn normalize(name: &str) -> String {
    name.nfc().collect::<String>().to_lowercase()
}

/// Pick a sidecar from `(normalized name, path)` candidates, sorted by name.
fn match_sidecar<'a>(media_name: &str, candidates: &'a [(String, PathBuf)]) -> Option<&'a PathBuf> {
    let name = normalize(media_name);

    // (variant, whether "<variant>.<anything>.json" is accepted)
    let variants: [(String, bool); 5] = [
        (name.clone(), true),
        (shorten_name(&name), false),
        (bracket_swap(&name), false),
        (remove_edited(&name), true),
        (no_extension(&name), false),
    ];

    for (variant, allow_prefix) in &variants {
        let exact = format!("{}.json", variant);
        if let Some((_, path)) = candidates.iter().find(|(n, _)| *n == exact) {
            return Some(path);
        }
        if *allow_prefix {
            let dotted = format!("{}.", variant);
            if let Some((_, path)) = candidates.iter().find(|(n, _)| n.starts_with(&dotted)) {
                return Some(path);
            }
        }
    }

    // "IMG(1).jpg" -> "IMG.jpg.supplemental-metadata(1).json"
    if let Some(caps) = BRACKET_RE.captures_iter(&name).last() {
        let whole = caps.get(0)?;
        let counter = format!("({}).json", &caps[1]);
        let base = format!("{}.{}.", &name[..whole.start()], &name[whole.end()..]);
        return candidates
            .iter()
            .find(|(n, _)| n.starts_with(&base) && n.ends_with(&counter))
            .map(|(_, p)| p);
    }

    None
}

fn shorten_name(name: &str) -> String {
    let max = MAX_JSON_NAME_LEN - ".json".len();
    name.chars().take(max).collect()
}

/// "IMG(1).jpg" -> "IMG.jpg(1)"
fn bracket_swap(name: &str) -> String {
    let Some(m) = BRACKET_RE.find_iter(name).last() else {
        return name.to_string();
    };
    let bracket = &name[m.start()..m.end() - 1];
    let mut swapped = String::with_capacity(name.len());
    swapped.push_str(&name[..m.start()]);
    swapped.push_str(&name[m.end() - 1..]);
    swapped.push_str(bracket);
    swapped
}

fn remove_edited(name: &str) -> String {
    for suffix in EDITED_SUFFIXES {
        if let Some(pos) = name.rfind(suffix) {
            let mut stripped = name.to_string();
            stripped.replace_range(pos..pos + suffix.len(), "");
            return stripped;
        }
    }
    name.to_string()
}

fn no_extension(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(h, mi, s).unwrap()
    }

    fn candidates(names: &[&str]) -> Vec<(String, PathBuf)> {
        let mut v: Vec<(String, PathBuf)> = names
            .iter()
            .map(|n| (normalize(n), PathBuf::from(n)))
            .collect();
        v.sort();
        v
    }

    #[test]
    fn test_parse_takeout_record() {
        let json = br#"{
            "title": "VID_001.mp4",
            "description": "  beach  ",
            "photoTakenTime": {"timestamp": "1674766769", "formatted": "Jan 26, 2023, 8:59:29 PM UTC"},
            "geoData": {"latitude": 0.0, "longitude": 0.0, "altitude": 0.0},
            "geoDataExif": {"latitude": 35.6586, "longitude": -139.7454, "altitude": 12.5},
            "imageViews": "3"
        }"#;
        let rec = SidecarRecord::from_slice(json).unwrap();
        assert_eq!(rec.taken_time(), Some(dt(2023, 1, 26, 20, 59, 29)));
        assert_eq!(rec.description(), Some("beach"));
        let gps = rec.gps().unwrap();
        assert_eq!(gps.latitude, 35.6586);
        assert_eq!(gps.longitude, -139.7454);
    }

    #[test]
    fn test_numeric_timestamp() {
        let rec = SidecarRecord::from_slice(br#"{"photoTakenTime": {"timestamp": 1674766769}}"#).unwrap();
        assert_eq!(rec.taken_time(), Some(dt(2023, 1, 26, 20, 59, 29)));
    }

    #[test]
    fn test_zero_or_negative_timestamp_is_absent() {
        let zero = SidecarRecord::from_slice(br#"{"photoTakenTime": {"timestamp": "0"}}"#).unwrap();
        assert_eq!(zero.taken_time(), None);
        let neg = SidecarRecord::from_slice(br#"{"photoTakenTime": {"timestamp": -5}}"#).unwrap();
        assert_eq!(neg.taken_time(), None);
        let junk = SidecarRecord::from_slice(br#"{"photoTakenTime": {"timestamp": "abc"}}"#).unwrap();
        assert_eq!(junk.taken_time(), None);
        let missing = SidecarRecord::from_slice(br#"{"title": "x"}"#).unwrap();
        assert_eq!(missing.taken_time(), None);
    }

    #[test]
    fn test_formatted_fallback() {
        let rec = SidecarRecord::from_slice(
            "{\"photoTakenTime\": {\"timestamp\": \"0\", \"formatted\": \"Jan 5, 2021, 7:03:09\u{202f}AM UTC\"}}".as_bytes(),
        )
        .unwrap();
        assert_eq!(rec.taken_time(), Some(dt(2021, 1, 5, 7, 3, 9)));

        assert_eq!(parse_formatted("26 Jan 2023, 20:39:29 UTC"), Some(dt(2023, 1, 26, 20, 39, 29)));
        assert_eq!(parse_formatted("yesterday"), None);
    }

    #[test]
    fn test_unknown_gps_is_none() {
        let rec = SidecarRecord::from_slice(
            br#"{"geoData": {"latitude": 0.0, "longitude": 0.0}, "description": ""}"#,
        )
        .unwrap();
        assert!(rec.gps().is_none());
        assert!(rec.description().is_none());
    }

    #[test]
    fn test_match_exact_and_supplemental() {
        let c = candidates(&["IMG_1.jpg.json", "IMG_2.jpg.supplemental-metadata.json"]);
        assert_eq!(match_sidecar("IMG_1.jpg", &c), Some(&PathBuf::from("IMG_1.jpg.json")));
        assert_eq!(
            match_sidecar("img_2.JPG", &c),
            Some(&PathBuf::from("IMG_2.jpg.supplemental-metadata.json"))
        );
        assert_eq!(match_sidecar("IMG_3.jpg", &c), None);
    }

    #[test]
    fn test_match_does_not_cross_to_numbered_copy() {
        let c = candidates(&["IMG_1.jpg(1).json"]);
        assert_eq!(match_sidecar("IMG_1.jpg", &c), None);
        assert_eq!(match_sidecar("IMG_1(1).jpg", &c), Some(&PathBuf::from("IMG_1.jpg(1).json")));
    }

    #[test]
    fn test_match_bracket_supplemental() {
        let c = candidates(&["IMG_1.jpg.supplemental-metadata(2).json"]);
        assert_eq!(
            match_sidecar("IMG_1(2).jpg", &c),
            Some(&PathBuf::from("IMG_1.jpg.supplemental-metadata(2).json"))
        );
    }

    #[test]
    fn test_match_edited_and_truncated() {
        let c = candidates(&["IMG_1.jpg.json", "PXL_20230126_203929123.NIGHT.Very_Long_Name_In.json"]);
        assert_eq!(match_sidecar("IMG_1-edited.jpg", &c), Some(&PathBuf::from("IMG_1.jpg.json")));
        assert_eq!(
            match_sidecar("PXL_20230126_203929123.NIGHT.Very_Long_Name_Indeed.jpg", &c),
            Some(&PathBuf::from("PXL_20230126_203929123.NIGHT.Very_Long_Name_In.json"))
        );
    }

    #[test]
    fn test_match_no_extension_variant() {
        let c = candidates(&["IMG_9.json"]);
        assert_eq!(match_sidecar("IMG_9.jpg", &c), Some(&PathBuf::from("IMG_9.json")));
    }

    #[test]
    fn test_find_and_load_from_disk() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("VID_001.mp4");
        fs::write(&media, b"x").unwrap();
        assert!(find_sidecar(&media).is_none());

        let json = dir.path().join("VID_001.mp4.supplemental-metadata.json");
        fs::write(&json, br#"{"photoTakenTime": {"timestamp": "1674766769"}}"#).unwrap();
        let found = find_sidecar(&media).unwrap();
        assert_eq!(found, json);
        let rec = load_sidecar(&found).unwrap();
        assert!(rec.taken_time().is_some());

        fs::write(&json, b"{not json").unwrap();
        assert!(load_sidecar(&json).is_err());
    }
}
