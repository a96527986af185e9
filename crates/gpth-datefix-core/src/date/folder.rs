use chrono::{Datelike, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use super::{DateSource, DateStrategy, ResolveInput};

/// Localized Takeout year folders: "<prefix>YYYY"
const YEAR_FOLDER_PREFIXES: &[&str] = &[
    "Photos from ",      // EN
    "Fotos von ",        // DE
    "Fotos aus ",        // DE (alternate)
    "Photos de ",        // FR
    "Fotos de ",         // ES, PT, CA
    "Foto's uit ",       // NL
    "Foto dal ",         // IT
    "Foto del ",         // IT (alternate)
    "Zdjęcia z ",        // PL
    "Фото за ",          // RU
    "Фотографии за ",    // RU (alternate)
    "Fotky z ",          // CS
    "Fotografii din ",   // RO
    "Foton från ",       // SV
    "Bilder fra ",       // NO
    "Billeder fra ",     // DA
    "Valokuvat ",        // FI
    "Fényképek - ",      // HU
    "Fotoğraflar ",      // TR
];

/// Localized Takeout year folders: "YYYY<suffix>"
const YEAR_FOLDER_SUFFIXES: &[&str] = &[
    " 年の写真",   // JA
    "年のフォト",   // JA (alternate)
    "년의 사진",    // KO
    "年的照片",     // ZH-CN
    "年的相片",     // ZH-TW
];

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}$").unwrap());
static DIGIT_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());

/// Coarse fallback: a year named by an ancestor folder, pinned to Jan 1 noon.
pub struct FolderYear {
    pub min_year: i32,
    pub max_year: i32,
}

impl Default for FolderYear {
    fn default() -> Self {
        Self {
            min_year: 1990,
            max_year: chrono::Local::now().year() + 1,
        }
    }
}

impl DateStrategy for FolderYear {
    fn source(&self) -> DateSource {
        DateSource::FolderYear
    }

    fn resolve(&self, input: &ResolveInput) -> Option<NaiveDateTime> {
        let year = self.nearest_year(input.path, input.root)?;
        NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(12, 0, 0)
    }
}

impl FolderYear {
    /// Year of the closest qualifying ancestor, never looking above `root`.
    pub fn nearest_year(&self, path: &Path, root: Option<&Path>) -> Option<i32> {
        let within_root = root.filter(|r| path.starts_with(r));
        for dir in path.ancestors().skip(1) {
            if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
                if let Some(year) = self.year_in_folder_name(name) {
                    return Some(year);
                }
            }
            if within_root.map_or(false, |r| dir == r) {
                break;
            }
        }
        None
    }

    /// Takeout's localized year folders first, then any standalone 4-digit token.
    pub fn year_in_folder_name(&self, name: &str) -> Option<i32> {
        let in_range = |y: i32| (self.min_year..=self.max_year).contains(&y);

        if let Some(year) = takeout_year_folder(name) {
            if in_range(year) {
                return Some(year);
            }
        }
        // Whole digit runs only, so "IMG12345" holds no year
        DIGIT_RUN_RE
            .find_iter(name)
            .filter(|m| m.len() == 4)
            .filter_map(|m| m.as_str().parse::<i32>().ok())
            .find(|&y| in_range(y))
    }
}

/// Year of a Google Takeout year folder name ("Photos from 2023", "2023 年の写真").
pub fn takeout_year_folder(name: &str) -> Option<i32> {
    let prefixed = YEAR_FOLDER_PREFIXES
        .iter()
        .filter_map(|p| name.strip_prefix(p));
    let suffixed = YEAR_FOLDER_SUFFIXES
        .iter()
        .filter_map(|s| name.strip_suffix(s));
    prefixed
        .chain(suffixed)
        .find(|rest| YEAR_RE.is_match(rest))
        .and_then(|rest| rest.parse().ok())
}
