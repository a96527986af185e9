use chrono::{NaiveDateTime, TimeZone};

use super::{DateSource, DateStrategy, ResolveInput, TimeBasis};

/// `photoTakenTime` from the sidecar record.
pub struct SidecarTakenTime {
    pub basis: TimeBasis,
}

impl DateStrategy for SidecarTakenTime {
    fn source(&self) -> DateSource {
        DateSource::Json
    }

    fn resolve(&self, input: &ResolveInput) -> Option<NaiveDateTime> {
        let utc = input.sidecar?.taken_time()?;
        match self.basis {
            TimeBasis::Utc => Some(utc),
            TimeBasis::Local => Some(
                chrono::Utc
                    .from_utc_datetime(&utc)
                    .with_timezone(&chrono::Local)
                    .naive_local(),
            ),
        }
    }
}
