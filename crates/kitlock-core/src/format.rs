use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use semver::Version;

/// Current UTC instant truncated to whole seconds, the precision timestamps are stored with.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// Matches `^\d+\.\d+$`.
pub fn is_schema_version(value: &str) -> bool {
    let Some((major, minor)) = value.split_once('.') else {
        return false;
    };
    is_ascii_digits(major) && is_ascii_digits(minor)
}

/// Parses a plain `X.Y.Z` version; pre-release and build metadata are rejected.
pub fn parse_plain_version(value: &str) -> Option<Version> {
    let mut parts = value.split('.');
    let well_formed = (0..3).all(|_| parts.next().is_some_and(is_ascii_digits))
        && parts.next().is_none();
    if !well_formed {
        return None;
    }
    Version::parse(value).ok()
}

pub fn is_plain_version(version: &Version) -> bool {
    version.pre.is_empty() && version.build.is_empty()
}

/// Matches `^[a-f0-9]{7,40}$`.
pub fn is_commit_hash(value: &str) -> bool {
    (7..=40).contains(&value.len()) && value.bytes().all(is_lower_hex)
}

/// Matches `^sha256-[a-f0-9]{64}$`.
pub fn is_integrity_token(value: &str) -> bool {
    value
        .strip_prefix("sha256-")
        .is_some_and(|digest| digest.len() == 64 && digest.bytes().all(is_lower_hex))
}

fn is_ascii_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

fn is_lower_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}
