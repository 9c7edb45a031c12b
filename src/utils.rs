use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use url::Url;

pub(crate) fn get_now() -> DateTime<Utc> {
    Utc::now()
}

/// Trims `value` and turns an empty result into `None`.
pub fn non_empty<S: AsRef<str>>(value: Option<S>) -> Option<String> {
    value
        .map(|v| v.as_ref().trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolves `reference` against `base`. Blank or unresolvable references give `None`.
pub fn resolve_url(base: &Url, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    base.join(reference).ok().map(String::from)
}

/// Parses an ISO-8601 timestamp. Values without an offset are read as local time.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|t| t.with_timezone(&Utc))
}
