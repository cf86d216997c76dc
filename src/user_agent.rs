//! User-Agent string for archive requests.

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/gharchive-fetcher";

/// Default User-Agent for archive downloads (identifies the tool).
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("gharchive-fetcher/{version} (archive-mirror; +{PROJECT_UA_URL})")
}
