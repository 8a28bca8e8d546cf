//! Host label attached to transport metrics.

use std::{env, fs};

use once_cell::sync::Lazy;
use regex::Regex;

static HEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]+$").expect("failed creating regex"));
static ALNUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-zA-Z]+$").expect("failed creating regex"));
/// Matched at the start of the segment only; longer ids still qualify.
static INSTANCE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z|0-9]{8,17}").expect("failed creating regex"));

/// Normalise a hostname into a host type shared by every replica.
///
/// Pod names (`web-5d8f7c9b6-x2x7q`) lose their replica-set and pod
/// suffixes, instance names (`web-0a1b2c3d4e`) lose the instance id, and
/// anything else loses trailing digits (`web12` becomes `web`).
pub fn host_type(hostname: &str) -> String {
    if hostname.is_empty() {
        return String::new();
    }
    let segments: Vec<&str> = hostname.split('-').collect();
    let n = segments.len();
    if n > 2 && HEX.is_match(segments[n - 2]) && ALNUM.is_match(segments[n - 1]) {
        return segments[..n - 2].join("-");
    }
    if n > 1 && INSTANCE_ID.is_match(segments[n - 1]) {
        return segments[..n - 1].join("-");
    }
    hostname
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_owned()
}

/// Best-effort name of the local machine.
pub fn local_hostname() -> String {
    if let Ok(name) = env::var("HOSTNAME") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_owned();
        }
    }
    fs::read_to_string("/etc/hostname")
        .map(|name| name.trim().to_owned())
        .unwrap_or_default()
}
