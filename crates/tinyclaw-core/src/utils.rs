//! Small path and string helpers shared across crates.

use std::path::PathBuf;

/// The TinyClaw data directory (`~/.tinyclaw/`).
pub fn data_dir() -> PathBuf {
    home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".tinyclaw")
}

/// Default workspace path (`~/.tinyclaw/workspace/`).
pub fn default_workspace() -> PathBuf {
    data_dir().join("workspace")
}

/// Sanitize a string for use as a filename. Keeps alphanumerics, `-`, `_`
/// and `.`; everything else becomes `_`.
pub fn safe_filename(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("."));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Truncate a string to `max_len` characters, appending "..." when cut.
/// Unicode-safe.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("USERPROFILE").ok().map(PathBuf::from))
}
