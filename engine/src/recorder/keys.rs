use chrono::{DateTime, Local};

fn fmt_ts(ts: &DateTime<Local>) -> String {
    ts.format("%Y%m%dT%H%M%S%3f").to_string()
}

fn date_str(ts: &DateTime<Local>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

/// Keep titles usable as a single path component.
fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Relative path for a committed slide.
/// e.g. "Signals/2026-02-18/slide_20260218T093000123_004.png"
pub fn slide_key(title: &str, ts: &DateTime<Local>, index: u32) -> String {
    format!(
        "{title}/{date}/slide_{stamp}_{index:03}.png",
        title = sanitize_title(title),
        date = date_str(ts),
        stamp = fmt_ts(ts),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_key_format() {
        let ts = Local.with_ymd_and_hms(2026, 2, 18, 9, 30, 0).unwrap();
        let k = slide_key("Signals", &ts, 4);
        assert_eq!(k, "Signals/2026-02-18/slide_20260218T093000000_004.png");
    }

    #[test]
    fn titles_cannot_escape_the_output_dir() {
        let ts = Local.with_ymd_and_hms(2026, 2, 18, 9, 30, 0).unwrap();
        let k = slide_key("../etc/passwd", &ts, 1);
        assert!(k.starts_with("_etc_passwd/"), "{k}");
        assert!(slide_key("  ", &ts, 1).starts_with("untitled/"));
    }
}
