use regex::Regex;
use std::sync::LazyLock;

static NUMBERED_SCREENSHOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)screenshot[_-]?\d+").expect("valid screenshot regex"));

/// Cheap screenshot guess from the file name alone. Needs no network.
pub fn looks_like_screenshot(file_name: &str) -> bool {
    let name = file_name.to_lowercase();
    name.contains("screenshot")
        || name.contains("screen_shot")
        || name.contains("screen shot")
        || name.starts_with("scr_")
        || NUMBERED_SCREENSHOT_RE.is_match(&name)
}
