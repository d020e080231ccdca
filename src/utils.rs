use chrono::{DateTime, Local};
use scraper::ElementRef;

pub(crate) fn get_now() -> DateTime<Local> {
    Local::now()
}

/// `20250101`, used in report file names.
pub fn date_stamp(now: &DateTime<Local>) -> String {
    now.format("%Y%m%d").to_string()
}

/// `20250101_093000`, used for debug dumps.
pub(crate) fn timestamp(now: &DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Concatenated text of an element, trimmed.
pub(crate) fn element_text(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}
