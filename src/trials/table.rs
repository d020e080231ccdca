use super::TrialRecord;
use crate::config::{DETAIL_PATH, PAGE_SIZE};
use crate::utils::element_text;
use lazy_regex::regex;
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, error, info, warn};

const E: &str = "Invalid selector";
lazy_static! {
    static ref SEARCH_TABLE: Selector = Selector::parse("table.searchTable").expect(E);
    static ref TR: Selector = Selector::parse("tr").expect(E);
    static ref TH: Selector = Selector::parse("th").expect(E);
    static ref TD: Selector = Selector::parse("td").expect(E);
    static ref A: Selector = Selector::parse("a").expect(E);
    static ref PAGE_INFO: Selector = Selector::parse("div.pageInfo").expect(E);
    static ref PAGINATION_LINKS: Selector = Selector::parse("ul.pagination li a").expect(E);
}

fn anchor_text(cell: &ElementRef) -> String {
    cell.select(&A)
        .next()
        .map(|a| element_text(&a))
        .unwrap_or_default()
}

/// Parses every well-formed row of the results table. Rows with fewer than
/// six cells are skipped.
pub fn extract_trials(doc: &Html, base_url: &str) -> Vec<TrialRecord> {
    let Some(table) = doc.select(&SEARCH_TABLE).next() else {
        error!("Results table not found");
        return vec![];
    };

    let rows = table.select(&TR).collect::<Vec<_>>();
    if rows.len() <= 1 {
        warn!("Results table has no data rows");
        return vec![];
    }

    let headers = rows[0]
        .select(&TH)
        .map(|th| element_text(&th))
        .collect::<Vec<_>>();
    debug!("Table headers: {:?}", headers);

    let mut trials = vec![];
    for row in &rows[1..] {
        let cells = row.select(&TD).collect::<Vec<_>>();
        if cells.len() < 6 {
            continue;
        }

        let (reg_no, trial_id) = match cells[1].select(&A).next() {
            Some(a) => (
                element_text(&a),
                a.value().attr("id").unwrap_or_default().to_string(),
            ),
            None => (String::new(), String::new()),
        };
        let detail_url = if trial_id.is_empty() {
            String::new()
        } else {
            format!("{}{}?id={}", base_url, DETAIL_PATH, trial_id)
        };

        trials.push(TrialRecord {
            seq: element_text(&cells[0]),
            reg_no,
            status: anchor_text(&cells[2]),
            drug_name: anchor_text(&cells[3]),
            indication: anchor_text(&cells[4]),
            title: anchor_text(&cells[5]),
            detail_url,
            trial_id,
            ..Default::default()
        });
    }

    trials
}

/// Case-insensitive substring match of any keyword against all field values.
/// An empty keyword list matches everything.
pub fn matches_keywords<S: AsRef<str>>(trial: &TrialRecord, keywords: &[S]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let text = trial.searchable_text().to_lowercase();
    keywords
        .iter()
        .any(|k| text.contains(&k.as_ref().to_lowercase()))
}

pub fn filter_trials<S: AsRef<str>>(trials: Vec<TrialRecord>, keywords: &[S]) -> Vec<TrialRecord> {
    trials
        .into_iter()
        .filter(|t| matches_keywords(t, keywords))
        .collect()
}

pub fn extract_filtered<S: AsRef<str>>(
    doc: &Html,
    base_url: &str,
    keywords: &[S],
) -> Vec<TrialRecord> {
    let trials = filter_trials(extract_trials(doc, base_url), keywords);
    info!("Extracted {} trials from table", trials.len());
    trials
}

/// Total number of result pages.
///
/// Tried in order: the `共 N 页` text of the page info block, the highest page
/// referenced by the pagination control, an estimate from the row count. Falls
/// back to a single page.
pub fn total_pages(doc: &Html) -> u32 {
    if let Some(info) = doc.select(&PAGE_INFO).next() {
        let text = info.text().collect::<String>();
        if let Some(n) = regex!(r"共\s*(\d+)\s*页")
            .captures(&text)
            .and_then(|c| c[1].parse::<u32>().ok())
        {
            info!("Total pages from page info: {}", n);
            return n;
        }
    }

    let max_page = doc
        .select(&PAGINATION_LINKS)
        .filter_map(|a| {
            let text = element_text(&a);
            if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
                text.parse::<u32>().ok()
            } else {
                a.value()
                    .attr("onclick")
                    .and_then(|onclick| regex!(r"gotopage\(\s*(\d+)\s*\)").captures(onclick))
                    .and_then(|c| c[1].parse::<u32>().ok())
            }
        })
        .max();
    if let Some(n) = max_page {
        info!("Total pages from pagination control: {}", n);
        return n;
    }

    if let Some(table) = doc.select(&SEARCH_TABLE).next() {
        let rows = table.select(&TR).count();
        if rows > 1 {
            let estimated = ((rows - 1 + PAGE_SIZE - 1) / PAGE_SIZE).max(1) as u32;
            info!("Total pages estimated from row count: {}", estimated);
            return estimated;
        }
    }

    warn!("Could not determine total pages, assuming 1");
    1
}
