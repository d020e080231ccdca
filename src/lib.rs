use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub mod config;
pub mod crawler;
pub mod report;
pub mod session;
pub mod store;
pub mod trials;

mod error;
mod utils;

pub use crawler::TrialCrawler;
pub use error::CrawlerError;
pub use session::{BootstrapVariant, HttpTransport, SearchQuery, Session, Transport};
pub use store::OutputStore;
pub use utils::date_stamp;

use report::{ComprehensiveReport, DetailsIndex, DetailsSummary, TrialDetail, TrialList};
use trials::{DetailExtractor, GenericExtractor, InvestigatorExtractor, TrialRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailMode {
    /// Every key-value row on the detail page.
    Generic,
    /// Principal investigator and participating institutions.
    Investigators,
}

impl DetailMode {
    fn extractor(self) -> Box<dyn DetailExtractor> {
        match self {
            DetailMode::Generic => Box::new(GenericExtractor),
            DetailMode::Investigators => Box::new(InvestigatorExtractor),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub query: SearchQuery,
    pub filters: Vec<String>,
    /// Fetch detail pages with this strategy; `None` stops after the list.
    pub detail_mode: Option<DetailMode>,
    /// File name of the trial list, relative to the output directory.
    pub list_name: Option<String>,
    pub bootstrap: BootstrapVariant,
}

#[derive(Debug)]
pub struct RunReport {
    pub trials: usize,
    pub detailed: usize,
    pub list_path: PathBuf,
    pub reports: Vec<PathBuf>,
}

#[derive(Debug)]
pub enum RunOutcome {
    NoResults,
    Completed(RunReport),
}

fn relative_link(from: &Path, target: &Path) -> String {
    target
        .strip_prefix(from)
        .unwrap_or(target)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Bootstraps the session, crawls every results page, then optionally walks
/// the detail pages, writing the Markdown reports as it goes.
pub async fn run<T: Transport>(
    crawler: &TrialCrawler<T>,
    options: &RunOptions,
) -> Result<RunOutcome, CrawlerError> {
    if let Err(e) = crawler.session().bootstrap(options.bootstrap).await {
        warn!("Session bootstrap failed, continuing without fresh cookies: {}", e);
    }

    let mut trials = crawler
        .search_all_pages(&options.query, &options.filters)
        .await;
    if trials.is_empty() {
        return Ok(RunOutcome::NoResults);
    }

    let store = crawler.store();
    let now = utils::get_now();
    let date = date_stamp(&now);
    let keyword = options.query.keywords.as_str();

    let list_name = options
        .list_name
        .clone()
        .unwrap_or_else(|| format!("{}_{}_{}.md", date, keyword, options.filters.join("_")));
    let list = TrialList {
        keyword,
        trials: &trials,
    };
    let list_path = store.save_report(&list_name, &list.to_string()).await?;
    info!("Saved {} trials to {}", trials.len(), list_path.display());

    let mut reports = vec![];
    let mut detailed = 0;

    if let Some(mode) = options.detail_mode {
        let extractor = mode.extractor();
        let details = crawler
            .collect_details(&mut trials, extractor.as_ref(), &options.query.ckm_index)
            .await;
        detailed = details.len();

        let mut bodies = vec![];
        for (i, detail) in &details {
            let trial = &trials[*i];
            let markdown = TrialDetail { trial, detail }.to_string();
            let path = store
                .save_detail_markdown(trial.document_name(), &markdown)
                .await?;
            info!("Saved detail of {} to {}", trial.document_name(), path.display());
            bodies.push((trial, markdown));
        }

        let summary = DetailsSummary { entries: &bodies };
        reports.push(
            store
                .save_detail_report("trials_summary.md", &summary.to_string())
                .await?,
        );

        // Institution statistics come from whatever detail files are on disk,
        // including ones left by earlier runs.
        let mut docs = vec![];
        let mut detail_links = BTreeMap::new();
        let mut index_links = vec![];
        for trial in trials.iter().filter(|t| !t.trial_id.is_empty()) {
            let name = trial.document_name();
            if let Some(doc) = store.load_detail_markdown(name).await {
                let link = relative_link(store.root(), &store.detail_markdown_path(name));
                detail_links.insert(name.to_string(), link.clone());
                index_links.push((trial.title.clone(), link));
                docs.push(doc);
            }
        }
        let institutions = report::count_institutions(docs.iter().map(String::as_str));

        let comprehensive = ComprehensiveReport {
            date: now.format("%Y-%m-%d").to_string(),
            keyword,
            filters: &options.filters,
            trials: &trials,
            institutions: &institutions,
            detail_links: &detail_links,
        };
        reports.push(
            store
                .save_report(
                    &format!("{}_{}_comprehensive.md", date, keyword),
                    &comprehensive.to_string(),
                )
                .await?,
        );

        let index = DetailsIndex {
            keyword,
            filters: &options.filters,
            total: trials.len(),
            links: &index_links,
        };
        reports.push(
            store
                .save_report(&format!("{}_{}_details.md", date, keyword), &index.to_string())
                .await?,
        );
    }

    if crawler.session().config().debug {
        let records: &[TrialRecord] = &trials;
        reports.push(
            store
                .save_json(&format!("{}_{}_trials.json", date, keyword), records)
                .await?,
        );
    }

    Ok(RunOutcome::Completed(RunReport {
        trials: trials.len(),
        detailed,
        list_path,
        reports,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;
    use crate::session::tests::FakeTransport;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn crawler(tmp: &TempDir, responses: Vec<(u16, String)>) -> TrialCrawler<FakeTransport> {
        let config = CrawlConfig {
            output_dir: tmp.path().to_path_buf(),
            detail_dir: tmp.path().join("details"),
            request_delay: Duration::ZERO,
            debug: true,
            ..Default::default()
        };
        let store = OutputStore::new(&config.output_dir, &config.detail_dir);
        TrialCrawler::new(
            Session::new(FakeTransport::with_responses(responses), config),
            store,
        )
    }

    fn options(detail_mode: Option<DetailMode>) -> RunOptions {
        RunOptions {
            query: SearchQuery::new("KRAS"),
            filters: vec![],
            detail_mode,
            list_name: Some("list.md".to_string()),
            bootstrap: BootstrapVariant::Root,
        }
    }

    #[tokio::test]
    async fn test_no_results() {
        let tmp = TempDir::new().unwrap();
        // bootstrap fails, the search still runs and finds nothing
        let c = crawler(
            &tmp,
            vec![
                (500, String::new()),
                (200, "<html><body>暂无数据</body></html>".to_string()),
            ],
        );
        let outcome = run(&c, &options(None)).await.unwrap();
        assert!(matches!(outcome, RunOutcome::NoResults));
        assert_eq!(c.session().transport().request_count(), 2);
    }

    #[tokio::test]
    async fn test_full_run_with_investigators() {
        let tmp = TempDir::new().unwrap();
        let search = std::fs::read_to_string("tests/htmls/search_page.html").unwrap();
        let detail = std::fs::read_to_string("tests/htmls/detail_page.html").unwrap();
        let c = crawler(
            &tmp,
            vec![
                (200, String::new()),
                (200, search),
                // page 2 fails, the crawl ends with page 1's three trials
                (500, String::new()),
                (200, detail),
                (200, "<html><body>系统繁忙</body></html>".to_string()),
            ],
        );

        let outcome = run(&c, &options(Some(DetailMode::Investigators)))
            .await
            .unwrap();
        let RunOutcome::Completed(report) = outcome else {
            panic!("expected results");
        };
        assert_eq!(report.trials, 3);
        assert_eq!(report.detailed, 1);
        assert_eq!(report.list_path, tmp.path().join("list.md"));

        let detail_md =
            std::fs::read_to_string(tmp.path().join("details/CTR20231234_detail.md")).unwrap();
        assert!(detail_md.contains("**1. 中国医学科学院肿瘤医院**"));
        assert!(!tmp.path().join("details/CTR20240056_detail.md").exists());

        let comprehensive = report
            .reports
            .iter()
            .find(|p| p.to_string_lossy().ends_with("_comprehensive.md"))
            .expect("comprehensive report");
        let comprehensive = std::fs::read_to_string(comprehensive).unwrap();
        assert!(comprehensive.contains("| 中国医学科学院肿瘤医院 | 1 |"));
        assert!(comprehensive.contains("- [查看详细信息](details/CTR20231234_detail.md)"));

        let summary = std::fs::read_to_string(tmp.path().join("details/trials_summary.md")).unwrap();
        assert!(summary.contains("<a id='CTR20231234'></a>"));

        let index = report
            .reports
            .iter()
            .find(|p| p.to_string_lossy().ends_with("_details.md"))
            .expect("details index");
        let index = std::fs::read_to_string(index).unwrap();
        assert!(index.contains("共找到 3 个相关临床试验"));
        assert!(index.contains("- [D-1553在晚期实体瘤患者中的研究](details/CTR20231234_detail.md)\n"));

        assert!(report
            .reports
            .iter()
            .any(|p| p.to_string_lossy().ends_with("_trials.json")));
    }

    #[tokio::test]
    async fn test_rows_without_reg_no_use_trial_id() {
        let tmp = TempDir::new().unwrap();
        let row = |seq: u32, id: &str| {
            format!(
                r#"<tr><td>{}</td><td><a id="{}"></a></td><td><a>进行中</a></td>
                <td><a>药物</a></td><td><a>实体瘤</a></td><td><a>题目{}</a></td></tr>"#,
                seq, id, seq
            )
        };
        let search = format!(
            r#"<html><body><table class="searchTable">
            <tr><th>序号</th><th>登记号</th><th>试验状态</th><th>药物名称</th><th>适应症</th><th>试验通俗题目</th></tr>
            {}{}</table><div class="pageInfo">共 1 页</div></body></html>"#,
            row(1, "a1"),
            row(2, "a2")
        );
        let detail = std::fs::read_to_string("tests/htmls/detail_page.html").unwrap();
        let c = crawler(
            &tmp,
            vec![(200, String::new()), (200, search), (200, detail.clone()), (200, detail)],
        );

        let outcome = run(&c, &options(Some(DetailMode::Generic))).await.unwrap();
        let RunOutcome::Completed(report) = outcome else {
            panic!("expected results");
        };
        assert_eq!(report.detailed, 2);
        assert!(tmp.path().join("details/a1_detail.md").is_file());
        assert!(tmp.path().join("details/a2_detail.md").is_file());
        assert!(!tmp.path().join("details/_detail.md").exists());

        let summary = std::fs::read_to_string(tmp.path().join("details/trials_summary.md")).unwrap();
        assert!(summary.contains("<a id='a1'></a>"));
        assert!(summary.contains("<a id='a2'></a>"));
    }
}
