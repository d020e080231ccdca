use crate::session::{SearchQuery, Session, Transport};
use crate::store::OutputStore;
use crate::trials::{
    extract_trials, filter_trials, total_pages, DetailExtractor, DetailRecord, DetailResult,
    TrialRecord,
};
use scraper::Html;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Drives the registry session page by page and trial by trial, archiving
/// every page it fetches.
pub struct TrialCrawler<T: Transport> {
    session: Session<T>,
    store: OutputStore,
    last_request: Mutex<Option<Instant>>,
}

impl<T: Transport> TrialCrawler<T> {
    pub fn new(session: Session<T>, store: OutputStore) -> Self {
        TrialCrawler {
            session,
            store,
            last_request: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    /// Waits out the configured delay since the previous network request.
    async fn pace(&self) {
        let mut last_request = self.last_request.lock().await;
        let delay = self.session.config().request_delay;
        if let Some(last) = last_request.take() {
            let elapsed = Instant::now().duration_since(last);
            if elapsed < delay {
                tokio::time::sleep(delay - elapsed).await;
            }
        }
        last_request.replace(Instant::now());
    }

    async fn page_html(&self, query: &SearchQuery, page: u32) -> Option<String> {
        let config = self.session.config();
        if config.use_local_files {
            if let Some(html) = self.store.load_page(page).await {
                info!("Using archived page {}", self.store.page_path(page).display());
                return Some(html);
            }
        }

        self.pace().await;
        let html = match self.session.search_page(query, page).await {
            Ok(html) => html,
            Err(e) => {
                error!("Failed to fetch page {}: {}", page, e);
                return None;
            }
        };

        if let Err(e) = self.store.save_page(page, &html).await {
            warn!("Could not archive page {}: {}", page, e);
        }
        if config.debug {
            if let Err(e) = self.store.save_page_timestamped(page, &html).await {
                warn!("Could not archive page {}: {}", page, e);
            }
        }
        Some(html)
    }

    /// Crawls every results page for `query` and keeps the trials matching
    /// `filters`.
    ///
    /// Stops at the page count reported by the first page (capped by
    /// `max_pages`), at the first page that cannot be fetched, or at the first
    /// page with no trial matching `filters`.
    pub async fn search_all_pages<S: AsRef<str>>(
        &self,
        query: &SearchQuery,
        filters: &[S],
    ) -> Vec<TrialRecord> {
        let config = self.session.config();
        let base_url = config.base_url.as_str();

        let Some(html) = self.page_html(query, 1).await else {
            error!("Could not load the first results page");
            return vec![];
        };

        let (rows, mut total) = {
            let doc = Html::parse_document(&html);
            (extract_trials(&doc, base_url), total_pages(&doc))
        };
        let mut all_trials = filter_trials(rows, filters);
        info!("Page 1: {} matching trials", all_trials.len());

        if let Some(max_pages) = config.max_pages {
            if max_pages < total {
                info!("Limiting crawl to {} pages", max_pages);
                total = max_pages;
            }
        }
        if !config.auto_all_pages {
            info!("Automatic pagination disabled, only page 1 is crawled");
            total = 1;
        }
        info!("Found {} pages of results", total);

        for page in 2..=total {
            info!("Searching page {}/{}", page, total);

            let Some(html) = self.page_html(query, page).await else {
                error!("Could not load page {}, stopping", page);
                break;
            };

            let rows = {
                let doc = Html::parse_document(&html);
                extract_trials(&doc, base_url)
            };
            let page_trials = filter_trials(rows, filters);
            if page_trials.is_empty() {
                warn!("Page {} has no matching trials, stopping", page);
                break;
            }

            info!("Page {}: {} matching trials", page, page_trials.len());
            all_trials.extend(page_trials);
        }

        info!("Extracted {} trials in total", all_trials.len());
        all_trials
    }

    async fn detail_html(&self, trial_id: &str, ckm_index: &str) -> Option<String> {
        if self.session.config().use_local_files {
            if let Some(html) = self.store.load_detail_snapshot(trial_id).await {
                info!(
                    "Using archived detail {}",
                    self.store.detail_snapshot_path(trial_id).display()
                );
                return Some(html);
            }
        }

        self.pace().await;
        let html = match self.session.fetch_detail(trial_id, ckm_index).await {
            Ok(html) => html,
            Err(e) => {
                error!("Failed to fetch detail {}: {}", trial_id, e);
                return None;
            }
        };
        if let Err(e) = self.store.save_detail_snapshot(trial_id, &html).await {
            warn!("Could not archive detail {}: {}", trial_id, e);
        }
        Some(html)
    }

    /// Runs `extractor` over a detail page. A page missing the section the
    /// extractor needs is archived for inspection and yields an empty record.
    pub async fn extract_detail(
        &self,
        html: &str,
        extractor: &dyn DetailExtractor,
    ) -> DetailRecord {
        let result = {
            let doc = Html::parse_document(html);
            extractor.extract(&doc)
        };

        match result {
            DetailResult::Found(detail) => detail,
            DetailResult::MissingSection => {
                if let Err(e) = self.store.save_debug_page(html).await {
                    warn!("Could not archive unrecognised page: {}", e);
                }
                DetailRecord::new()
            }
        }
    }

    /// Fetches and extracts the detail page of every trial that has an id,
    /// in list order, merging key-value details into the trial.
    ///
    /// Returns the index of each trial that produced detail alongside it.
    pub async fn collect_details(
        &self,
        trials: &mut [TrialRecord],
        extractor: &dyn DetailExtractor,
        ckm_index: &str,
    ) -> Vec<(usize, DetailRecord)> {
        let total = trials.len();
        let mut details = vec![];

        for (i, trial) in trials.iter_mut().enumerate() {
            if trial.trial_id.is_empty() {
                warn!("Trial {} has no id, skipping", i + 1);
                continue;
            }
            info!("Processing trial {}/{}: {}", i + 1, total, trial.reg_no);

            let Some(html) = self.detail_html(&trial.trial_id, ckm_index).await else {
                continue;
            };

            let detail = self.extract_detail(&html, extractor).await;
            if detail.is_empty() {
                error!("No detail extracted for {}", trial.reg_no);
                continue;
            }
            trial.merge_detail(&detail);
            debug!("\n{}", trial);
            details.push((i, detail));
        }

        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;
    use crate::session::tests::FakeTransport;
    use crate::trials::{GenericExtractor, InvestigatorExtractor};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn results_page(total_pages: u32, rows: &[(&str, &str, &str)]) -> String {
        let mut html = String::from(
            r#"<html><body><table class="searchTable">
            <tr><th>序号</th><th>登记号</th><th>试验状态</th><th>药物名称</th><th>适应症</th><th>试验通俗题目</th></tr>"#,
        );
        for (i, (reg_no, id, indication)) in rows.iter().enumerate() {
            html.push_str(&format!(
                r#"<tr><td>{}</td><td><a id="{}">{}</a></td><td><a>进行中 招募中</a></td>
                <td><a>药物</a></td><td><a>{}</a></td><td><a>题目</a></td></tr>"#,
                i + 1,
                id,
                reg_no,
                indication
            ));
        }
        html.push_str(&format!(
            r#"</table><div class="pageInfo">当前第 <i>1</i> 页，共 <i>{}</i> 页</div></body></html>"#,
            total_pages
        ));
        html
    }

    fn crawler(
        tmp: &TempDir,
        responses: Vec<(u16, String)>,
        tweak: impl FnOnce(&mut CrawlConfig),
    ) -> TrialCrawler<FakeTransport> {
        let mut config = CrawlConfig {
            output_dir: tmp.path().to_path_buf(),
            detail_dir: tmp.path().join("details"),
            request_delay: Duration::ZERO,
            ..Default::default()
        };
        tweak(&mut config);
        let store = OutputStore::new(&config.output_dir, &config.detail_dir);
        let session = Session::new(FakeTransport::with_responses(responses), config);
        TrialCrawler::new(session, store)
    }

    fn requested_pages(c: &TrialCrawler<FakeTransport>) -> Vec<String> {
        c.session()
            .transport()
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, _, form)| {
                form.iter()
                    .find(|(k, _)| *k == "currentpage")
                    .map(|(_, v)| v.clone())
            })
            .collect()
    }

    const NO_FILTER: [&str; 0] = [];

    #[tokio::test]
    async fn test_requests_exactly_total_pages() {
        let tmp = TempDir::new().unwrap();
        let c = crawler(
            &tmp,
            vec![
                (200, results_page(3, &[("CTR1", "a1", "实体瘤")])),
                (200, results_page(3, &[("CTR2", "a2", "胰腺癌")])),
                (202, results_page(3, &[("CTR3", "a3", "肺癌")])),
                (200, results_page(3, &[("CTR4", "a4", "肺癌")])),
            ],
            |_| {},
        );

        let trials = c
            .search_all_pages(&SearchQuery::new("KRAS"), &NO_FILTER)
            .await;
        assert_eq!(
            trials.iter().map(|t| t.reg_no.as_str()).collect::<Vec<_>>(),
            vec!["CTR1", "CTR2", "CTR3"]
        );
        assert_eq!(requested_pages(&c), vec!["1", "2", "3"]);
        assert!(tmp.path().join("response_page_3.html").is_file());
    }

    #[tokio::test]
    async fn test_filters_apply_per_page() {
        let tmp = TempDir::new().unwrap();
        let c = crawler(
            &tmp,
            vec![
                (200, results_page(2, &[("CTR1", "a1", "实体瘤"), ("CTR2", "a2", "肺癌")])),
                (200, results_page(2, &[("CTR3", "a3", "肺癌"), ("CTR4", "a4", "胰腺癌")])),
            ],
            |_| {},
        );

        let trials = c
            .search_all_pages(&SearchQuery::new("KRAS"), &["胰腺癌", "实体瘤"])
            .await;
        assert_eq!(
            trials.iter().map(|t| t.reg_no.as_str()).collect::<Vec<_>>(),
            vec!["CTR1", "CTR4"]
        );
    }

    #[tokio::test]
    async fn test_empty_page_ends_crawl() {
        let tmp = TempDir::new().unwrap();
        let c = crawler(
            &tmp,
            vec![
                (200, results_page(5, &[("CTR1", "a1", "实体瘤")])),
                (200, results_page(5, &[])),
                (200, results_page(5, &[("CTR3", "a3", "实体瘤")])),
            ],
            |_| {},
        );

        let trials = c
            .search_all_pages(&SearchQuery::new("KRAS"), &NO_FILTER)
            .await;
        assert_eq!(trials.len(), 1);
        assert_eq!(requested_pages(&c), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_page_without_matches_ends_crawl() {
        let tmp = TempDir::new().unwrap();
        let c = crawler(
            &tmp,
            vec![
                (200, results_page(3, &[("CTR1", "a1", "胰腺癌")])),
                (200, results_page(3, &[("CTR2", "a2", "肺癌")])),
                (200, results_page(3, &[("CTR3", "a3", "胰腺癌")])),
            ],
            |_| {},
        );

        let trials = c
            .search_all_pages(&SearchQuery::new("KRAS"), &["胰腺癌"])
            .await;
        assert_eq!(
            trials.iter().map(|t| t.reg_no.as_str()).collect::<Vec<_>>(),
            vec!["CTR1"]
        );
        assert_eq!(requested_pages(&c), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_failed_page_ends_crawl() {
        let tmp = TempDir::new().unwrap();
        let c = crawler(
            &tmp,
            vec![
                (200, results_page(4, &[("CTR1", "a1", "实体瘤")])),
                (500, String::new()),
                (200, results_page(4, &[("CTR3", "a3", "实体瘤")])),
            ],
            |_| {},
        );

        let trials = c
            .search_all_pages(&SearchQuery::new("KRAS"), &NO_FILTER)
            .await;
        assert_eq!(trials.len(), 1);
        assert_eq!(c.session().transport().request_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_first_page_yields_nothing() {
        let tmp = TempDir::new().unwrap();
        let c = crawler(&tmp, vec![(403, String::new())], |_| {});

        let trials = c
            .search_all_pages(&SearchQuery::new("KRAS"), &NO_FILTER)
            .await;
        assert!(trials.is_empty());
        assert_eq!(c.session().transport().request_count(), 1);
    }

    #[tokio::test]
    async fn test_page_caps() {
        let tmp = TempDir::new().unwrap();
        let pages = (1..=4)
            .map(|i| (200, results_page(4, &[("CTR", "id", i.to_string().as_str())])))
            .collect::<Vec<_>>();

        let c = crawler(&tmp, pages.clone(), |config| config.max_pages = Some(2));
        c.search_all_pages(&SearchQuery::new("KRAS"), &NO_FILTER)
            .await;
        assert_eq!(requested_pages(&c), vec!["1", "2"]);

        let c = crawler(&tmp, pages, |config| config.auto_all_pages = false);
        c.search_all_pages(&SearchQuery::new("KRAS"), &NO_FILTER)
            .await;
        assert_eq!(requested_pages(&c), vec!["1"]);
    }

    #[tokio::test]
    async fn test_local_replay_skips_network() {
        let tmp = TempDir::new().unwrap();
        let c = crawler(
            &tmp,
            vec![(200, results_page(2, &[("CTR2", "a2", "实体瘤")]))],
            |config| config.use_local_files = true,
        );
        c.store()
            .save_page(1, &results_page(2, &[("CTR1", "a1", "实体瘤")]))
            .await
            .unwrap();

        let trials = c
            .search_all_pages(&SearchQuery::new("KRAS"), &NO_FILTER)
            .await;
        assert_eq!(
            trials.iter().map(|t| t.reg_no.as_str()).collect::<Vec<_>>(),
            vec!["CTR1", "CTR2"]
        );
        assert_eq!(requested_pages(&c), vec!["2"]);
    }

    #[tokio::test]
    async fn test_debug_keeps_timestamped_copies() {
        let tmp = TempDir::new().unwrap();
        let c = crawler(
            &tmp,
            vec![(200, results_page(1, &[("CTR1", "a1", "实体瘤")]))],
            |config| config.debug = true,
        );

        c.search_all_pages(&SearchQuery::new("KRAS"), &NO_FILTER)
            .await;
        assert!(tmp.path().join("response_page_1.html").is_file());
        let copies = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with("temp_response_page_1_") && name.ends_with(".html"))
            .count();
        assert_eq!(copies, 1);
    }

    #[tokio::test]
    async fn test_missing_investigator_section_is_archived() {
        let tmp = TempDir::new().unwrap();
        let c = crawler(&tmp, vec![], |_| {});

        let detail = c
            .extract_detail("<html><body>系统繁忙</body></html>", &InvestigatorExtractor)
            .await;
        assert!(detail.is_empty());

        let dumps = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("debug_html_"))
            .count();
        assert_eq!(dumps, 1);
    }

    #[tokio::test]
    async fn test_collect_details() {
        let tmp = TempDir::new().unwrap();
        let detail_page = std::fs::read_to_string("tests/htmls/detail_page.html").unwrap();
        let c = crawler(
            &tmp,
            vec![(200, detail_page.clone()), (500, String::new())],
            |_| {},
        );

        let mut trials = vec![
            TrialRecord {
                reg_no: "CTR1".to_string(),
                trial_id: "a1".to_string(),
                ..Default::default()
            },
            TrialRecord {
                reg_no: "CTR2".to_string(),
                ..Default::default()
            },
            TrialRecord {
                reg_no: "CTR3".to_string(),
                trial_id: "a3".to_string(),
                ..Default::default()
            },
        ];

        let details = c
            .collect_details(&mut trials, &GenericExtractor, "1")
            .await;
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].0, 0);
        assert_eq!(trials[0].extras.get("试验分期"), Some("I期"));
        // the trial keeps its own registration number
        assert_eq!(trials[0].reg_no, "CTR1");
        assert!(trials[2].extras.is_empty());

        let requests = c.session().transport().requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].1.ends_with("/clinicaltrials.searchlistdetail.dhtml"));
        assert_eq!(requests[0].2[0], ("id", "a1".to_string()));
        assert_eq!(requests[1].2[0], ("id", "a3".to_string()));
        assert!(tmp.path().join("trial_detail_a1.html").is_file());
    }

    #[tokio::test]
    async fn test_local_detail_replay_skips_network() {
        let tmp = TempDir::new().unwrap();
        let detail_page = std::fs::read_to_string("tests/htmls/detail_page.html").unwrap();
        let c = crawler(&tmp, vec![], |config| config.use_local_files = true);
        c.store()
            .save_detail_snapshot("a1", &detail_page)
            .await
            .unwrap();

        let mut trials = vec![TrialRecord {
            reg_no: "CTR1".to_string(),
            trial_id: "a1".to_string(),
            ..Default::default()
        }];
        let details = c
            .collect_details(&mut trials, &GenericExtractor, "1")
            .await;
        assert_eq!(details.len(), 1);
        assert_eq!(trials[0].extras.get("试验分期"), Some("I期"));
        assert_eq!(c.session().transport().request_count(), 0);
    }
}
