use std::path::PathBuf;
use std::time::Duration;

pub const BASE_URL: &str = "http://www.chinadrugtrials.org.cn";
pub const SEARCH_PATH: &str = "/clinicaltrials.searchlist.dhtml";
pub const DETAIL_PATH: &str = "/clinicaltrials.searchlistdetail.dhtml";
pub const INDEX_PATH: &str = "/index.html";
pub const SEARCH_PAGE_PATH: &str = "/clinicaltrials.prosearch.dhtml";

/// Rows per results page, used when the page count has to be estimated.
pub const PAGE_SIZE: usize = 20;

pub const DEFAULT_STATE: &str = "进行中";
pub const DEFAULT_KEYWORD: &str = "KRAS";
pub const DEFAULT_FILTERS: [&str; 2] = ["胰腺癌", "实体瘤"];

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub base_url: String,
    pub output_dir: PathBuf,
    pub detail_dir: PathBuf,
    /// Pause between consecutive network requests.
    pub request_delay: Duration,
    pub max_pages: Option<u32>,
    pub auto_all_pages: bool,
    /// Replay archived HTML snapshots instead of hitting the network when available.
    pub use_local_files: bool,
    pub debug: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        let output_dir = PathBuf::from("output");
        CrawlConfig {
            base_url: BASE_URL.to_string(),
            detail_dir: output_dir.join("details"),
            output_dir,
            request_delay: Duration::from_secs(1),
            max_pages: None,
            auto_all_pages: true,
            use_local_files: false,
            debug: false,
        }
    }
}

impl CrawlConfig {
    pub fn search_url(&self) -> String {
        format!("{}{}", self.base_url, SEARCH_PATH)
    }

    pub fn detail_url(&self) -> String {
        format!("{}{}", self.base_url, DETAIL_PATH)
    }
}
