use crate::config::{CrawlConfig, INDEX_PATH, SEARCH_PAGE_PATH, SEARCH_PATH};
use crate::CrawlerError;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,\
    image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";

pub struct Response {
    pub status: u16,
    pub url: String,
    pub body: String,
}

impl Response {
    /// The registry answers 202 for some successful searches.
    pub fn is_success(&self) -> bool {
        matches!(self.status, 200 | 202)
    }
}

pub type Form = Vec<(&'static str, String)>;

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<Response, CrawlerError>;
    async fn post_form(&self, url: &str, form: &Form) -> Result<Response, CrawlerError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    jar: Arc<Jar>,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, CrawlerError> {
        let referer = format!("{}{}", base_url, SEARCH_PATH);
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
        headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        if let Ok(origin) = HeaderValue::from_str(base_url) {
            headers.insert(header::ORIGIN, origin);
        }
        if let Ok(referer) = HeaderValue::from_str(&referer) {
            headers.insert(header::REFERER, referer);
        }

        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .cookie_provider(Arc::clone(&jar))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(HttpTransport {
            client,
            jar,
            base_url: base_url.to_string(),
        })
    }

    /// Cookie header currently held for the site, if any.
    pub fn cookies(&self) -> Option<String> {
        let url = reqwest::Url::parse(&self.base_url).ok()?;
        self.jar
            .cookies(&url)
            .and_then(|v| v.to_str().ok().map(ToString::to_string))
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Response, CrawlerError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let url = resp.url().to_string();
        let body = resp.text().await?;
        debug!("Cookies after GET {}: {:?}", url, self.cookies());
        Ok(Response { status, url, body })
    }

    async fn post_form(&self, url: &str, form: &Form) -> Result<Response, CrawlerError> {
        let resp = self.client.post(url).form(form).send().await?;
        let status = resp.status().as_u16();
        let url = resp.url().to_string();
        let body = resp.text().await?;
        Ok(Response { status, url, body })
    }
}

/// Search and secondary filters, sent with every page request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub keywords: String,
    pub indication: String,
    pub reg_no: String,
    pub state: String,
    pub drugs_name: String,
    pub ckm_index: String,
}

impl SearchQuery {
    pub fn new<S: Into<String>>(keywords: S) -> Self {
        SearchQuery {
            keywords: keywords.into(),
            ..Default::default()
        }
    }

    pub fn to_form(&self, page: u32) -> Form {
        build_form("", self, page)
    }
}

fn build_form(id: &str, query: &SearchQuery, page: u32) -> Form {
    vec![
        ("id", id.to_string()),
        ("ckm_index", query.ckm_index.clone()),
        ("sort", "desc".to_string()),
        ("sort2", String::new()),
        ("rule", "CTR".to_string()),
        ("secondLevel", "0".to_string()),
        ("currentpage", page.to_string()),
        ("keywords", query.keywords.clone()),
        ("reg_no", query.reg_no.clone()),
        ("indication", query.indication.clone()),
        ("case_no", String::new()),
        ("drugs_name", query.drugs_name.clone()),
        ("drugs_type", String::new()),
        ("appliers", String::new()),
        ("communities", String::new()),
        ("researchers", String::new()),
        ("agencies", String::new()),
        ("state", query.state.clone()),
    ]
}

/// Detail lookups reuse the search form with only `id` and `ckm_index` set.
pub fn detail_form(trial_id: &str, ckm_index: &str) -> Form {
    let query = SearchQuery {
        ckm_index: ckm_index.to_string(),
        ..Default::default()
    };
    build_form(trial_id, &query, 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootstrapVariant {
    /// GET the site root only.
    #[default]
    Root,
    /// GET the index page, then the search page.
    RootAndSearchPage,
}

/// An HTTP transport plus the registry's endpoints. Holds the cookie jar for
/// the whole run.
pub struct Session<T: Transport> {
    transport: T,
    config: CrawlConfig,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: CrawlConfig) -> Self {
        Session { transport, config }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn get_ok(&self, url: &str) -> Result<Response, CrawlerError> {
        let resp = self.transport.get(url).await?;
        info!("GET {} -> {}", url, resp.status);
        if !resp.is_success() {
            return Err(CrawlerError::Status {
                status: resp.status,
                url: url.to_string(),
            });
        }
        Ok(resp)
    }

    /// Visits the bootstrap pages so the server hands out its cookies.
    ///
    /// Callers are expected to carry on when this fails; later requests then
    /// run with whatever cookies were obtained.
    pub async fn bootstrap(&self, variant: BootstrapVariant) -> Result<(), CrawlerError> {
        info!("Bootstrapping session against {}", self.config.base_url);
        match variant {
            BootstrapVariant::Root => {
                self.get_ok(&self.config.base_url).await?;
            }
            BootstrapVariant::RootAndSearchPage => {
                self.get_ok(&format!("{}{}", self.config.base_url, INDEX_PATH))
                    .await?;
                self.get_ok(&format!("{}{}", self.config.base_url, SEARCH_PAGE_PATH))
                    .await?;
            }
        }
        Ok(())
    }

    async fn post_ok(&self, url: &str, form: &Form) -> Result<String, CrawlerError> {
        let resp = self.transport.post_form(url, form).await?;
        info!("POST {} -> {}", resp.url, resp.status);
        if !resp.is_success() {
            return Err(CrawlerError::Status {
                status: resp.status,
                url: url.to_string(),
            });
        }
        if resp.status == 202 {
            warn!("Got 202 Accepted, processing body anyway");
        }
        debug!("Response length: {} chars", resp.body.chars().count());
        Ok(resp.body)
    }

    /// Raw HTML of one results page.
    pub async fn search_page(
        &self,
        query: &SearchQuery,
        page: u32,
    ) -> Result<String, CrawlerError> {
        info!(
            page,
            keywords = %query.keywords,
            indication = %query.indication,
            reg_no = %query.reg_no,
            state = %query.state,
            drugs_name = %query.drugs_name,
            ckm_index = %query.ckm_index,
            "Searching page"
        );
        self.post_ok(&self.config.search_url(), &query.to_form(page))
            .await
    }

    /// Raw HTML of a trial's detail page.
    pub async fn fetch_detail(
        &self,
        trial_id: &str,
        ckm_index: &str,
    ) -> Result<String, CrawlerError> {
        info!("Fetching detail for trial {}", trial_id);
        self.post_ok(&self.config.detail_url(), &detail_form(trial_id, ckm_index))
            .await
    }
}
