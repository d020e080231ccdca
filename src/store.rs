use crate::{utils, CrawlerError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Everything the crawler writes to disk: raw HTML snapshots, debug dumps,
/// per-trial Markdown files and reports.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
    detail_dir: PathBuf,
}

impl OutputStore {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(root: P, detail_dir: Q) -> Self {
        OutputStore {
            root: root.into(),
            detail_dir: detail_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn detail_dir(&self) -> &Path {
        &self.detail_dir
    }

    async fn write(&self, path: &Path, content: &str) -> Result<(), CrawlerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
                info!("Created directory {}", parent.display());
            }
        }
        fs::write(path, content).await?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    async fn read(&self, path: &Path) -> Option<String> {
        fs::read_to_string(path).await.ok()
    }

    pub fn page_path(&self, page: u32) -> PathBuf {
        self.root.join(format!("response_page_{}.html", page))
    }

    pub fn detail_snapshot_path(&self, trial_id: &str) -> PathBuf {
        self.root.join(format!("trial_detail_{}.html", trial_id))
    }

    pub fn detail_markdown_path(&self, reg_no: &str) -> PathBuf {
        self.detail_dir.join(format!("{}_detail.md", reg_no))
    }

    pub async fn save_page(&self, page: u32, html: &str) -> Result<(), CrawlerError> {
        self.write(&self.page_path(page), html).await
    }

    /// Extra copy of a page named with the fetch time, so reruns can be compared.
    pub async fn save_page_timestamped(&self, page: u32, html: &str) -> Result<(), CrawlerError> {
        let secs = utils::get_now().timestamp();
        let path = self
            .root
            .join(format!("temp_response_page_{}_{}.html", page, secs));
        self.write(&path, html).await
    }

    pub async fn load_page(&self, page: u32) -> Option<String> {
        self.read(&self.page_path(page)).await
    }

    pub async fn save_detail_snapshot(
        &self,
        trial_id: &str,
        html: &str,
    ) -> Result<(), CrawlerError> {
        self.write(&self.detail_snapshot_path(trial_id), html).await
    }

    pub async fn load_detail_snapshot(&self, trial_id: &str) -> Option<String> {
        self.read(&self.detail_snapshot_path(trial_id)).await
    }

    /// Keeps a page the extractor could not make sense of. Dumps made within
    /// the same second get a numeric suffix.
    pub async fn save_debug_page(&self, html: &str) -> Result<PathBuf, CrawlerError> {
        let stamp = utils::timestamp(&utils::get_now());
        let mut path = self.root.join(format!("debug_html_{}.html", stamp));
        let mut n = 1;
        while path.exists() {
            path = self.root.join(format!("debug_html_{}_{}.html", stamp, n));
            n += 1;
        }
        self.write(&path, html).await?;
        warn!("Saved unrecognised page to {}", path.display());
        Ok(path)
    }

    pub async fn save_detail_markdown(
        &self,
        reg_no: &str,
        markdown: &str,
    ) -> Result<PathBuf, CrawlerError> {
        let path = self.detail_markdown_path(reg_no);
        self.write(&path, markdown).await?;
        Ok(path)
    }

    pub async fn load_detail_markdown(&self, reg_no: &str) -> Option<String> {
        self.read(&self.detail_markdown_path(reg_no)).await
    }

    pub async fn save_report(&self, name: &str, markdown: &str) -> Result<PathBuf, CrawlerError> {
        let path = self.root.join(name);
        self.write(&path, markdown).await?;
        info!("Saved report {}", path.display());
        Ok(path)
    }

    pub async fn save_detail_report(
        &self,
        name: &str,
        markdown: &str,
    ) -> Result<PathBuf, CrawlerError> {
        let path = self.detail_dir.join(name);
        self.write(&path, markdown).await?;
        info!("Saved report {}", path.display());
        Ok(path)
    }

    pub async fn save_json<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<PathBuf, CrawlerError> {
        let path = self.root.join(name);
        let json = serde_json::to_string_pretty(value)?;
        self.write(&path, &json).await?;
        Ok(path)
    }
}
