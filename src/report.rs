//! Markdown rendering of crawl results.
//!
//! Every document is a small struct implementing [`fmt::Display`]; call
//! `to_string()` to get the Markdown text.

use crate::trials::{
    DetailRecord, DetailSection, Institution, InvestigatorInfo, PrincipalInvestigator, TrialRecord,
    INVESTIGATOR_SECTION,
};
use itertools::Itertools;
use lazy_regex::regex;
use std::collections::BTreeMap;
use std::fmt;

/// Institutions listed in the comprehensive report.
pub const TOP_INSTITUTIONS: usize = 20;

const UNKNOWN_STATUS: &str = "未知";
const INSTITUTIONS_HEADING: &str = "### 参加机构";

/// Not yet recruiting first, then recruiting, then everything else.
pub fn status_priority(status: &str) -> u8 {
    if status.contains("尚未招募") {
        0
    } else if status.contains("招募中") {
        1
    } else {
        2
    }
}

/// Stable sort by [`status_priority`].
pub fn sort_by_status(trials: &[TrialRecord]) -> Vec<&TrialRecord> {
    trials
        .iter()
        .sorted_by_key(|t| status_priority(&t.status))
        .collect()
}

fn write_basic_fields(f: &mut fmt::Formatter<'_>, trial: &TrialRecord) -> fmt::Result {
    writeln!(f, "- **登记号**: {}", trial.reg_no)?;
    writeln!(f, "- **药物名称**: {}", trial.drug_name)?;
    writeln!(f, "- **试验状态**: {}", trial.status)?;
    writeln!(f, "- **适应症**: {}", trial.indication)
}

/// Flat list of search results.
pub struct TrialList<'a> {
    pub keyword: &'a str,
    pub trials: &'a [TrialRecord],
}

impl fmt::Display for TrialList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.trials.is_empty() {
            return writeln!(f, "# 未找到相关临床试验");
        }

        writeln!(f, "# {}相关临床试验\n", self.keyword)?;
        for trial in sort_by_status(self.trials) {
            if trial.detail_url.is_empty() {
                writeln!(f, "## {}\n", trial.title)?;
            } else {
                writeln!(f, "## [{}]({})\n", trial.title, trial.detail_url)?;
            }
            write_basic_fields(f, trial)?;
            if !trial.detail_url.is_empty() {
                writeln!(f, "- **详情链接**: [{}]({})", trial.reg_no, trial.detail_url)?;
            }
            writeln!(f, "\n---\n")?;
        }
        Ok(())
    }
}

/// One trial's detail document.
pub struct TrialDetail<'a> {
    pub trial: &'a TrialRecord,
    pub detail: &'a DetailRecord,
}

impl TrialDetail<'_> {
    fn write_principal(f: &mut fmt::Formatter<'_>, pi: &PrincipalInvestigator) -> fmt::Result {
        let or_empty = |v: &Option<String>| v.clone().unwrap_or_default();

        writeln!(f, "### 主要研究者\n")?;
        writeln!(f, "**姓名**: {}", or_empty(&pi.name))?;
        writeln!(f, "**学位**: {}", or_empty(&pi.degree))?;
        writeln!(f, "**职称**: {}", or_empty(&pi.title))?;
        if let Some(institution) = &pi.institution {
            writeln!(f, "**单位名称**: {}", institution)?;
        }

        if pi.has_contact() {
            writeln!(f, "\n**联系方式**:")?;
            for (label, value) in [
                ("电话", &pi.phone),
                ("Email", &pi.email),
                ("邮政地址", &pi.address),
                ("邮编", &pi.postcode),
            ] {
                if let Some(value) = value {
                    writeln!(f, "- {}: {}", label, value)?;
                }
            }
        }
        writeln!(f)
    }

    fn write_institutions(f: &mut fmt::Formatter<'_>, institutions: &[Institution]) -> fmt::Result {
        writeln!(f, "{}\n", INSTITUTIONS_HEADING)?;
        for inst in institutions {
            let get = |key: &str| inst.get(key).unwrap_or_default();
            writeln!(f, "**{}. {}**", get("序号"), get("机构名称"))?;
            writeln!(f, "- 主要研究者: {}", get("主要研究者"))?;
            writeln!(f, "- 地区: {}{}", get("省（州）"), get("城市"))?;
            writeln!(f)?;
        }
        Ok(())
    }

    fn write_investigators(f: &mut fmt::Formatter<'_>, info: &InvestigatorInfo) -> fmt::Result {
        writeln!(f, "## 研究者信息\n")?;
        if let Some(pi) = &info.principal {
            Self::write_principal(f, pi)?;
        }
        if let Some(institutions) = info.institutions.as_deref().filter(|i| !i.is_empty()) {
            Self::write_institutions(f, institutions)?;
        }
        Ok(())
    }
}

impl fmt::Display for TrialDetail<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trial = self.trial;
        writeln!(f, "# {}\n", trial.title)?;

        writeln!(f, "## 基本信息\n")?;
        write_basic_fields(f, trial)?;
        if !trial.detail_url.is_empty() {
            writeln!(f, "- **详情链接**: [{}]({})", trial.reg_no, trial.detail_url)?;
        }
        writeln!(f)?;

        if let Some(info) = self.detail.investigators() {
            Self::write_investigators(f, info)?;
        }

        for (name, section) in self.detail.sections() {
            if name == INVESTIGATOR_SECTION {
                continue;
            }
            if let DetailSection::Fields(fields) = section {
                writeln!(f, "## {}\n", name)?;
                for (k, v) in fields.iter().filter(|(k, _)| *k != "标题") {
                    writeln!(f, "- **{}**: {}", k, v)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// Table of contents plus every per-trial document, each behind an anchor
/// named by the trial's document name.
pub struct DetailsSummary<'a> {
    /// Trial and its rendered detail document.
    pub entries: &'a [(&'a TrialRecord, String)],
}

impl fmt::Display for DetailsSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# 临床试验详细信息汇总\n")?;
        writeln!(f, "## 目录\n")?;
        for (trial, _) in self.entries {
            writeln!(f, "- [{}](#{})", trial.title, trial.document_name())?;
        }
        writeln!(f, "\n---\n")?;
        writeln!(f, "# 详细信息\n")?;
        for (trial, body) in self.entries {
            writeln!(f, "<a id='{}'></a>\n", trial.document_name())?;
            write!(f, "{}", body)?;
            writeln!(f, "\n---\n")?;
        }
        Ok(())
    }
}

/// Status counts in first-seen order. An empty status counts as unknown.
pub fn status_distribution(trials: &[TrialRecord]) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = vec![];
    for trial in trials {
        let status = if trial.status.is_empty() {
            UNKNOWN_STATUS
        } else {
            trial.status.as_str()
        };
        match counts.iter_mut().find(|(s, _)| s == status) {
            Some(entry) => entry.1 += 1,
            None => counts.push((status.to_string(), 1)),
        }
    }
    counts
}

/// Institution names listed in a rendered detail document.
pub fn institutions_in_detail(markdown: &str) -> Vec<String> {
    let Some((_, rest)) = markdown.split_once(INSTITUTIONS_HEADING) else {
        return vec![];
    };
    let section = rest.split("##").next().unwrap_or_default();
    regex!(r"\*\*\d+\.\s+(.*?)\*\*")
        .captures_iter(section)
        .map(|c| c[1].to_string())
        .collect()
}

/// How many documents mention each institution, most frequent first. Ties
/// keep first-seen order.
pub fn count_institutions<'a, I: IntoIterator<Item = &'a str>>(docs: I) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = vec![];
    for doc in docs {
        for name in institutions_in_detail(doc) {
            match counts.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 += 1,
                None => counts.push((name, 1)),
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

/// Overview with status and institution statistics.
pub struct ComprehensiveReport<'a> {
    /// `YYYY-MM-DD`
    pub date: String,
    pub keyword: &'a str,
    pub filters: &'a [String],
    pub trials: &'a [TrialRecord],
    /// Output of [`count_institutions`].
    pub institutions: &'a [(String, usize)],
    /// Document name to the path of its detail document.
    pub detail_links: &'a BTreeMap<String, String>,
}

impl fmt::Display for ComprehensiveReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.trials.len();

        writeln!(f, "# {} 相关临床试验综合报告\n", self.keyword)?;
        writeln!(f, "**搜索日期**: {}", self.date)?;
        writeln!(f, "**搜索关键词**: {}", self.keyword)?;
        if !self.filters.is_empty() {
            writeln!(f, "**过滤关键词**: {}", self.filters.join(", "))?;
        }
        writeln!(f, "**试验总数**: {}\n", total)?;

        writeln!(f, "## 目录\n")?;
        writeln!(f, "1. [试验概览](#试验概览)")?;
        writeln!(f, "2. [试验状态分布](#试验状态分布)")?;
        writeln!(f, "3. [研究机构分布](#研究机构分布)")?;
        writeln!(f, "4. [详细试验列表](#详细试验列表)\n")?;

        writeln!(f, "<a id='试验概览'></a>")?;
        writeln!(f, "## 试验概览\n")?;
        writeln!(
            f,
            "共 {} 个试验，其中 {} 个已获取详细信息。\n",
            total,
            self.detail_links.len()
        )?;

        writeln!(f, "<a id='试验状态分布'></a>")?;
        writeln!(f, "## 试验状态分布\n")?;
        writeln!(f, "| 试验状态 | 数量 | 百分比 |")?;
        writeln!(f, "|---------|------|--------|")?;
        for (status, count) in status_distribution(self.trials) {
            let percentage = count as f64 / total as f64 * 100.0;
            writeln!(f, "| {} | {} | {:.1}% |", status, count, percentage)?;
        }
        writeln!(f)?;

        writeln!(f, "<a id='研究机构分布'></a>")?;
        writeln!(f, "## 研究机构分布\n")?;
        if self.institutions.is_empty() {
            writeln!(f, "未找到研究机构分布信息\n")?;
        } else {
            writeln!(f, "| 研究机构 | 参与试验数量 |")?;
            writeln!(f, "|----------|------------|")?;
            for (name, count) in self.institutions.iter().take(TOP_INSTITUTIONS) {
                writeln!(f, "| {} | {} |", name, count)?;
            }
            if self.institutions.len() > TOP_INSTITUTIONS {
                writeln!(f, "| ... | ... |")?;
            }
            writeln!(f)?;
        }

        writeln!(f, "<a id='详细试验列表'></a>")?;
        writeln!(f, "## 详细试验列表\n")?;
        for trial in sort_by_status(self.trials) {
            writeln!(f, "### {}\n", trial.title)?;
            write_basic_fields(f, trial)?;
            if let Some(link) = self.detail_links.get(trial.document_name()) {
                writeln!(f, "- [查看详细信息]({})", link)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Short index pointing at every per-trial document.
pub struct DetailsIndex<'a> {
    pub keyword: &'a str,
    pub filters: &'a [String],
    pub total: usize,
    /// Title and relative path of each detail document.
    pub links: &'a [(String, String)],
}

impl fmt::Display for DetailsIndex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# {} 相关临床试验详细信息\n", self.keyword)?;
        writeln!(f, "搜索关键词: {}", self.keyword)?;
        writeln!(f, "过滤关键词: {}\n", self.filters.join(", "))?;
        writeln!(f, "共找到 {} 个相关临床试验\n", self.total)?;
        writeln!(f, "## 详细信息链接\n")?;
        for (title, path) in self.links {
            writeln!(f, "- [{}]({})", title, path)?;
        }
        Ok(())
    }
}
