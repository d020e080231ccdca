mod detail;
mod table;

pub use detail::{DetailExtractor, DetailResult, GenericExtractor, InvestigatorExtractor};
pub use table::{extract_filtered, extract_trials, filter_trials, matches_keywords, total_pages};

use serde::{Deserialize, Serialize};
use std::fmt;

pub const SEQ: &str = "序号";
pub const REG_NO: &str = "登记号";
pub const STATUS: &str = "试验状态";
pub const DRUG_NAME: &str = "药物名称";
pub const INDICATION: &str = "适应症";
pub const TITLE: &str = "试验通俗题目";
pub const DETAIL_URL: &str = "详情URL";
pub const TRIAL_ID: &str = "试验ID";

pub const INVESTIGATOR_SECTION: &str = "研究者信息";
pub const GENERIC_SECTION: &str = "详细信息";

/// Insertion-ordered string mapping. Inserting an existing key replaces the
/// value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fields(Vec<(String, String)>);

impl Fields {
    pub fn new() -> Self {
        Fields(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Fields {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

/// One row of the registry's search results table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub seq: String,
    pub reg_no: String,
    pub status: String,
    pub drug_name: String,
    pub indication: String,
    pub title: String,
    pub detail_url: String,
    pub trial_id: String,
    /// Values merged in from a generic detail page.
    #[serde(default, skip_serializing_if = "Fields::is_empty")]
    pub extras: Fields,
}

impl TrialRecord {
    /// Labelled core fields, in table order.
    pub fn core_fields(&self) -> [(&'static str, &str); 8] {
        [
            (SEQ, self.seq.as_str()),
            (REG_NO, self.reg_no.as_str()),
            (STATUS, self.status.as_str()),
            (DRUG_NAME, self.drug_name.as_str()),
            (INDICATION, self.indication.as_str()),
            (TITLE, self.title.as_str()),
            (DETAIL_URL, self.detail_url.as_str()),
            (TRIAL_ID, self.trial_id.as_str()),
        ]
    }

    /// Name for the trial's own files and anchors: the registration number,
    /// or the site id for rows that carry none.
    pub fn document_name(&self) -> &str {
        if self.reg_no.is_empty() {
            &self.trial_id
        } else {
            &self.reg_no
        }
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.core_fields().iter().any(|(label, _)| *label == key)
            || self.extras.contains_key(key)
    }

    /// Every field value joined by a space, the text keyword filters run against.
    pub fn searchable_text(&self) -> String {
        self.core_fields()
            .iter()
            .map(|(_, v)| *v)
            .chain(self.extras.iter().map(|(_, v)| v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Copies key-value detail sections into `extras`. Keys the record already
    /// carries are left untouched.
    pub fn merge_detail(&mut self, detail: &DetailRecord) {
        for (_, section) in detail.sections() {
            if let DetailSection::Fields(fields) = section {
                for (k, v) in fields.iter() {
                    if !self.has_field(k) {
                        self.extras.insert(k, v);
                    }
                }
            }
        }
    }
}

impl fmt::Display for TrialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Seq             : {}", self.seq)?;
        writeln!(f, "Reg No          : {}", self.reg_no)?;
        writeln!(f, "Status          : {}", self.status)?;
        writeln!(f, "Drug            : {}", self.drug_name)?;
        writeln!(f, "Indication      : {}", self.indication)?;
        writeln!(f, "Title           : {}", self.title)?;
        if self.detail_url.is_empty() {
            writeln!(f, "Detail URL      : None")?;
        } else {
            writeln!(f, "Detail URL      : {}", self.detail_url)?;
        }
        for (k, v) in self.extras.iter() {
            writeln!(f, "> {}: {}", k, v.replace('\n', "\n  "))?;
        }
        Ok(())
    }
}

/// Principal investigator block of a detail page. Every field stays `None`
/// when the page layout does not match the expected rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalInvestigator {
    pub name: Option<String>,
    pub degree: Option<String>,
    pub title: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub postcode: Option<String>,
    pub institution: Option<String>,
}

impl PrincipalInvestigator {
    pub fn has_contact(&self) -> bool {
        self.phone.is_some()
            || self.email.is_some()
            || self.address.is_some()
            || self.postcode.is_some()
    }
}

/// Participating institution, keyed by the institutions table's column headers.
pub type Institution = Fields;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestigatorInfo {
    pub principal: Option<PrincipalInvestigator>,
    pub institutions: Option<Vec<Institution>>,
}

impl InvestigatorInfo {
    pub fn is_empty(&self) -> bool {
        self.principal.is_none() && self.institutions.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetailSection {
    Fields(Fields),
    Investigators(InvestigatorInfo),
}

/// Sections extracted from a trial's detail page, in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRecord {
    sections: Vec<(String, DetailSection)>,
}

impl DetailRecord {
    pub fn new() -> Self {
        DetailRecord::default()
    }

    pub fn insert<S: Into<String>>(&mut self, name: S, section: DetailSection) {
        let name = name.into();
        match self.sections.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = section,
            None => self.sections.push((name, section)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DetailSection> {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    pub fn investigators(&self) -> Option<&InvestigatorInfo> {
        match self.get(INVESTIGATOR_SECTION) {
            Some(DetailSection::Investigators(info)) => Some(info),
            _ => None,
        }
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &DetailSection)> {
        self.sections.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}
