use super::{
    DetailRecord, DetailSection, Fields, Institution, InvestigatorInfo, PrincipalInvestigator,
    GENERIC_SECTION, INVESTIGATOR_SECTION,
};
use crate::utils::element_text;
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, error, warn};

const E: &str = "Invalid selector";
lazy_static! {
    static ref TITLE: Selector = Selector::parse("h3.text-center").expect(E);
    static ref KV_TABLE: Selector = Selector::parse("table.table").expect(E);
    static ref PART_TITLE: Selector = Selector::parse("div.searchDetailPartTit").expect(E);
    static ref SUB_TITLE: Selector = Selector::parse("div.sDPTit2").expect(E);
    static ref DETAIL_TABLE: Selector = Selector::parse("table.searchDetailTable").expect(E);
    static ref TR: Selector = Selector::parse("tr").expect(E);
    static ref TH: Selector = Selector::parse("th").expect(E);
    static ref TD: Selector = Selector::parse("td").expect(E);
    static ref CELL: Selector = Selector::parse("th, td").expect(E);
}

const TITLE_KEY: &str = "标题";
const PRINCIPAL_HEADING: &str = "主要研究者信息";
const INSTITUTIONS_HEADING: &str = "各参加机构信息";

pub enum DetailResult {
    Found(DetailRecord),
    /// The page lacks the section this extractor depends on.
    MissingSection,
}

pub trait DetailExtractor {
    fn extract(&self, doc: &Html) -> DetailResult;
}

/// Collects every two-cell row of the page's key-value tables.
#[derive(Debug, Default)]
pub struct GenericExtractor;

impl DetailExtractor for GenericExtractor {
    fn extract(&self, doc: &Html) -> DetailResult {
        let mut fields = Fields::new();

        if let Some(title) = doc.select(&TITLE).next() {
            let title = element_text(&title);
            if !title.is_empty() {
                fields.insert(TITLE_KEY, title);
            }
        }

        for table in doc.select(&KV_TABLE) {
            for row in table.select(&TR) {
                let cells = row.select(&TD).collect::<Vec<_>>();
                if cells.len() < 2 {
                    continue;
                }
                let key = element_text(&cells[0]);
                let value = element_text(&cells[1]);
                if !key.is_empty() && !value.is_empty() {
                    fields.insert(key, value);
                }
            }
        }

        let mut detail = DetailRecord::new();
        if !fields.is_empty() {
            detail.insert(GENERIC_SECTION, DetailSection::Fields(fields));
        }
        DetailResult::Found(detail)
    }
}

/// Reads the principal investigator and participating institutions out of
/// the investigator section.
#[derive(Debug, Default)]
pub struct InvestigatorExtractor;

impl DetailExtractor for InvestigatorExtractor {
    fn extract(&self, doc: &Html) -> DetailResult {
        let has_section = doc
            .select(&PART_TITLE)
            .any(|el| el.text().collect::<String>().contains(INVESTIGATOR_SECTION));
        if !has_section {
            error!("Investigator section not found");
            return DetailResult::MissingSection;
        }

        let mut info = InvestigatorInfo::default();

        if let Some(heading) = find_sub_heading(doc, PRINCIPAL_HEADING) {
            let principal = next_after(doc, &heading, &DETAIL_TABLE)
                .map(|table| read_principal_investigator(&table))
                .unwrap_or_default();
            info.principal = Some(principal);
        }

        if let Some(heading) = find_sub_heading(doc, INSTITUTIONS_HEADING) {
            let institutions = next_after(doc, &heading, &DETAIL_TABLE)
                .map(|table| read_institutions(&table))
                .unwrap_or_default();
            debug!("Found {} participating institutions", institutions.len());
            info.institutions = Some(institutions);
        }

        let mut detail = DetailRecord::new();
        if info.is_empty() {
            warn!("Investigator section has no recognised content");
        } else {
            detail.insert(INVESTIGATOR_SECTION, DetailSection::Investigators(info));
        }
        DetailResult::Found(detail)
    }
}

fn find_sub_heading<'a>(doc: &'a Html, text: &str) -> Option<ElementRef<'a>> {
    doc.select(&SUB_TITLE)
        .find(|el| el.text().collect::<String>().contains(text))
}

/// First element matching `selector` that follows `anchor` in document order.
fn next_after<'a>(
    doc: &'a Html,
    anchor: &ElementRef<'a>,
    selector: &Selector,
) -> Option<ElementRef<'a>> {
    let anchor = **anchor;
    doc.root_element()
        .descendants()
        .skip_while(|node| *node != anchor)
        .skip(1)
        .filter_map(ElementRef::wrap)
        .find(|el| selector.matches(el))
}

/// The principal investigator table has no headers to key on; values sit at
/// fixed cell positions (header cells included in the count):
///
/// - row 0: name at 2, degree at 4, title at 6
/// - row 1: phone at 1, email at 3, postal address at 5
/// - row 2: postcode at 1, institution at 3
///
/// A row shorter than expected leaves its fields unset.
fn read_principal_investigator(table: &ElementRef) -> PrincipalInvestigator {
    let rows = table
        .select(&TR)
        .map(|row| row.select(&CELL).map(|c| element_text(&c)).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    let mut pi = PrincipalInvestigator::default();
    if let Some(cells) = rows.first().filter(|c| c.len() >= 7) {
        pi.name = Some(cells[2].clone());
        pi.degree = Some(cells[4].clone());
        pi.title = Some(cells[6].clone());
    }
    if let Some(cells) = rows.get(1).filter(|c| c.len() >= 7) {
        pi.phone = Some(cells[1].clone());
        pi.email = Some(cells[3].clone());
        pi.address = Some(cells[5].clone());
    }
    if let Some(cells) = rows.get(2).filter(|c| c.len() >= 5) {
        pi.postcode = Some(cells[1].clone());
        pi.institution = Some(cells[3].clone());
    }
    pi
}

/// Header-driven: the first row names the columns, cells past the last
/// header are dropped.
fn read_institutions(table: &ElementRef) -> Vec<Institution> {
    let mut rows = table.select(&TR);
    let Some(header_row) = rows.next() else {
        return vec![];
    };
    let headers = header_row
        .select(&TH)
        .map(|th| element_text(&th))
        .collect::<Vec<_>>();

    rows.filter_map(|row| {
        let cells = row.select(&TD).collect::<Vec<_>>();
        if cells.is_empty() {
            return None;
        }
        Some(
            headers
                .iter()
                .zip(cells.iter())
                .map(|(h, c)| (h.clone(), element_text(c)))
                .collect::<Institution>(),
        )
    })
    .collect()
}
