//! Result table parsing.
//!
//! A combination's page carries one table per admission category, each
//! preceded by a heading naming the category and the number of places.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::models::StatisticsRecord;

/// Table header → record field.
pub const NEEDED_COLUMNS: &[(&str, &str)] = &[
    ("Уникальный id абитуриента ЕПГУ", "epgu_id"),
    ("id абитуриента", "applicant_id"),
    ("Сумма конкурсных баллов", "score"),
    ("Заявление о согласии на зачисление", "agreement"),
    ("Статус", "status"),
    ("Примечание", "note"),
];

/// Heading phrase → admission category.
pub const CATEGORIES: &[(&str, &str)] = &[
    ("на основные места", "общий конкурс"),
    ("целевой квоты", "целевая квота"),
    ("особой квоты", "особая квота"),
    ("отдельной квоты", "отдельная квота"),
    ("без вступительных испытаний", "без вступительных испытаний"),
];

static PLACES_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)мест[а-я]*\s*:\s*(\d+)").unwrap());
static BLOCK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6, table").unwrap());
static ROW_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static HEADER_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").unwrap());
static CELL_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());

/// Turns a combination page into statistics rows.
pub trait TableParser: Send + Sync {
    fn parse(&self, html: &str) -> Vec<StatisticsRecord>;
}

/// Default parser for the upstream statistics page.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlTableParser;

impl HtmlTableParser {
    pub fn new() -> Self {
        Self
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: &ElementRef<'_>) -> String {
    normalize(&element.text().collect::<String>())
}

/// Category named by a table heading, if any phrase matches.
pub fn category_from_heading(heading: &str) -> Option<String> {
    let lower = heading.to_lowercase();
    CATEGORIES
        .iter()
        .find(|(phrase, _)| lower.contains(phrase))
        .map(|(_, category)| category.to_string())
}

/// Number of places from a "мест: N" phrase.
pub fn places_from_heading(heading: &str) -> Option<i32> {
    PLACES_PATTERN
        .captures(heading)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn column_field(header: &str) -> Option<&'static str> {
    NEEDED_COLUMNS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(header))
        .map(|(_, field)| *field)
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn parse_table(
    table: ElementRef<'_>,
    category: Option<&str>,
    places: Option<i32>,
) -> Vec<StatisticsRecord> {
    let mut columns: Vec<Option<&'static str>> = Vec::new();
    let mut records = Vec::new();

    for row in table.select(&ROW_SELECTOR) {
        let headers: Vec<String> = row.select(&HEADER_SELECTOR).map(|h| element_text(&h)).collect();
        if !headers.is_empty() && columns.is_empty() {
            columns = headers.iter().map(|h| column_field(h)).collect();
            continue;
        }

        let cells: Vec<String> = row.select(&CELL_SELECTOR).map(|c| element_text(&c)).collect();
        if cells.is_empty() || columns.iter().all(Option::is_none) {
            continue;
        }

        let mut record = StatisticsRecord {
            admission_category: category.map(str::to_string),
            available_places: places,
            ..Default::default()
        };
        let mut mapped = false;
        for (field, text) in columns.iter().zip(cells) {
            let Some(field) = field else { continue };
            mapped = true;
            match *field {
                "epgu_id" => record.epgu_id = non_empty(text),
                "applicant_id" => record.applicant_id = non_empty(text),
                "score" => record.score = text.replace(' ', "").parse().ok(),
                "agreement" => record.agreement = non_empty(text),
                "status" => record.status = non_empty(text),
                "note" => record.note = non_empty(text),
                _ => {}
            }
        }
        if mapped {
            records.push(record);
        }
    }

    records
}

impl TableParser for HtmlTableParser {
    fn parse(&self, html: &str) -> Vec<StatisticsRecord> {
        if html.trim().is_empty() {
            return Vec::new();
        }

        let document = Html::parse_document(html);
        let mut heading = String::new();
        let mut records = Vec::new();

        for block in document.select(&BLOCK_SELECTOR) {
            if block.value().name() != "table" {
                heading = element_text(&block);
                continue;
            }
            let category = category_from_heading(&heading);
            let places = places_from_heading(&heading);
            records.extend(parse_table(block, category.as_deref(), places));
        }

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <h3>Конкурсный список на основные места. Всего мест: 25</h3>
        <table>
          <tr><th>№</th><th>id абитуриента</th><th>Сумма конкурсных баллов</th>
              <th>Заявление о согласии на зачисление</th><th>Статус</th><th>Примечание</th></tr>
          <tr><td>1</td><td>1001</td><td>270</td><td>да</td><td>Участвует в конкурсе</td><td></td></tr>
          <tr><td>2</td><td>1002</td><td>255</td><td>нет</td><td>Участвует в конкурсе</td><td>оригинал</td></tr>
        </table>
        <h3>Поступающие без вступительных испытаний, мест: 3</h3>
        <table>
          <tr><th>Уникальный id абитуриента ЕПГУ</th><th>Сумма конкурсных баллов</th><th>Статус</th></tr>
          <tr><td>9000001</td><td>—</td><td>Рекомендован</td></tr>
        </table>
    "#;

    #[test]
    fn test_parses_rows_with_category_and_places() {
        let rows = HtmlTableParser::new().parse(PAGE);
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].applicant_id.as_deref(), Some("1001"));
        assert_eq!(rows[0].score, Some(270));
        assert_eq!(rows[0].admission_category.as_deref(), Some("общий конкурс"));
        assert_eq!(rows[0].available_places, Some(25));
        assert_eq!(rows[0].note, None);
        assert_eq!(rows[1].note.as_deref(), Some("оригинал"));

        let no_exam = &rows[2];
        assert_eq!(no_exam.epgu_id.as_deref(), Some("9000001"));
        assert_eq!(no_exam.applicant_id, None);
        assert_eq!(no_exam.score, None);
        assert_eq!(
            no_exam.admission_category.as_deref(),
            Some("без вступительных испытаний")
        );
        assert_eq!(no_exam.available_places, Some(3));
    }

    #[test]
    fn test_unrecognised_tables_are_ignored() {
        let html = "<table><tr><th>Foo</th></tr><tr><td>bar</td></tr></table>";
        assert!(HtmlTableParser::new().parse(html).is_empty());
        assert!(HtmlTableParser::new().parse("").is_empty());
    }

    #[test]
    fn test_heading_helpers() {
        assert_eq!(
            category_from_heading("Список в рамках ЦЕЛЕВОЙ КВОТЫ").as_deref(),
            Some("целевая квота")
        );
        assert_eq!(category_from_heading("Прочее"), None);
        assert_eq!(places_from_heading("особая квота, мест: 4"), Some(4));
        assert_eq!(places_from_heading("Всего мест: 120"), Some(120));
        assert_eq!(places_from_heading("без мест"), None);
    }
}
