//! End-to-end crawl against a mock statistics site: discover combinations,
//! store them, then refresh their statistics.

use std::sync::Arc;
use std::time::Duration;

use admission_crawler::crawl::{
    BatchReport, BatchScrapePipeline, CombinationEnumerator, CombinationRefresh, RefreshReport,
};
use admission_crawler::repository::{DbContext, StatisticsQuery};
use admission_crawler::scrapers::{HtmlTableParser, HttpPageFetcher};
use mockito::{Matcher, Mock, ServerGuard};
use tempfile::tempdir;

fn select(name: &str, options: &[(&str, &str)]) -> String {
    let items: String = options
        .iter()
        .map(|(value, label)| format!("<option value=\"{}\">{}</option>", value, label))
        .collect();
    format!(
        "<select name=\"{}\"><option value=\"\">Выберите</option>{}</select>",
        name, items
    )
}

const LEAF: &str = "p_level=1&p_inst=0&p_faculty=5&p_speciality=166&p_typeofstudy=1";

const RESULTS: &str = r#"
    <h3>Конкурсный список на основные места. Всего мест: 25</h3>
    <table>
      <tr><th>id абитуриента</th><th>Сумма конкурсных баллов</th>
          <th>Заявление о согласии на зачисление</th><th>Статус</th></tr>
      <tr><td>1001</td><td>270</td><td>да</td><td>Участвует в конкурсе</td></tr>
      <tr><td>1002</td><td>255</td><td>нет</td><td>Участвует в конкурсе</td></tr>
    </table>
    <h3>Без вступительных испытаний, мест: 2</h3>
    <table>
      <tr><th>id абитуриента</th><th>Сумма конкурсных баллов</th><th>Статус</th></tr>
      <tr><td>1003</td><td></td><td>Рекомендован</td></tr>
    </table>
"#;

async fn page(server: &mut ServerGuard, query: Matcher, status: usize, body: String) -> Mock {
    server
        .mock("GET", "/")
        .match_query(query)
        .with_status(status)
        .with_body(body)
        .create_async()
        .await
}

/// One level, two institutes (the second leads nowhere), a single path down
/// to study forms, and two categories.
async fn mock_site(server: &mut ServerGuard) -> Vec<Mock> {
    let root = format!(
        "{}{}",
        select("p_level", &[("1", "Бакалавриат")]),
        select("p_category", &[("0", "Бюджет"), ("3", "Платное")])
    );

    vec![
        page(server, Matcher::Missing, 200, root).await,
        page(
            server,
            Matcher::Exact("p_level=1".into()),
            200,
            select("p_inst", &[("0", "Главный корпус"), ("1", "Филиал")]),
        )
        .await,
        page(
            server,
            Matcher::Exact("p_level=1&p_inst=0".into()),
            200,
            select("p_faculty", &[("5", "ИВМиИТ")]),
        )
        .await,
        page(
            server,
            Matcher::Exact("p_level=1&p_inst=0&p_faculty=5".into()),
            200,
            select("p_speciality", &[("166", "Прикладная математика")]),
        )
        .await,
        page(
            server,
            Matcher::Exact("p_level=1&p_inst=0&p_faculty=5&p_speciality=166".into()),
            200,
            select("p_typeofstudy", &[("1", "Очная")]),
        )
        .await,
        page(
            server,
            Matcher::Exact(format!("{}&p_category=0", LEAF)),
            200,
            RESULTS.to_string(),
        )
        .await,
        page(
            server,
            Matcher::Exact(format!("{}&p_category=3", LEAF)),
            500,
            "upstream error".to_string(),
        )
        .await,
    ]
}

#[tokio::test]
async fn test_discover_store_and_refresh_statistics() {
    let mut server = mockito::Server::new_async().await;
    let _mocks = mock_site(&mut server).await;

    let dir = tempdir().unwrap();
    let ctx = DbContext::from_path(&dir.path().join("admissions.db"));
    ctx.init_schema().await.unwrap();

    let fetcher = Arc::new(HttpPageFetcher::new(&server.url(), Duration::from_secs(5)).unwrap());

    let refresh = CombinationRefresh::new(
        CombinationEnumerator::standard(fetcher.clone()),
        ctx.combinations(),
    );
    let report = refresh.run().await;
    assert_eq!(
        report,
        RefreshReport {
            discovered: 2,
            stored: 2,
            failed: 0
        }
    );

    // Rediscovery re-confirms the same rows
    refresh.run().await;
    let repo = ctx.combinations();
    assert_eq!(repo.count().await.unwrap(), 2);

    let faculties = repo.faculties(0).await.unwrap();
    assert_eq!(faculties.len(), 1);
    assert_eq!(faculties[0].label, "ИВМиИТ");
    assert!(repo.faculties(1).await.unwrap().is_empty());

    let pipeline = BatchScrapePipeline::new(
        repo.clone(),
        fetcher,
        Arc::new(HtmlTableParser::new()),
        Duration::from_millis(10),
    );
    let batch = pipeline.run_full().await.unwrap();
    assert_eq!(
        batch,
        BatchReport {
            attempted: 2,
            succeeded: 1,
            empty: 1,
            failed: 0,
            rows_saved: 3,
        }
    );

    let query = StatisticsQuery {
        speciality: Some(166),
        category: Some(0),
        ..Default::default()
    };
    let rows = repo.find_statistics(&query, 10).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].record.score, Some(270));
    assert_eq!(rows[0].record.available_places, Some(25));
    assert_eq!(rows[2].record.applicant_id.as_deref(), Some("1003"));
    assert_eq!(rows[2].record.score, None);
    assert_eq!(
        rows[2].record.admission_category.as_deref(),
        Some("без вступительных испытаний")
    );

    let paid = StatisticsQuery {
        category: Some(3),
        ..Default::default()
    };
    assert!(repo.find_statistics(&paid, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_site_discovers_nothing() {
    let fetcher = Arc::new(HttpPageFetcher::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap());
    let combinations = CombinationEnumerator::standard(fetcher).discover().await;
    assert!(combinations.is_empty());
}
