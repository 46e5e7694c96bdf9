//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end.

use sitewalk::config::{
    load_config_with_hash, Config, OutputConfig, RenderMode, SiteEntry, UserAgentConfig,
};
use sitewalk::crawler::{
    crawl, Coordinator, CrawlReport, FetchFailure, FetchStatus, RenderOutcome,
};
use sitewalk::output::CrawlStatistics;
use sitewalk::storage::{open_storage, RunStatus, Storage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration for one site served by `server`
fn create_test_config(server: &MockServer, db_path: &str) -> Config {
    let mut config = Config {
        crawler: Default::default(),
        fetcher: Default::default(),
        user_agent: UserAgentConfig {
            primary: "TestBot/1.0 (+https://example.com/bot)".to_string(),
            fallback: "Mozilla/5.0 (X11; Linux x86_64)".to_string(),
        },
        normalize: Default::default(),
        render: Default::default(),
        output: OutputConfig {
            database_path: db_path.to_string(),
        },
        sites: vec![SiteEntry {
            homepage: format!("{}/", server.uri()),
            scope: vec![],
        }],
    };
    config.crawler.delay_ms = 0;
    config.crawler.render_mode = RenderMode::ForceStatic;
    config.fetcher.backoff_base_ms = 1;
    config.normalize.upgrade_https = false;
    config
}

fn html_page(title: &str, body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!(
            "<html><head><title>{}</title></head><body>{}</body></html>",
            title, body
        ),
        "text/html; charset=utf-8",
    )
}

async fn mount_page(server: &MockServer, at: &str, title: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(html_page(title, body))
        .mount(server)
        .await;
}

async fn mount_robots(server: &MockServer, body: String) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn run_site(config: Config) -> CrawlReport {
    let config = Arc::new(config);
    let site = config.sites[0].clone();
    Coordinator::new(config, &site)
        .expect("coordinator should build")
        .run()
        .await
}

fn crawled_paths(report: &CrawlReport) -> Vec<String> {
    let mut paths: Vec<String> = report
        .iter()
        .map(|r| r.task.url.path().to_string())
        .collect();
    paths.sort();
    paths
}

#[tokio::test]
async fn test_full_crawl_persists_runs_and_pages() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crawl.db");

    mount_robots(&server, "User-agent: *\nAllow: /".to_string()).await;
    mount_page(
        &server,
        "/",
        "Home",
        r#"<a href="/page1">Page 1</a><a href="page2">Page 2</a>"#,
    )
    .await;
    mount_page(&server, "/page1", "Page 1", r#"<a href="/">Home</a>"#).await;
    mount_page(&server, "/page2", "Page 2", "").await;

    let config = create_test_config(&server, db_path.to_str().unwrap());
    let reports = crawl(config, "test-hash").await.unwrap();

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(crawled_paths(report), vec!["/", "/page1", "/page2"]);
    assert_eq!(report.count_status(FetchStatus::Ok), 3);

    let storage = open_storage(&db_path).unwrap();
    let run = storage.list_runs().unwrap().pop().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, "test-hash");
    assert_eq!(run.site, format!("{}/", server.uri()));

    let pages = storage.load_pages(run.id).unwrap();
    assert_eq!(pages.len(), 3);
    let home = pages.iter().find(|p| p.depth == 0).unwrap();
    assert_eq!(home.title.as_deref(), Some("Home"));
    assert_eq!(home.depth, 0);
    assert_eq!(home.link_count, 2);
}

#[tokio::test]
async fn test_robots_txt_respected() {
    let server = MockServer::start().await;

    mount_robots(&server, "User-agent: *\nDisallow: /private\n".to_string()).await;
    mount_page(
        &server,
        "/",
        "Home",
        r#"<a href="/public">Public</a><a href="/private/secret">Secret</a>"#,
    )
    .await;
    mount_page(&server, "/public", "Public", "").await;
    Mock::given(method("GET"))
        .and(path("/private/secret"))
        .respond_with(html_page("Secret", ""))
        .expect(0)
        .mount(&server)
        .await;

    let report = run_site(create_test_config(&server, ":memory:")).await;

    assert_eq!(crawled_paths(&report), vec!["/", "/public"]);
    assert_eq!(report.drops.disallowed, 1);
}

#[tokio::test]
async fn test_robots_group_for_our_agent_wins() {
    let server = MockServer::start().await;

    mount_robots(
        &server,
        "User-agent: *\nDisallow: /\n\nUser-agent: TestBot\nDisallow: /admin\n".to_string(),
    )
    .await;
    mount_page(&server, "/", "Home", r#"<a href="/about">About</a><a href="/admin">Admin</a>"#)
        .await;
    mount_page(&server, "/about", "About", "").await;

    let report = run_site(create_test_config(&server, ":memory:")).await;
    assert_eq!(crawled_paths(&report), vec!["/", "/about"]);
}

#[tokio::test]
async fn test_unavailable_robots_allows_crawl() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(500).set_body_string("User-agent: *\nDisallow: /\n"))
        .mount(&server)
        .await;
    mount_page(&server, "/", "Home", r#"<a href="/about">About</a>"#).await;
    mount_page(&server, "/about", "About", "").await;

    let report = run_site(create_test_config(&server, ":memory:")).await;

    assert_eq!(crawled_paths(&report), vec!["/", "/about"]);
    assert_eq!(report.count_status(FetchStatus::Ok), 2);
}

#[tokio::test]
async fn test_redirect_into_disallowed_path_is_not_followed() {
    let server = MockServer::start().await;

    mount_robots(&server, "User-agent: *\nDisallow: /private\n".to_string()).await;
    mount_page(&server, "/", "Home", r#"<a href="/login">Login</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/private/account"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/account"))
        .respond_with(html_page("Account", ""))
        .expect(0)
        .mount(&server)
        .await;

    let report = run_site(create_test_config(&server, ":memory:")).await;

    let login = report.iter().find(|r| r.task.url.path() == "/login").unwrap();
    assert_eq!(login.result.status, FetchStatus::FatalError);
    assert!(matches!(
        login.result.failure,
        Some(FetchFailure::RedirectBlocked(_))
    ));
}

#[tokio::test]
async fn test_sitemap_index_seeds_unlinked_pages() {
    let server = MockServer::start().await;
    let uri = server.uri();

    mount_robots(&server, format!("User-agent: *\nAllow: /\nSitemap: {}/sitemap_index.xml\n", uri))
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap_index.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>{}/sitemap-pages.xml</loc></sitemap>
</sitemapindex>"#,
            uri
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap-pages.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{uri}/</loc></url>
  <url><loc>{uri}/orphan/</loc></url>
  <url><loc>https://elsewhere.example.org/page</loc></url>
</urlset>"#,
            uri = uri
        )))
        .mount(&server)
        .await;
    mount_page(&server, "/", "Home", "no links").await;
    mount_page(&server, "/orphan", "Orphan", "").await;

    let report = run_site(create_test_config(&server, ":memory:")).await;

    assert_eq!(crawled_paths(&report), vec!["/", "/orphan"]);
    assert!(report.iter().all(|r| r.task.depth == 0));
    // The homepage is always dispatched first
    assert_eq!(report.records[0].task.url.path(), "/");
    assert_eq!(report.drops.out_of_scope, 1);
}

#[tokio::test]
async fn test_fallback_sitemap_probe() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<urlset><url><loc>{}/from-sitemap</loc></url></urlset>"#,
            server.uri()
        )))
        .mount(&server)
        .await;
    mount_page(&server, "/", "Home", "").await;
    mount_page(&server, "/from-sitemap", "From sitemap", "").await;

    let report = run_site(create_test_config(&server, ":memory:")).await;
    assert_eq!(crawled_paths(&report), vec!["/", "/from-sitemap"]);
}

#[tokio::test]
async fn test_duplicate_urls_fetched_once() {
    let server = MockServer::start().await;

    let links = format!(
        r#"<a href="/a">A</a><a href="/a/">A slash</a><a href="/a?utm_source=x">A tracked</a>
           <a href="/./a">A dots</a><a href="{}/a">A absolute</a>"#,
        server.uri()
    );
    mount_page(&server, "/", "Home", &links).await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html_page("A", ""))
        .expect(1)
        .mount(&server)
        .await;

    let report = run_site(create_test_config(&server, ":memory:")).await;

    assert_eq!(crawled_paths(&report), vec!["/", "/a"]);
    assert_eq!(report.drops.duplicate, 4);
}

#[tokio::test]
async fn test_trailing_slash_preserved_when_configured() {
    let server = MockServer::start().await;

    mount_page(&server, "/", "Home", r#"<a href="/a">A</a><a href="/a/">A slash</a>"#).await;
    mount_page(&server, "/a", "A", "").await;
    mount_page(&server, "/a/", "A slash", "").await;

    let mut config = create_test_config(&server, ":memory:");
    config.normalize.trailing_slash = sitewalk::TrailingSlash::Preserve;
    let report = run_site(config).await;

    assert_eq!(crawled_paths(&report), vec!["/", "/a", "/a/"]);
}

#[tokio::test]
async fn test_max_pages_respected() {
    let server = MockServer::start().await;

    let links: String = (0..10)
        .map(|i| format!(r#"<a href="/page{}">Page {}</a>"#, i, i))
        .collect();
    mount_page(&server, "/", "Home", &links).await;
    for i in 0..10 {
        mount_page(&server, &format!("/page{}", i), "Page", "").await;
    }

    let mut config = create_test_config(&server, ":memory:");
    config.crawler.max_pages = 4;
    let report = run_site(config).await;

    assert_eq!(report.len(), 4);
    let paths: Vec<&str> = report.iter().map(|r| r.task.url.path()).collect();
    assert_eq!(paths, vec!["/", "/page0", "/page1", "/page2"]);
}

#[tokio::test]
async fn test_server_error_recorded_and_crawl_continues() {
    let server = MockServer::start().await;

    mount_page(
        &server,
        "/",
        "Home",
        r#"<a href="/broken">Broken</a><a href="/fine">Fine</a><a href="/gone">Gone</a>"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "/fine", "Fine", "").await;

    let mut config = create_test_config(&server, ":memory:");
    config.fetcher.retry_budget = 1;
    let report = run_site(config).await;

    assert_eq!(report.len(), 4);
    let broken = report.iter().find(|r| r.task.url.path() == "/broken").unwrap();
    assert_eq!(broken.result.status, FetchStatus::FatalError);
    assert_eq!(broken.result.http_status, Some(500));
    assert_eq!(broken.result.attempts, 2);
    assert!(broken.page.is_none());

    let gone = report.iter().find(|r| r.task.url.path() == "/gone").unwrap();
    assert_eq!(gone.result.status, FetchStatus::FatalError);
    assert_eq!(gone.result.attempts, 1);

    let stats = CrawlStatistics::from_report(&report);
    assert_eq!(stats.ok_pages(), 2);
    assert_eq!(stats.http_errors.get(&500), Some(&1));
    assert_eq!(stats.http_errors.get(&404), Some(&1));
}

#[tokio::test]
async fn test_too_many_requests_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_page(&server, "/", "Home", "").await;

    let report = run_site(create_test_config(&server, ":memory:")).await;

    assert_eq!(report.len(), 1);
    assert_eq!(report.records[0].result.status, FetchStatus::Ok);
    assert_eq!(report.records[0].result.attempts, 3);
}

#[tokio::test]
async fn test_forbidden_retried_with_fallback_agent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("user-agent", "Mozilla/5.0 (X11; Linux x86_64)"))
        .respond_with(html_page("Home", ""))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let report = run_site(create_test_config(&server, ":memory:")).await;

    assert_eq!(report.records[0].result.status, FetchStatus::Ok);
    assert_eq!(report.records[0].result.attempts, 2);
}

#[tokio::test]
async fn test_crawl_delay_spaces_requests() {
    let server = MockServer::start().await;

    mount_robots(&server, "User-agent: *\nCrawl-delay: 0.2\n".to_string()).await;
    mount_page(&server, "/", "Home", r#"<a href="/a">A</a><a href="/b">B</a>"#).await;
    mount_page(&server, "/a", "A", "").await;
    mount_page(&server, "/b", "B", "").await;

    let mut config = create_test_config(&server, ":memory:");
    config.crawler.workers = 3;
    let started = Instant::now();
    let report = run_site(config).await;

    assert_eq!(report.len(), 3);
    // robots.txt, six sitemap probes and three pages, 200ms apart
    assert!(started.elapsed() >= Duration::from_millis(200 * 9));
}

#[tokio::test]
async fn test_force_static_never_renders() {
    let server = MockServer::start().await;
    mount_page(&server, "/", "App", r#"<div id="root"></div>"#).await;

    let mut config = create_test_config(&server, ":memory:");
    config.render.service_url = Some(format!("{}/render", server.uri()));
    Mock::given(method("POST"))
        .and(path("/render"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>rendered</html>"))
        .expect(0)
        .mount(&server)
        .await;

    let report = run_site(config).await;
    assert_eq!(report.records[0].result.render, RenderOutcome::NotAttempted);
    assert!(report.records[0].result.is_static());
}

#[tokio::test]
async fn test_auto_mode_renders_spa_shell_through_service() {
    let server = MockServer::start().await;
    mount_page(&server, "/", "App", r#"<div id="root"></div>"#).await;
    mount_page(&server, "/dashboard", "Dashboard", "<p>Welcome back</p>").await;
    Mock::given(method("POST"))
        .and(path("/render"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><div id="root"><a href="/dashboard">Dashboard</a></div></body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = create_test_config(&server, ":memory:");
    config.crawler.render_mode = RenderMode::Auto;
    config.render.chrome = false;
    config.render.service_url = Some(format!("{}/render", server.uri()));
    config.render.spa_text_threshold = 1;
    let report = run_site(config).await;

    assert_eq!(crawled_paths(&report), vec!["/", "/dashboard"]);
    let home = report.iter().find(|r| r.task.url.path() == "/").unwrap();
    assert!(!home.result.is_static());
}

#[tokio::test]
async fn test_config_file_end_to_end() {
    let server = MockServer::start().await;
    mount_page(&server, "/", "Home", r#"<a href="/next">Next</a>"#).await;
    mount_page(&server, "/next", "Next", "").await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sitewalk.db");
    let config_path = dir.path().join("sitewalk.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[crawler]
max-pages = 10
delay-ms = 0
render-mode = "force-static"

[user-agent]
primary = "TestBot/1.0"
fallback = "Mozilla/5.0"

[normalize]
upgrade-https = false

[output]
database-path = "{}"

[[site]]
homepage = "{}/"
"#,
            db_path.display(),
            server.uri()
        ),
    )
    .unwrap();

    let (config, hash) = load_config_with_hash(&config_path).unwrap();
    let reports = crawl(config, &hash).await.unwrap();
    assert_eq!(reports[0].len(), 2);

    let storage = open_storage(&db_path).unwrap();
    let run = storage.list_runs().unwrap().pop().unwrap();
    assert_eq!(run.config_hash, hash);
    assert_eq!(storage.count_pages(run.id).unwrap(), 2);
}
