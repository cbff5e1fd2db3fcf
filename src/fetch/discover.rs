//! Listing discovery: turns listing pages into per-category listing files.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::category::Category;
use crate::config::FetchConfig;
use crate::error::AppError;
use crate::scheduler::WorkerScheduler;
use crate::storage::{FailureLog, PipelineStage};

use super::client::RemoteSource;
use super::listing::{extract_xpt_links, listing_path, read_index, write_url_list};
use super::retry::retry_transient;

/// Per-category outcome of a discovery run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListingReport {
    /// Links written per refreshed category.
    pub links: BTreeMap<Category, usize>,
    /// Listing pages that could not be fetched.
    pub failed_pages: Vec<String>,
    /// Categories left untouched because one of their pages failed.
    pub not_refreshed: Vec<Category>,
}

struct PageResult {
    order: usize,
    category: Category,
    page: Url,
    links: Result<Vec<Url>, AppError>,
}

/// Fetches every listing page of the selected categories and rewrites their
/// listing files.
///
/// A category is only rewritten when all of its pages were fetched, so a
/// failed page never truncates a previously good listing.
///
/// # Errors
///
/// Returns `AppError::Configuration` if the index cannot be read; page
/// failures are logged and reported instead.
pub async fn update_listings(
    config: &FetchConfig,
    categories: &[Category],
    source: Arc<dyn RemoteSource>,
    failures: Arc<FailureLog>,
) -> Result<ListingReport, AppError> {
    let pages: Vec<(usize, Category, Url)> = read_index(&config.index_file)?
        .into_iter()
        .enumerate()
        .map(|(order, url)| (order, Category::from_component_url(&url), url))
        .filter(|(_, category, url)| {
            let selected = categories.contains(category);
            if !selected {
                debug!(page = %url, %category, "Skipping listing page of unselected category");
            }
            selected
        })
        .collect();

    info!(pages = pages.len(), "Updating listings");

    let scheduler = WorkerScheduler::new(config.effective_workers())?;
    let policy = config.retry.clone();
    let job_source = source.clone();
    let job_failures = failures.clone();

    let results = scheduler
        .run_all(
            pages,
            |(order, category, page)| (*order, *category, page.clone()),
            move |(_, category, page)| {
                let source = job_source.clone();
                let failures = job_failures.clone();
                let policy = policy.clone();
                async move {
                    let outcome =
                        retry_transient(&policy, page.as_str(), || source.fetch_text(&page)).await;
                    let links = outcome.result.map(|html| extract_xpt_links(&html, &page));
                    if let Err(e) = &links {
                        warn!(page = %page, error = %e, "Listing page failed");
                        failures.record(
                            PipelineStage::Listing,
                            page.as_str(),
                            Some(category),
                            e,
                            outcome.attempts,
                        );
                    }
                    links
                }
            },
        )
        .await;

    let mut completed: Vec<PageResult> = Vec::new();
    let mut report = ListingReport::default();
    for ((order, category, page), result) in results {
        let links = match result {
            Ok(links) => links,
            Err(e) => {
                warn!(page = %page, error = %e, "Listing worker failed");
                failures.record(PipelineStage::Listing, page.as_str(), Some(category), &e, 1);
                Err(e)
            }
        };
        completed.push(PageResult {
            order,
            category,
            page,
            links,
        });
    }
    // Index order, so listing files do not depend on completion order.
    completed.sort_by_key(|r| r.order);

    let mut per_category: BTreeMap<Category, Vec<Url>> = BTreeMap::new();
    let mut broken: Vec<Category> = Vec::new();
    for result in completed {
        match result.links {
            Ok(links) => {
                let entry = per_category.entry(result.category).or_default();
                for link in links {
                    if !entry.contains(&link) {
                        entry.push(link);
                    }
                }
            }
            Err(_) => {
                report.failed_pages.push(result.page.to_string());
                if !broken.contains(&result.category) {
                    broken.push(result.category);
                }
            }
        }
    }

    for (category, links) in per_category {
        if broken.contains(&category) {
            continue;
        }
        let path = listing_path(&config.listing_dir, category);
        write_url_list(&path, &links)?;
        info!(%category, links = links.len(), path = %path.display(), "Listing written");
        report.links.insert(category, links.len());
    }
    report.not_refreshed = broken;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::fetch::HttpSource;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(temp_dir: &TempDir, index: &str) -> FetchConfig {
        let index_file = temp_dir.path().join("NHANES_URLS.txt");
        std::fs::write(&index_file, index).unwrap();
        FetchConfig {
            listing_dir: temp_dir.path().join("urls"),
            index_file,
            retry: RetryPolicy::immediate(1),
            ..FetchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_listings_written_per_selected_category() {
        let mock_server = MockServer::start().await;
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/search/datapage.aspx"))
            .and(query_param("Component", "Demographics"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="/Nchs/Nhanes/2017-2018/DEMO_J.XPT">x</a>
                   <a href="/Nchs/Nhanes/2015-2016/DEMO_I.XPT">y</a>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/datapage.aspx"))
            .and(query_param("Component", "Dietary"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<a href=\"/DR1TOT_J.XPT\">"))
            .expect(0)
            .mount(&mock_server)
            .await;

        let index = format!(
            "{0}/search/datapage.aspx?Component=Demographics\n{0}/search/datapage.aspx?Component=Dietary\n",
            mock_server.uri()
        );
        let config = config_for(&temp_dir, &index);
        let failures = Arc::new(FailureLog::open(temp_dir.path().join("failures.jsonl")).unwrap());
        let source: Arc<dyn RemoteSource> = Arc::new(HttpSource::new(&config).unwrap());

        let report = update_listings(&config, &[Category::Demographics], source, failures)
            .await
            .unwrap();

        assert_eq!(report.links.get(&Category::Demographics), Some(&2));
        let listing =
            std::fs::read_to_string(listing_path(&config.listing_dir, Category::Demographics)).unwrap();
        assert_eq!(listing.lines().count(), 2);
        assert!(listing.starts_with(&format!("{}/Nchs/Nhanes/2017-2018/DEMO_J.XPT", mock_server.uri())));
        assert!(!listing_path(&config.listing_dir, Category::Dietary).exists());
    }

    #[tokio::test]
    async fn test_failed_page_keeps_previous_listing() {
        let mock_server = MockServer::start().await;
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&mock_server)
            .await;

        let index = format!("{}/search/datapage.aspx?Component=Laboratory\n", mock_server.uri());
        let config = config_for(&temp_dir, &index);
        let previous = listing_path(&config.listing_dir, Category::Laboratory);
        std::fs::create_dir_all(&config.listing_dir).unwrap();
        std::fs::write(&previous, "https://example.org/GLU_J.XPT\n").unwrap();

        let failures = Arc::new(FailureLog::open(temp_dir.path().join("failures.jsonl")).unwrap());
        let source: Arc<dyn RemoteSource> = Arc::new(HttpSource::new(&config).unwrap());

        let report = update_listings(&config, &[Category::Laboratory], source, failures)
            .await
            .unwrap();

        assert_eq!(report.failed_pages.len(), 1);
        assert_eq!(report.not_refreshed, vec![Category::Laboratory]);
        assert_eq!(
            std::fs::read_to_string(&previous).unwrap(),
            "https://example.org/GLU_J.XPT\n"
        );
        let log = std::fs::read_to_string(temp_dir.path().join("failures.jsonl")).unwrap();
        assert!(log.contains("\"stage\":\"listing\""));
    }

    #[tokio::test]
    async fn test_missing_index_is_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let config = FetchConfig {
            index_file: temp_dir.path().join("absent.txt"),
            ..FetchConfig::default()
        };
        let failures = Arc::new(FailureLog::open(temp_dir.path().join("f.jsonl")).unwrap());
        let source: Arc<dyn RemoteSource> = Arc::new(HttpSource::new(&config).unwrap());

        let err = update_listings(&config, &Category::COMPONENTS, source, failures)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
