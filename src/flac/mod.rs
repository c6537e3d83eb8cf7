use std::path::PathBuf;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use console::style;
use thiserror::Error;

use crate::flac::io::Config;
use crate::flac::pool::{PageReport, WorkerPool};
use crate::flac::processor::{ItemProcessor, ProcessingTask};
use crate::flac::sender::{ApiError, CatalogSource};
use crate::flac::tui::page_progress_bar;

pub(crate) mod blacklist;
pub(crate) mod io;
pub(crate) mod pool;
pub(crate) mod processor;
pub(crate) mod resolver;
pub(crate) mod sender;
pub(crate) mod tui;

#[derive(Error, Debug)]
pub(crate) enum DispatchError {
    #[error("Catalog search for \"{keyword}\" failed on page {page}: {source}")]
    Search {
        keyword: String,
        page: u32,
        #[source]
        source: ApiError,
    },
}

pub(crate) type DispatchResult<T> = Result<T, DispatchError>;

/// Totals for a whole fetch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub keywords: usize,
    /// Every search request made, including the empty page that ends a keyword.
    pub pages: usize,
    pub tasks: usize,
    pub kept: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    fn absorb(&mut self, report: PageReport) {
        self.kept += report.kept;
        self.rejected += report.rejected;
        self.skipped += report.skipped + report.duplicates;
        self.failed += report.failed;
    }
}

/// Pages through the catalog keyword by keyword and hands every page to the worker pool.
pub(crate) struct Harvester {
    catalog: Arc<dyn CatalogSource>,
    processor: ItemProcessor,
    pool: WorkerPool,
    keywords: Vec<String>,
    page_size: u32,
    base_dir: PathBuf,
    unlock_code: String,
    page_cooldown: Duration,
    show_progress: bool,
}

impl Harvester {
    pub(crate) fn new(config: &Config, catalog: Arc<dyn CatalogSource>, processor: ItemProcessor, pool: WorkerPool) -> Self {
        Harvester {
            catalog,
            processor,
            pool,
            keywords: config.catalog.keywords.clone(),
            page_size: config.catalog.page_size,
            base_dir: config.save_dir(),
            unlock_code: config.catalog.unlock_code.clone(),
            page_cooldown: config.page_cooldown(),
            show_progress: true,
        }
    }

    /// Turns off the per-page progress bars.
    pub(crate) fn hide_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Runs every keyword to exhaustion.
    ///
    /// Pages of a keyword are requested from 1 upward until one comes back empty. A page is fully
    /// processed before the next is requested. A failed search ends the whole run.
    pub(crate) fn run(&self) -> DispatchResult<RunSummary> {
        let mut summary = RunSummary::default();

        for keyword in &self.keywords {
            info!("Searching for {}", style(keyword).cyan().bold());
            summary.keywords += 1;

            let mut page = 1;
            loop {
                let entries = self
                    .catalog
                    .search(keyword, page, self.page_size)
                    .map_err(|source| DispatchError::Search {
                        keyword: keyword.clone(),
                        page,
                        source,
                    })?;
                summary.pages += 1;

                if entries.is_empty() {
                    info!("\"{}\" exhausted after {} page(s)", keyword, page - 1);
                    break;
                }

                let tasks: Vec<ProcessingTask> = entries
                    .into_iter()
                    .map(|entry| ProcessingTask {
                        entry,
                        base_dir: self.base_dir.clone(),
                        unlock_code: self.unlock_code.clone(),
                        keyword: keyword.clone(),
                    })
                    .collect();
                summary.tasks += tasks.len();
                debug!("Page {} of \"{}\" has {} entries", page, keyword, tasks.len());

                let progress = page_progress_bar(tasks.len() as u64, keyword, page, self.show_progress);
                let report = self.pool.run_page(&self.processor, tasks, &progress);
                progress.finish_and_clear();
                info!(
                    "Page {} of \"{}\" done: {} kept, {} rejected, {} skipped, {} failed",
                    page,
                    keyword,
                    report.kept,
                    report.rejected,
                    report.skipped + report.duplicates,
                    report.failed
                );
                summary.absorb(report);

                sleep(self.page_cooldown);
                page += 1;
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flac::io::tags::ArtifactMetadata;
    use crate::flac::io::test_support::quiet_config;
    use crate::flac::processor::test_support::{FakeFetcher, FixedTags};
    use crate::flac::resolver::test_support::ScriptedEndpoint;
    use crate::flac::sender::entries::CatalogEntry;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::tempdir;

    /// Serves pages of the given sizes per keyword; any page past the list is empty.
    struct PagedCatalog {
        pages: HashMap<String, Vec<usize>>,
        failing: Option<String>,
        calls: Mutex<Vec<(String, u32)>>,
    }

    impl PagedCatalog {
        fn new(pages: &[(&str, &[usize])]) -> Self {
            PagedCatalog {
                pages: pages
                    .iter()
                    .map(|(keyword, sizes)| (keyword.to_string(), sizes.to_vec()))
                    .collect(),
                failing: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl CatalogSource for PagedCatalog {
        fn search(&self, keyword: &str, page: u32, _page_size: u32) -> Result<Vec<CatalogEntry>, ApiError> {
            self.calls.lock().unwrap().push((keyword.to_string(), page));
            if self.failing.as_deref() == Some(keyword) {
                return Err(ApiError::Api("search backend down".to_string()));
            }

            let size = self
                .pages
                .get(keyword)
                .and_then(|sizes| sizes.get(page as usize - 1))
                .copied()
                .unwrap_or(0);
            Ok((0..size)
                .map(|i| CatalogEntry {
                    id: format!("{keyword}-{page}-{i}"),
                    name: format!("track {page}-{i}"),
                    singers: vec![keyword.to_string()],
                    album_name: "album".to_string(),
                    pic_url: String::new(),
                })
                .collect())
        }
    }

    fn harvester(base: &std::path::Path, keywords: &[&str], catalog: Arc<PagedCatalog>) -> Harvester {
        let mut config = quiet_config(&base.to_string_lossy());
        config.catalog.keywords = keywords.iter().map(|k| k.to_string()).collect();
        config.worker_count = 2;

        let tags = ArtifactMetadata {
            title: String::new(),
            artist: keywords.join(" / "),
            album: "album".to_string(),
        };
        let processor = ItemProcessor::from_config(
            &config,
            Arc::new(ScriptedEndpoint::new(&[("flac", "http://cdn/track")])),
            Arc::new(FakeFetcher::default()),
            Arc::new(FixedTags(Some(tags))),
        );
        let pool = WorkerPool::new(config.worker_count, config.failure_penalty()).unwrap();

        Harvester::new(&config, catalog, processor, pool).hide_progress()
    }

    #[test]
    fn test_stops_keyword_at_first_empty_page() {
        let base = tempdir().unwrap();
        let catalog = Arc::new(PagedCatalog::new(&[("X", &[5, 5])]));

        let summary = harvester(base.path(), &["X"], catalog.clone()).run().unwrap();

        assert_eq!(
            *catalog.calls.lock().unwrap(),
            vec![("X".to_string(), 1), ("X".to_string(), 2), ("X".to_string(), 3)]
        );
        assert_eq!(summary.tasks, 10);
        assert_eq!(summary.kept, 10);
    }

    #[test]
    fn test_keywords_are_visited_in_order() {
        let base = tempdir().unwrap();
        let catalog = Arc::new(PagedCatalog::new(&[("X", &[3]), ("Y", &[])]));

        let summary = harvester(base.path(), &["X", "Y"], catalog.clone()).run().unwrap();

        assert_eq!(summary.tasks, 3);
        assert_eq!(summary.keywords, 2);
        assert_eq!(summary.pages, 3);
        assert_eq!(
            *catalog.calls.lock().unwrap(),
            vec![("X".to_string(), 1), ("X".to_string(), 2), ("Y".to_string(), 1)]
        );
    }

    #[test]
    fn test_second_run_skips_existing_files() {
        let base = tempdir().unwrap();
        let catalog = Arc::new(PagedCatalog::new(&[("X", &[2])]));
        let harvester = harvester(base.path(), &["X"], catalog);

        harvester.run().unwrap();
        let summary = harvester.run().unwrap();

        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.kept, 0);
    }

    #[test]
    fn test_search_error_is_fatal() {
        let base = tempdir().unwrap();
        let mut catalog = PagedCatalog::new(&[("X", &[1])]);
        catalog.failing = Some("Y".to_string());
        let catalog = Arc::new(catalog);

        let result = harvester(base.path(), &["X", "Y", "Z"], catalog.clone()).run();

        assert!(matches!(result, Err(DispatchError::Search { ref keyword, page: 1, .. }) if keyword == "Y"));
        assert!(!catalog.calls.lock().unwrap().iter().any(|(keyword, _)| keyword == "Z"));
    }

    #[test]
    fn test_cooldown_follows_every_non_empty_page() {
        let base = tempdir().unwrap();
        let catalog = Arc::new(PagedCatalog::new(&[("X", &[1, 1])]));
        let mut harvester = harvester(base.path(), &["X"], catalog);
        harvester.page_cooldown = Duration::from_millis(100);

        let started = Instant::now();
        let summary = harvester.run().unwrap();

        assert_eq!(summary.pages, 3);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_no_cooldown_after_empty_page() {
        let base = tempdir().unwrap();
        let catalog = Arc::new(PagedCatalog::new(&[("X", &[])]));
        let mut harvester = harvester(base.path(), &["X"], catalog);
        harvester.page_cooldown = Duration::from_secs(5);

        let started = Instant::now();
        let summary = harvester.run().unwrap();

        assert_eq!(summary.pages, 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
