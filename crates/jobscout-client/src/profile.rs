//! Per-board search URLs and CSS selectors.
//!
//! A fetch is two hops: the search results page (wait for `container`,
//! collect `link` hrefs from each `card`), then one detail page per posting
//! (read `title`, `company`, `description`).

use jobscout_core::error::AppError;
use jobscout_core::traits::SourceKind;
use url::Url;

/// Everything needed to query one job board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardProfile {
    pub kind: SourceKind,
    search_base: &'static str,
    query_param: &'static str,
    location_param: &'static str,
    /// Results list on the search page. Its absence means the page did not load.
    pub container: &'static str,
    pub card: &'static str,
    /// Anchor inside a card pointing at the posting's detail page.
    pub link: &'static str,
    pub title: &'static str,
    pub company: &'static str,
    pub description: &'static str,
    /// Query parameter carrying the posting id, for boards whose detail URLs
    /// don't end in the id.
    pub id_param: Option<&'static str>,
}

const INDEED: BoardProfile = BoardProfile {
    kind: SourceKind::Indeed,
    search_base: "https://www.indeed.com/jobs",
    query_param: "q",
    location_param: "l",
    container: "#mosaic-provider-jobcards, .jobsearch-ResultsList",
    card: ".job_seen_beacon",
    link: "h2.jobTitle a, a.jcs-JobTitle",
    title: ".jobsearch-JobInfoHeader-title",
    company: ".jobsearch-CompanyInfoContainer",
    description: "#jobDescriptionText",
    id_param: Some("jk"),
};

const LINKEDIN: BoardProfile = BoardProfile {
    kind: SourceKind::LinkedIn,
    search_base: "https://www.linkedin.com/jobs/search/",
    query_param: "keywords",
    location_param: "location",
    container: ".jobs-search__results-list, .scaffold-layout__list",
    card: ".job-card-container, .base-card",
    link: "a.job-card-container__link, a.base-card__full-link",
    title: ".jobs-unified-top-card__job-title, .top-card-layout__title",
    company: ".jobs-unified-top-card__company-name, .topcard__org-name-link",
    description: ".jobs-description__content, .show-more-less-html__markup",
    id_param: None,
};

const GLASSDOOR: BoardProfile = BoardProfile {
    kind: SourceKind::Glassdoor,
    search_base: "https://www.glassdoor.com/Job/jobs.htm",
    query_param: "sc.keyword",
    location_param: "sc.location",
    container: "[data-test=\"jobListing\"], .jobsList",
    card: ".jobCard",
    link: "a.jobLink, a[data-test=\"job-title\"]",
    title: ".job-title, [data-test=\"job-title\"]",
    company: ".employer-name, [data-test=\"employer-name\"]",
    description: ".jobDescriptionContent",
    id_param: Some("jobListingId"),
};

impl BoardProfile {
    pub fn for_kind(kind: SourceKind) -> &'static BoardProfile {
        match kind {
            SourceKind::Indeed => &INDEED,
            SourceKind::LinkedIn => &LINKEDIN,
            SourceKind::Glassdoor => &GLASSDOOR,
        }
    }

    /// Search results URL with `query` and `location` form-encoded.
    pub fn search_url(&self, query: &str, location: &str) -> Result<Url, AppError> {
        Url::parse_with_params(
            self.search_base,
            &[
                (self.query_param, query.trim()),
                (self.location_param, location.trim()),
            ],
        )
        .map_err(|e| AppError::Generic(format!("Invalid search URL for {}: {e}", self.kind)))
    }
}
