//! HTML extraction for search result pages and posting detail pages.

use chrono::{DateTime, Utc};
use jobscout_core::error::AppError;
use jobscout_core::models::{PostingRecord, compute_hash};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::cleaner::DescriptionCleaner;
use crate::profile::BoardProfile;

/// Company name used when a posting doesn't show one.
pub const UNKNOWN_COMPANY: &str = "Unknown Company";

fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::ExtractionError(format!("Bad selector {css}: {e}")))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Detail-page URLs of the postings on a search results page, in page order.
///
/// Links are resolved against `page_url`. Cards without a usable link are
/// skipped with a warning; repeated links are collapsed.
pub fn card_links(html: &str, profile: &BoardProfile, page_url: &Url) -> Result<Vec<Url>, AppError> {
    let document = Html::parse_document(html);
    let card_selector = selector(profile.card)?;
    let link_selector = selector(profile.link)?;

    let mut links: Vec<Url> = Vec::new();
    for (index, card) in document.select(&card_selector).enumerate() {
        let href = card
            .select(&link_selector)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty());

        let Some(href) = href else {
            tracing::warn!(source = %profile.kind, card = index, "Skipping card without a link");
            continue;
        };

        match page_url.join(href) {
            Ok(url) if !links.contains(&url) => links.push(url),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(source = %profile.kind, card = index, %href, error = %e, "Skipping card with invalid link");
            }
        }
    }

    Ok(links)
}

/// Posting id for a detail URL.
///
/// Prefers the board's id query parameter, then the last non-empty path
/// segment (query string ignored), then a hash of the whole URL.
pub fn posting_id(url: &Url, id_param: Option<&str>) -> String {
    if let Some(param) = id_param
        && let Some((_, value)) = url.query_pairs().find(|(k, v)| k == param && !v.is_empty())
    {
        return value.into_owned();
    }

    url.path_segments()
        .and_then(|segments| segments.rev().find(|s| !s.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| compute_hash(url.as_str())[..16].to_string())
}

/// Build a record from a posting detail page.
///
/// Fails with [`AppError::ExtractionError`] when the title or description is
/// missing; a missing company becomes [`UNKNOWN_COMPANY`].
pub fn parse_detail(
    html: &str,
    profile: &BoardProfile,
    url: &Url,
    cleaner: &DescriptionCleaner,
    fetched_at: DateTime<Utc>,
) -> Result<PostingRecord, AppError> {
    let document = Html::parse_document(html);

    let title = document
        .select(&selector(profile.title)?)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::ExtractionError(format!("No title on {url}")))?;

    let company = document
        .select(&selector(profile.company)?)
        .next()
        .map(element_text)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| UNKNOWN_COMPANY.to_string());

    let description_html = document
        .select(&selector(profile.description)?)
        .next()
        .map(|e| e.inner_html())
        .ok_or_else(|| AppError::ExtractionError(format!("No description on {url}")))?;
    let description = cleaner.to_text(&description_html)?;
    if description.is_empty() {
        return Err(AppError::ExtractionError(format!("Empty description on {url}")));
    }

    Ok(PostingRecord {
        source: profile.kind.as_str().to_string(),
        id: posting_id(url, profile.id_param),
        title,
        company,
        description,
        url: url.to_string(),
        fetched_at,
    })
}
