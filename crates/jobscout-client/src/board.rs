use chrono::Utc;
use jobscout_core::error::AppError;
use jobscout_core::models::PostingRecord;
use jobscout_core::traits::{JobSource, SourceFactory, SourceKind};

use crate::cleaner::DescriptionCleaner;
use crate::listing;
use crate::profile::BoardProfile;
use crate::session::{PageSession, SessionConfig};

/// A job board adapter: a [`BoardProfile`] driven through a [`PageSession`].
pub struct BoardSource {
    profile: &'static BoardProfile,
    session: PageSession,
    cleaner: DescriptionCleaner,
}

impl BoardSource {
    pub fn new(kind: SourceKind, session: PageSession, cleaner: DescriptionCleaner) -> Self {
        Self {
            profile: BoardProfile::for_kind(kind),
            session,
            cleaner,
        }
    }
}

impl JobSource for BoardSource {
    fn kind(&self) -> SourceKind {
        self.profile.kind
    }

    async fn fetch(
        &self,
        query: &str,
        location: &str,
        count: usize,
    ) -> Result<Vec<PostingRecord>, AppError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let profile = self.profile;
        let search_url = profile.search_url(query, location)?;
        tracing::info!(source = %profile.kind, url = %search_url, "Loading search results");

        let results = self
            .session
            .load(search_url.as_str(), profile.container)
            .await?;
        let links = listing::card_links(&results, profile, &search_url)?;
        tracing::debug!(source = %profile.kind, cards = links.len(), "Found posting links");

        let mut records = Vec::with_capacity(count.min(links.len()));
        for link in links {
            if records.len() >= count {
                break;
            }

            let page = match self.session.load(link.as_str(), profile.title).await {
                Ok(page) => page,
                Err(e) if e.is_rate_limit() => return Err(e),
                Err(e) => {
                    tracing::warn!(source = %profile.kind, url = %link, error = %e, "Skipping posting");
                    continue;
                }
            };

            match listing::parse_detail(&page, profile, &link, &self.cleaner, Utc::now()) {
                Ok(record) => {
                    tracing::debug!(source = %profile.kind, title = %record.title, "Extracted posting");
                    records.push(record);
                }
                Err(e) => {
                    tracing::warn!(source = %profile.kind, url = %link, error = %e, "Skipping posting");
                }
            }
        }

        Ok(records)
    }

    async fn close(self) {
        self.session.close().await;
    }
}

/// Opens a fresh [`PageSession`] for every adapter it creates.
#[derive(Clone, Default)]
pub struct BoardSourceFactory {
    config: SessionConfig,
    cleaner: DescriptionCleaner,
}

impl BoardSourceFactory {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            cleaner: DescriptionCleaner::new(),
        }
    }
}

impl SourceFactory for BoardSourceFactory {
    type Source = BoardSource;

    async fn create(&self, kind: SourceKind) -> Result<BoardSource, AppError> {
        let session = PageSession::open(&self.config).await?;
        tracing::debug!(source = %kind, browser = self.config.browser, "Opened page session");
        Ok(BoardSource::new(kind, session, self.cleaner.clone()))
    }
}
