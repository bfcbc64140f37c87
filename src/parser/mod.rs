pub mod extract;

use serde::Serialize;

use crate::db::{ExtractionRow, ScrapedPage};
use extract::{PageOutcome, ERROR_PREFIX};

/// How a row ended up in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Parsed,
    MissingDescription,
    ParseFailure,
    FetchFailure,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 4] = [
        OutcomeKind::Parsed,
        OutcomeKind::MissingDescription,
        OutcomeKind::ParseFailure,
        OutcomeKind::FetchFailure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Parsed => "parsed",
            OutcomeKind::MissingDescription => "missing_description",
            OutcomeKind::ParseFailure => "parse_failure",
            OutcomeKind::FetchFailure => "fetch_failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Parse and fetch failures. A missing description is not one.
    pub fn is_failure(self) -> bool {
        matches!(self, OutcomeKind::ParseFailure | OutcomeKind::FetchFailure)
    }
}

/// Fetched page → table row. A page whose fetch failed becomes a
/// fetch-failure row without touching the extractor.
pub fn process_page(page: &ScrapedPage) -> ExtractionRow {
    match (&page.html, &page.error) {
        (Some(html), None) => build_row(page, extract::extract(html)),
        (_, error) => {
            let message = error.clone().unwrap_or_else(|| "empty response body".to_string());
            ExtractionRow {
                page_id: page.page_id,
                url: page.url.clone(),
                slug: page.slug.clone(),
                outcome: OutcomeKind::FetchFailure,
                description: format!("{}{}", ERROR_PREFIX, message),
                image_count: None,
                video_count: None,
                pledge_amounts: None,
                error: Some(message),
            }
        }
    }
}

pub fn build_row(page: &ScrapedPage, outcome: PageOutcome) -> ExtractionRow {
    let description = outcome.description_text();
    let base = ExtractionRow {
        page_id: page.page_id,
        url: page.url.clone(),
        slug: page.slug.clone(),
        outcome: OutcomeKind::MissingDescription,
        description,
        image_count: None,
        video_count: None,
        pledge_amounts: None,
        error: None,
    };

    match outcome {
        PageOutcome::Parsed(p) => ExtractionRow {
            outcome: OutcomeKind::Parsed,
            image_count: Some(p.media.images),
            video_count: Some(p.media.videos),
            pledge_amounts: p.pledges,
            ..base
        },
        PageOutcome::MissingDescription => base,
        PageOutcome::ParseFailure(msg) => ExtractionRow {
            outcome: OutcomeKind::ParseFailure,
            error: Some(msg),
            ..base
        },
    }
}
