pub mod description;
pub mod media;
pub mod pledges;

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use thiserror::Error;

static FULL_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.full-description").unwrap());

pub const MISSING_DESCRIPTION: &str = "Missing Description";
pub const ERROR_PREFIX: &str = "This Error: ";

/// Faults that turn a whole page into a parse failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no digit in money text {0:?}")]
    NoDigit(String),
    #[error("reward tier {0} has no money element")]
    MissingMoney(usize),
    #[error("amount {0:?} does not fit in an integer")]
    AmountOverflow(String),
    #[error("ambiguous digit grouping in money text {0:?}")]
    AmbiguousGrouping(String),
    #[error("image/video de-duplication underflow: {images} images, {videos} videos")]
    MediaUnderflow { images: usize, videos: usize },
}

/// Media inside the description container. Images exclude the poster
/// frames nested in videos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaCounts {
    pub images: usize,
    pub videos: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignPage {
    pub description: String,
    pub media: MediaCounts,
    /// `None` when the page has no reward section at all.
    pub pledges: Option<Vec<u64>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Parsed(CampaignPage),
    MissingDescription,
    ParseFailure(String),
}

impl PageOutcome {
    /// Flattened `description` column: the text, or a sentinel.
    pub fn description_text(&self) -> String {
        match self {
            PageOutcome::Parsed(page) => page.description.clone(),
            PageOutcome::MissingDescription => MISSING_DESCRIPTION.to_string(),
            PageOutcome::ParseFailure(msg) => format!("{}{}", ERROR_PREFIX, msg),
        }
    }
}

/// Extract one campaign page. Never fails: every fault is folded into the
/// returned outcome, and nothing from a failed page leaks into it.
pub fn extract(html: &str) -> PageOutcome {
    let document = Html::parse_document(html);

    let Some(container) = document.select(&FULL_DESCRIPTION).next() else {
        return PageOutcome::MissingDescription;
    };

    match parse_campaign(&document, container) {
        Ok(page) => PageOutcome::Parsed(page),
        Err(e) => PageOutcome::ParseFailure(e.to_string()),
    }
}

fn parse_campaign(document: &Html, container: ElementRef<'_>) -> Result<CampaignPage, ExtractError> {
    let description = description::extract(container);
    let media = media::count(container)?;
    let pledges = pledges::extract(document)?;

    Ok(CampaignPage {
        description,
        media,
        pledges,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    fn parsed(outcome: PageOutcome) -> CampaignPage {
        match outcome {
            PageOutcome::Parsed(page) => page,
            other => panic!("expected a parsed page, got {:?}", other),
        }
    }

    #[test]
    fn hello_world_page() {
        let html = r#"
            <html><body>
              <div class="full-description">
                <p>Hello</p>
                <div class="video-player">
                  <video src="intro.mp4"><img src="poster.jpg"></video>
                </div>
                <p>World</p>
              </div>
              <div class="NS_projects__rewards_list">
                <div class="pledge__info"><h2><span class="money">$10</span></h2></div>
                <div class="pledge__info"><h2><span class="money">$2,000</span></h2></div>
              </div>
            </body></html>"#;

        let page = parsed(extract(html));
        assert_eq!(page.description, "Hello\nWorld");
        assert_eq!(page.media, MediaCounts { images: 0, videos: 1 });
        assert_eq!(page.pledges, Some(vec![10, 2000]));
    }

    #[test]
    fn missing_container_ignores_rest_of_page() {
        let html = r#"
            <div class="description"><p>Not the right container</p></div>
            <div class="pledge__info"><span class="money">$5</span></div>
            <div class="pledge__info"><span class="money">TBD</span></div>"#;
        assert_eq!(extract(html), PageOutcome::MissingDescription);
        assert_eq!(extract(html).description_text(), "Missing Description");
    }

    #[test]
    fn empty_document() {
        assert_eq!(extract(""), PageOutcome::MissingDescription);
    }

    #[test]
    fn bad_tier_fails_whole_page() {
        let html = r#"
            <div class="full-description"><p>Already parsed text</p><img src="a.png"></div>
            <div class="pledge__info"><span class="money">$25</span></div>
            <div class="pledge__info"><span class="money">TBD</span></div>
            <div class="pledge__info"><span class="money">$50</span></div>"#;
        let outcome = extract(html);
        assert_eq!(
            outcome,
            PageOutcome::ParseFailure("no digit in money text \"TBD\"".to_string())
        );
        assert_eq!(outcome.description_text(), "This Error: no digit in money text \"TBD\"");
    }

    #[test]
    fn tier_without_money_element() {
        let html = r#"
            <div class="full-description"><p>x</p></div>
            <div class="pledge__info"><span class="money">$1</span></div>
            <div class="pledge__info"><h2>Pledge without amount</h2></div>"#;
        assert_eq!(
            extract(html),
            PageOutcome::ParseFailure("reward tier 2 has no money element".to_string())
        );
    }

    #[test]
    fn bare_video_is_flagged_not_clamped() {
        let html = r#"<div class="full-description"><p>x</p><video src="v.mp4"></video></div>"#;
        assert_eq!(
            extract(html),
            PageOutcome::ParseFailure(
                "image/video de-duplication underflow: 0 images, 1 videos".to_string()
            )
        );
    }

    #[test]
    fn idempotent() {
        let html = fixture("campaign");
        assert_eq!(extract(&html), extract(&html));
    }

    #[test]
    fn campaign_fixture() {
        let page = parsed(extract(&fixture("campaign")));
        assert!(page.description.starts_with("Tabletop terrain"));
        assert_eq!(page.description.lines().count(), 5);
        assert_eq!(page.media, MediaCounts { images: 2, videos: 1 });
        assert_eq!(page.pledges, Some(vec![1, 25, 60, 1250]));
    }

    #[test]
    fn no_description_fixture() {
        assert_eq!(extract(&fixture("no_description")), PageOutcome::MissingDescription);
    }

    #[test]
    fn bad_pledge_fixture() {
        let outcome = extract(&fixture("bad_pledge"));
        assert!(matches!(&outcome, PageOutcome::ParseFailure(msg) if msg.contains("Coming soon")));
    }

    #[test]
    fn no_reward_section_is_absent() {
        let html = r#"<div class="full-description"><p>Only text</p></div>"#;
        assert_eq!(parsed(extract(html)).pledges, None);
    }

    #[test]
    fn empty_reward_section_is_empty() {
        let html = r#"
            <div class="full-description"><p>Only text</p></div>
            <ol class="js-project-rewards"></ol>"#;
        assert_eq!(parsed(extract(html)).pledges, Some(vec![]));
    }
}
