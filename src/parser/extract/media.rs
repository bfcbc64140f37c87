use std::sync::LazyLock;

use scraper::{ElementRef, Selector};

use super::{ExtractError, MediaCounts};

static IMAGES: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());
static VIDEOS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("video").unwrap());

/// Count media in the description container.
///
/// Each embedded video carries a poster `img`, so the raw image count
/// includes one match per video. Those are subtracted out; a page with
/// more videos than images breaks that assumption and is reported rather
/// than clamped to zero.
pub fn count(container: ElementRef<'_>) -> Result<MediaCounts, ExtractError> {
    let images = container.select(&IMAGES).count();
    let videos = container.select(&VIDEOS).count();

    let deduped = images
        .checked_sub(videos)
        .ok_or(ExtractError::MediaUnderflow { images, videos })?;

    Ok(MediaCounts {
        images: deduped,
        videos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn count_in(fragment: &str) -> Result<MediaCounts, ExtractError> {
        let html = format!(r#"<div class="full-description">{}</div>"#, fragment);
        let doc = Html::parse_document(&html);
        let sel = Selector::parse("div.full-description").unwrap();
        count(doc.select(&sel).next().unwrap())
    }

    #[test]
    fn images_only() {
        let c = count_in(r#"<img src="a"><p><img src="b"></p>"#).unwrap();
        assert_eq!(c, MediaCounts { images: 2, videos: 0 });
    }

    #[test]
    fn poster_images_not_double_counted() {
        let c = count_in(
            r#"<img src="a"><video><img src="poster1"></video><video><img src="poster2"></video>"#,
        )
        .unwrap();
        assert_eq!(c, MediaCounts { images: 1, videos: 2 });
    }

    #[test]
    fn empty_container() {
        assert_eq!(count_in("").unwrap(), MediaCounts { images: 0, videos: 0 });
    }

    #[test]
    fn more_videos_than_images() {
        let err = count_in(r#"<video></video><video><img src="p"></video>"#).unwrap_err();
        assert_eq!(err, ExtractError::MediaUnderflow { images: 1, videos: 2 });
    }
}
