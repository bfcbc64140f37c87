use std::sync::LazyLock;

use scraper::{ElementRef, Selector};

static TEXT_BLOCKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p, ul").unwrap());

/// Join the text of every paragraph and list in the container, in document
/// order. Nested matches are visited too, so a `p` inside a `ul` shows up
/// both on its own and within the list's text.
pub fn extract(container: ElementRef<'_>) -> String {
    container
        .select(&TEXT_BLOCKS)
        .map(|block| block.text().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}
