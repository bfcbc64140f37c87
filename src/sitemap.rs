use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use quick_xml::events::Event;
use regex::Regex;
use reqwest::Client;
use tracing::{info, warn};

static PROJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?kickstarter\.com/projects/[^/?#]+/([^/?#]+)/?$").unwrap()
});

/// What a sitemap document lists.
#[derive(Debug, PartialEq, Eq)]
pub enum Sitemap {
    /// Page URLs (`<urlset>`).
    Urls(Vec<String>),
    /// Child sitemaps (`<sitemapindex>`).
    Index(Vec<String>),
}

/// Read a newline-delimited URL list. Blank lines and `#` comments are
/// skipped; duplicates keep their first position.
pub fn load_url_file(path: &Path) -> Result<Vec<(String, String)>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL list {}", path.display()))?;
    let pages = parse_url_list(&text);
    info!("Loaded {} URLs from {}", pages.len(), path.display());
    Ok(pages)
}

pub fn parse_url_list(text: &str) -> Vec<(String, String)> {
    let urls = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from);
    dedup_with_slugs(urls)
}

/// Fetch a sitemap (following one level of sitemap index) and keep the
/// campaign project pages.
pub async fn fetch_project_urls(client: &Client, sitemap_url: &str) -> Result<Vec<(String, String)>> {
    info!("Fetching sitemap: {}", sitemap_url);
    let urls = match parse_sitemap(&fetch_text(client, sitemap_url).await?)? {
        Sitemap::Urls(urls) => urls,
        Sitemap::Index(children) => {
            info!("Sitemap index with {} children", children.len());
            let mut all = Vec::new();
            for child in children {
                let xml = fetch_text(client, &child).await?;
                match parse_sitemap(&xml)? {
                    Sitemap::Urls(urls) => all.extend(urls),
                    Sitemap::Index(_) => warn!("Skipping nested sitemap index {}", child),
                }
            }
            all
        }
    };
    info!("Total URLs in sitemap: {}", urls.len());

    let projects = dedup_with_slugs(urls.into_iter().filter(|u| PROJECT_RE.is_match(u)));
    info!("Campaign pages after filtering: {}", projects.len());
    Ok(projects)
}

async fn fetch_text(client: &Client, url: &str) -> Result<String> {
    client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
        .with_context(|| format!("Failed to fetch sitemap {}", url))
}

/// Parse a `urlset` or `sitemapindex` document and return its `<loc>` URLs.
pub fn parse_sitemap(xml: &str) -> Result<Sitemap> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut locs = Vec::new();
    let mut is_index = false;
    let mut in_entry = false;
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sitemapindex" => is_index = true,
                b"url" | b"sitemap" => in_entry = true,
                b"loc" if in_entry => in_loc = true,
                _ => {}
            },
            Ok(Event::Text(e)) if in_loc => {
                let loc = e.unescape()?.trim().to_string();
                if !loc.is_empty() {
                    locs.push(loc);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"loc" => in_loc = false,
                b"url" | b"sitemap" => in_entry = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }

    Ok(if is_index {
        Sitemap::Index(locs)
    } else {
        Sitemap::Urls(locs)
    })
}

fn dedup_with_slugs(urls: impl Iterator<Item = String>) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    urls.filter(|u| seen.insert(u.clone()))
        .map(|u| {
            let slug = slug_for(&u);
            (u, slug)
        })
        .collect()
}

/// Project segment for campaign URLs, else the last path segment, else
/// the host.
pub fn slug_for(url: &str) -> String {
    if let Some(caps) = PROJECT_RE.captures(url) {
        return caps[1].to_string();
    }
    let rest = url.split("//").nth(1).unwrap_or(url);
    let path = rest.split(['?', '#']).next().unwrap_or(rest);
    let mut parts = path.split('/').filter(|s| !s.is_empty());
    let host = parts.next().unwrap_or("").trim_start_matches("www.");
    parts.last().unwrap_or(host).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_list_skips_noise_and_dedups() {
        let text = "\n# batch one\nhttps://www.kickstarter.com/projects/a/first\n  https://www.kickstarter.com/projects/b/second  \n\nhttps://www.kickstarter.com/projects/a/first\n";
        let pages = parse_url_list(text);
        assert_eq!(
            pages,
            vec![
                ("https://www.kickstarter.com/projects/a/first".to_string(), "first".to_string()),
                ("https://www.kickstarter.com/projects/b/second".to_string(), "second".to_string()),
            ]
        );
    }

    #[test]
    fn slugs() {
        assert_eq!(slug_for("https://www.kickstarter.com/projects/maker/robot-kit"), "robot-kit");
        assert_eq!(slug_for("https://kickstarter.com/projects/maker/robot-kit/"), "robot-kit");
        assert_eq!(slug_for("https://example.com/campaigns/42?ref=home"), "42");
        assert_eq!(slug_for("https://www.example.com/"), "example.com");
    }

    #[test]
    fn urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://www.kickstarter.com/projects/a/one</loc><lastmod>2019-01-01</lastmod></url>
  <url><loc> https://www.kickstarter.com/projects/b/two?ref=x&amp;src=y </loc></url>
</urlset>"#;
        assert_eq!(
            parse_sitemap(xml).unwrap(),
            Sitemap::Urls(vec![
                "https://www.kickstarter.com/projects/a/one".into(),
                "https://www.kickstarter.com/projects/b/two?ref=x&src=y".into(),
            ])
        );
    }

    #[test]
    fn sitemap_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://www.kickstarter.com/sitemap/projects-1.xml</loc></sitemap>
</sitemapindex>"#;
        assert_eq!(
            parse_sitemap(xml).unwrap(),
            Sitemap::Index(vec!["https://www.kickstarter.com/sitemap/projects-1.xml".into()])
        );
    }

    #[test]
    fn malformed_xml() {
        assert!(parse_sitemap("<urlset><url><loc>x</url></urlset>").is_err());
    }

    #[tokio::test]
    async fn follows_index_and_filters_projects() {
        let child = crate::fetcher::tests::serve(vec![(
            "/child.xml",
            "200 OK",
            r#"<urlset>
  <url><loc>https://www.kickstarter.com/projects/a/one</loc></url>
  <url><loc>https://www.kickstarter.com/discover/categories/games</loc></url>
  <url><loc>https://www.kickstarter.com/projects/b/two</loc></url>
  <url><loc>https://www.kickstarter.com/projects/a/one</loc></url>
</urlset>"#,
        )])
        .await;
        let index: &'static str = Box::leak(
            format!(
                "<sitemapindex><sitemap><loc>{}/child.xml</loc></sitemap></sitemapindex>",
                child
            )
            .into_boxed_str(),
        );
        let base = crate::fetcher::tests::serve(vec![("/sitemap.xml", "200 OK", index)]).await;
        let client = Client::new();

        let pages = fetch_project_urls(&client, &format!("{}/sitemap.xml", base)).await.unwrap();
        assert_eq!(
            pages,
            vec![
                ("https://www.kickstarter.com/projects/a/one".to_string(), "one".to_string()),
                ("https://www.kickstarter.com/projects/b/two".to_string(), "two".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_sitemap_is_an_error() {
        let base = crate::fetcher::tests::serve(vec![]).await;
        let client = Client::new();
        assert!(fetch_project_urls(&client, &format!("{}/sitemap.xml", base)).await.is_err());
    }
}
