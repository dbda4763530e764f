//! Machine-readable listings: the RSS feed and the sitemap.

use bitserve::html::escape;
use std::fmt::Write;
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

use crate::catalog::Catalog;
use crate::routes::Route;
use crate::views::SITE_NAME;

pub const RSS_CONTENT_TYPE: &str = "application/rss+xml; charset=utf-8";

/// `route` as an absolute URL under `base_url`.
pub fn absolute(base_url: &str, route: &Route) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), route.path())
}

/// Released episodes as an RSS 2.0 channel, newest first.
pub fn rss(catalog: &Catalog, base_url: &str, now: OffsetDateTime) -> String {
    let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel>"#);
    let _ = write!(
        out,
        "<title>{}</title><link>{}</link><description>New episodes of {}</description>",
        escape(SITE_NAME),
        escape(&absolute(base_url, &Route::Home)),
        escape(SITE_NAME),
    );
    for episode in catalog.scoped(None, now) {
        let link = escape(&absolute(base_url, &Route::Episode(episode.slug.clone())));
        let _ = write!(
            out,
            "<item><title>{}</title><link>{link}</link><guid>{link}</guid><description>{}</description>",
            escape(&episode.title),
            escape(&episode.synopsis),
        );
        if let Some(released) = episode.released_at.and_then(|at| at.format(&Rfc2822).ok()) {
            let _ = write!(out, "<pubDate>{released}</pubDate>");
        }
        out.push_str("</item>");
    }
    out.push_str("</channel></rss>");
    out
}

/// Every public page, one absolute URL per line.
pub fn sitemap(catalog: &Catalog, base_url: &str, now: OffsetDateTime) -> String {
    let mut routes = vec![
        Route::Home,
        Route::Episodes,
        Route::Collections,
        Route::Subscribe,
        Route::SubscribeTeam,
    ];
    routes.extend(
        catalog
            .visible_collections(None, now)
            .into_iter()
            .map(|(collection, _)| Route::Collection(collection.slug)),
    );
    routes.extend(
        catalog
            .scoped(None, now)
            .into_iter()
            .map(|episode| Route::Episode(episode.slug)),
    );
    routes
        .iter()
        .map(|route| absolute(base_url, route) + "\n")
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Episode;
    use time::macros::datetime;

    fn catalog() -> Catalog {
        let episode = |number: u32, slug: &str, released_at| Episode {
            number,
            slug: slug.into(),
            title: format!("Tips & tricks {number}"),
            synopsis: "<b>bold</b>".into(),
            subscription_only: false,
            released_at,
            collections: Vec::new(),
            duration_seconds: 60,
        };
        Catalog {
            episodes: vec![
                episode(1, "one", Some(datetime!(2024-01-02 10:00 UTC))),
                episode(2, "two", None),
            ],
            ..Catalog::default()
        }
    }

    #[test]
    fn feed_lists_released_episodes_escaped() {
        let feed = rss(&catalog(), "https://example.com/", datetime!(2024-06-01 0:00 UTC));
        assert!(feed.contains("<link>https://example.com/episodes/one</link>"));
        assert!(feed.contains("<title>Tips &amp; tricks 1</title>"));
        assert!(feed.contains("&lt;b&gt;bold&lt;/b&gt;"));
        assert!(feed.contains("<pubDate>Tue, 02 Jan 2024 10:00:00 +0000</pubDate>"));
        assert!(!feed.contains("episodes/two"));
    }

    #[test]
    fn sitemap_skips_unreleased_episodes() {
        let sitemap = sitemap(&catalog(), "https://example.com", datetime!(2024-06-01 0:00 UTC));
        let lines: Vec<&str> = sitemap.lines().collect();
        assert_eq!(lines[0], "https://example.com/");
        assert!(lines.contains(&"https://example.com/episodes/one"));
        assert!(!lines.contains(&"https://example.com/episodes/two"));
    }
}
