//! Request routing.
//!
//! A [`Route`] is parsed once from the method, path and query string and
//! consumed once by a handler. [`Route::path`] renders it back, so pages
//! link through routes and tests can map link targets back to them.

use hyper::Method;
use std::fmt::Write;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Episodes,
    EpisodesJson,
    RssFeed,
    Collections,
    CollectionsJson,
    Collection(String),
    Episode(String),
    Subscribe,
    SubscribeTeam,
    Sitemap,
    TeamMemberSignup(Uuid),
    PromoCode(String),
    Login { origin: Option<String> },
    GithubCallback { code: Option<String>, origin: Option<String> },
    StaticFile(Vec<String>),
    RecurlyWebhook,
    GithubWebhook,
}

impl Route {
    /// Map a request to a route; `None` means not found.
    pub fn parse(method: &Method, path: &str, query: Option<&str>) -> Option<Route> {
        let segments: Vec<String> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(percent_decode)
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let params = query.map(query_params).unwrap_or_default();
        let param = |name: &str| {
            params
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        };

        if *method == Method::POST {
            return match segments.as_slice() {
                ["webhooks", "recurly"] => Some(Route::RecurlyWebhook),
                ["webhooks", "github"] => Some(Route::GithubWebhook),
                _ => None,
            };
        }
        if *method != Method::GET {
            return None;
        }

        let route = match segments.as_slice() {
            [] => Route::Home,
            ["episodes"] => Route::Episodes,
            ["episodes.json"] => Route::EpisodesJson,
            ["episodes.rss"] => Route::RssFeed,
            ["episodes", slug] => Route::Episode(slug.to_string()),
            ["collections"] => Route::Collections,
            ["collections.json"] => Route::CollectionsJson,
            ["collections", slug] => Route::Collection(slug.to_string()),
            ["subscribe"] => Route::Subscribe,
            ["subscribe-team"] => Route::SubscribeTeam,
            ["sitemap"] => Route::Sitemap,
            ["join", token] => Route::TeamMemberSignup(Uuid::parse_str(token).ok()?),
            ["promo", code] => Route::PromoCode(code.to_string()),
            ["login"] => Route::Login {
                origin: param("origin"),
            },
            ["github-callback"] => Route::GithubCallback {
                code: param("code"),
                origin: param("origin"),
            },
            ["static", rest @ ..] if !rest.is_empty() => {
                Route::StaticFile(rest.iter().map(|s| s.to_string()).collect())
            }
            _ => return None,
        };
        Some(route)
    }

    pub fn method(&self) -> Method {
        match self {
            Route::RecurlyWebhook | Route::GithubWebhook => Method::POST,
            _ => Method::GET,
        }
    }

    /// The URL of this route, path plus query string.
    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".into(),
            Route::Episodes => "/episodes".into(),
            Route::EpisodesJson => "/episodes.json".into(),
            Route::RssFeed => "/episodes.rss".into(),
            Route::Collections => "/collections".into(),
            Route::CollectionsJson => "/collections.json".into(),
            Route::Collection(slug) => format!("/collections/{}", percent_encode(slug)),
            Route::Episode(slug) => format!("/episodes/{}", percent_encode(slug)),
            Route::Subscribe => "/subscribe".into(),
            Route::SubscribeTeam => "/subscribe-team".into(),
            Route::Sitemap => "/sitemap".into(),
            Route::TeamMemberSignup(token) => format!("/join/{token}"),
            Route::PromoCode(code) => format!("/promo/{}", percent_encode(code)),
            Route::Login { origin } => with_query("/login", &[("origin", origin)]),
            Route::GithubCallback { code, origin } => {
                with_query("/github-callback", &[("code", code), ("origin", origin)])
            }
            Route::StaticFile(parts) => {
                let mut path = String::from("/static");
                for part in parts {
                    path.push('/');
                    path.push_str(&percent_encode(part));
                }
                path
            }
            Route::RecurlyWebhook => "/webhooks/recurly".into(),
            Route::GithubWebhook => "/webhooks/github".into(),
        }
    }
}

fn with_query(path: &str, params: &[(&str, &Option<String>)]) -> String {
    let mut url = path.to_string();
    let mut separator = '?';
    for (name, value) in params {
        if let Some(value) = value {
            url.push(separator);
            url.push_str(name);
            url.push('=');
            url.push_str(&percent_encode(value));
            separator = '&';
        }
    }
    url
}

/// Decode `%XX` escapes. Malformed escapes are kept literally.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let (high, low) = (bytes[i + 1], bytes[i + 2]);
            if high.is_ascii_hexdigit() && low.is_ascii_hexdigit() {
                decoded.push((hex_value(high) << 4) | hex_value(low));
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// Escape everything but unreserved characters.
pub fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            encoded.push(byte as char);
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

/// Split a query string into decoded name/value pairs. `+` is a space.
pub fn query_params(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                percent_decode(&name.replace('+', " ")),
                percent_decode(&value.replace('+', " ")),
            )
        })
        .collect()
}

/// Where to send the user after signing in.
///
/// Only a local path is honoured: the origin must percent-decode to a path
/// starting with a single `/`. Protocol-relative targets (`//host`,
/// `/\host`) and anything carrying control characters fall back to `/`.
pub fn safe_destination(origin: &str) -> String {
    let decoded = percent_decode(origin);
    let local = decoded.starts_with('/')
        && !decoded.starts_with("//")
        && !decoded.starts_with("/\\")
        && !decoded.chars().any(char::is_control);
    if local {
        decoded
    } else {
        "/".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str) -> Option<Route> {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };
        Route::parse(&Method::GET, path, query)
    }

    #[test]
    fn pages_parse_from_get_requests() {
        assert_eq!(get("/"), Some(Route::Home));
        assert_eq!(get("/episodes/"), Some(Route::Episodes));
        assert_eq!(get("/episodes.json"), Some(Route::EpisodesJson));
        assert_eq!(get("/collections/swift%20ui"), Some(Route::Collection("swift ui".into())));
        assert_eq!(
            get("/login?origin=%2Fsubscribe"),
            Some(Route::Login {
                origin: Some("/subscribe".into())
            })
        );
        assert_eq!(
            get("/static/css/app.css"),
            Some(Route::StaticFile(vec!["css".into(), "app.css".into()]))
        );
        assert_eq!(get("/join/not-a-token"), None);
        assert_eq!(get("/nowhere"), None);
    }

    #[test]
    fn webhooks_only_accept_post() {
        assert_eq!(
            Route::parse(&Method::POST, "/webhooks/recurly", None),
            Some(Route::RecurlyWebhook)
        );
        assert_eq!(get("/webhooks/recurly"), None);
        assert_eq!(Route::parse(&Method::POST, "/episodes", None), None);
        assert_eq!(Route::parse(&Method::DELETE, "/", None), None);
    }

    #[test]
    fn malformed_escapes_are_kept() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz%41"), "%zzA");
        assert_eq!(percent_decode("%4"), "%4");
    }

    #[test]
    fn destinations_must_be_local_paths() {
        assert_eq!(safe_destination("%2Fepisodes%2Fone"), "/episodes/one");
        assert_eq!(safe_destination("https://evil.example"), "/");
        assert_eq!(safe_destination("%2F%2Fevil.example"), "/");
        assert_eq!(safe_destination("/\\evil.example"), "/");
        assert_eq!(safe_destination("/ok%0D%0ASet-Cookie:x"), "/");
        assert_eq!(safe_destination(""), "/");
    }
}
