//! Page handlers.

use bitserve::effects::CONTENT_TYPE;
use bitserve::query::Stored;
use bitserve::session::UserData;
use bitserve::{Headers, Interpreter, InterpreterExt, ServerError, Session, GENERIC_PUBLIC_MESSAGE};
use hyper::StatusCode;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{page, visible_episodes};
use crate::catalog::{with_progress, Collection, Episode, Plan};
use crate::collaborators::Coupon;
use crate::feed::{self, RSS_CONTENT_TYPE};
use crate::routes::Route;
use crate::views::{self, TeamSignup};
use crate::Site;

/// Episodes listed on the home page.
pub const RECENT_EPISODES: usize = 6;
/// Cache lifetime of fingerprinted assets, in seconds.
pub const ASSET_MAX_AGE: u64 = 31_536_000;

pub const NO_SUCH_COLLECTION: &str = "No such collection";
pub const NO_SUCH_EPISODE: &str = "No such episode";
pub const INVALID_SIGNUP_LINK: &str =
    "This signup link is invalid. Please get in touch with your team manager for a new one.";

pub fn home<I: Interpreter>(site: &Site) -> I {
    let site = site.clone();
    visible_episodes(&site, |catalog, user, now| {
        let mut episodes = catalog.scoped(user, now);
        episodes.truncate(RECENT_EPISODES);
        episodes
    })
    .finish(move |(session, episodes)| page(views::home(&site, session.as_ref(), &episodes)))
}

pub fn episodes<I: Interpreter>(site: &Site) -> I {
    let site = site.clone();
    visible_episodes(&site, |catalog, user, now| catalog.scoped(user, now))
        .finish(move |(session, episodes)| page(views::episodes(&site, session.as_ref(), &episodes)))
}

/// Public listing consumed by other tools.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeSummary {
    pub number: u32,
    pub title: String,
    pub synopsis: String,
    pub url: String,
    pub subscription_only: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub released_at: Option<OffsetDateTime>,
    pub duration_seconds: u32,
}

impl EpisodeSummary {
    fn new(base_url: &str, episode: &Episode) -> Self {
        Self {
            number: episode.number,
            title: episode.title.clone(),
            synopsis: episode.synopsis.clone(),
            url: feed::absolute(base_url, &Route::Episode(episode.slug.clone())),
            subscription_only: episode.subscription_only,
            released_at: episode.released_at,
            duration_seconds: episode.duration_seconds,
        }
    }
}

pub fn episodes_json<I: Interpreter>(site: &Site) -> I {
    let site = site.clone();
    I::with_session(move |session| {
        let user = session.as_ref().map(|s| &s.user.data);
        let summaries: Vec<EpisodeSummary> = site
            .catalog()
            .scoped(user, site.now())
            .iter()
            .map(|episode| EpisodeSummary::new(&site.base_url, episode))
            .collect();
        I::write_json(&summaries)
    })
}

pub fn rss_feed<I: Interpreter>(site: &Site) -> I {
    let mut headers = Headers::new();
    headers.insert(CONTENT_TYPE.into(), RSS_CONTENT_TYPE.into());
    let body = feed::rss(&site.catalog(), &site.base_url, site.now());
    I::write_text(body, StatusCode::OK, headers)
}

pub fn sitemap<I: Interpreter>(site: &Site) -> I {
    I::write(feed::sitemap(&site.catalog(), &site.base_url, site.now()))
}

/// A collection as listed in `collections.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub title: String,
    pub description: String,
    pub url: String,
    pub episode_count: usize,
}

impl CollectionSummary {
    fn new(base_url: &str, collection: Collection, episode_count: usize) -> Self {
        Self {
            url: feed::absolute(base_url, &Route::Collection(collection.slug)),
            title: collection.title,
            description: collection.description,
            episode_count,
        }
    }
}

pub fn collections_json<I: Interpreter>(site: &Site) -> I {
    let site = site.clone();
    I::with_session(move |session| {
        let user = session.as_ref().map(|s| &s.user.data);
        let summaries: Vec<CollectionSummary> = site
            .catalog()
            .visible_collections(user, site.now())
            .into_iter()
            .map(|(collection, count)| CollectionSummary::new(&site.base_url, collection, count))
            .collect();
        I::write_json(&summaries)
    })
}

pub fn collections<I: Interpreter>(site: &Site) -> I {
    let site = site.clone();
    I::with_session(move |session| {
        let user = session.as_ref().map(|s| &s.user.data);
        let collections = site.catalog().visible_collections(user, site.now());
        page(views::collections(&site, session.as_ref(), &collections))
    })
}

pub fn collection<I: Interpreter>(site: &Site, slug: &str) -> Result<I, ServerError> {
    let Some(collection) = site.catalog().collection(slug).cloned() else {
        return Err(ServerError::not_found(NO_SUCH_COLLECTION));
    };
    let site = site.clone();
    let shown = collection.clone();
    Ok(
        visible_episodes(&site, move |catalog, user, now| {
            catalog.collection_episodes(&collection, user, now)
        })
        .finish(move |(session, episodes)| {
            page(views::collection(&site, session.as_ref(), &shown, &episodes))
        }),
    )
}

pub fn episode<I: Interpreter>(site: &Site, slug: &str) -> Result<I, ServerError> {
    let Some(episode) = site.catalog().episode(slug).cloned() else {
        return Err(ServerError::not_found(NO_SUCH_EPISODE));
    };
    let site = site.clone();
    Ok(I::with_session(move |session: Option<Session>| {
        let admin = session.as_ref().is_some_and(|s| s.user.data.admin);
        if !admin && !episode.is_released(site.now()) {
            return I::not_found(NO_SUCH_EPISODE);
        }
        let user_id = session.as_ref().map(Session::user_id);
        with_progress(vec![episode.clone()], user_id).finish(move |progress| {
            let progress = progress.first().and_then(|item| item.progress);
            page(views::episode(&site, session.as_ref(), &episode, progress))
        })
    }))
}

/// The monthly and yearly plans every subscription page offers.
fn subscription_plans(site: &Site) -> Result<(Plan, Plan), ServerError> {
    let catalog = site.catalog();
    match (catalog.monthly(), catalog.yearly()) {
        (Some(monthly), Some(yearly)) => Ok((monthly.clone(), yearly.clone())),
        _ => Err(ServerError::new(
            format!("can't find monthly or yearly plan among {} plans", catalog.plans.len()),
            GENERIC_PUBLIC_MESSAGE,
        )),
    }
}

pub fn subscribe<I: Interpreter>(site: &Site) -> Result<I, ServerError> {
    let (monthly, yearly) = subscription_plans(site)?;
    let site = site.clone();
    Ok(I::with_session(move |session| {
        page(views::subscribe(&site, session.as_ref(), &monthly, &yearly))
    }))
}

pub fn subscribe_team<I: Interpreter>(site: &Site) -> Result<I, ServerError> {
    let (monthly, yearly) = subscription_plans(site)?;
    let site = site.clone();
    Ok(I::with_session(move |session| {
        page(views::subscribe_team(&site, session.as_ref(), &monthly, &yearly))
    }))
}

pub fn promo_code<I: Interpreter>(site: &Site, code: String) -> I {
    let task = site.billing.coupon(&code);
    let site = site.clone();
    I::await_or_fail(task, "Can't find that coupon.", move |coupon: Coupon| {
        I::catch(|| {
            if !coupon.is_redeemable() {
                return Err(ServerError::bad_request(
                    format!("coupon {code} is {}", coupon.state),
                    "This coupon is not redeemable anymore.",
                ));
            }
            let catalog = site.catalog();
            let (Some(monthly), Some(yearly)) = (catalog.monthly().cloned(), catalog.yearly().cloned())
            else {
                return Err(ServerError::new(
                    "plans not loaded",
                    "A small hiccup. Please try again in a little while.",
                ));
            };
            Ok(I::with_session(move |session| {
                page(views::promo_code(&site, session.as_ref(), &coupon, &monthly, &yearly))
            }))
        })
    })
}

pub fn team_member_signup<I: Interpreter>(site: &Site, token: Uuid) -> I {
    let site = site.clone();
    I::query_or_fail(
        Stored::<UserData>::select_by("team_token", token),
        move |manager| {
            let Some(manager) = manager else {
                return I::write_error(
                    ServerError::new(format!("signup token doesn't exist: {token}"), INVALID_SIGNUP_LINK)
                        .with_status(StatusCode::NOT_FOUND),
                );
            };
            I::with_session(move |session| {
                let state = match &session {
                    None => TeamSignup::SignIn,
                    Some(s) if s.user_id() == manager.id && s.self_premium_access() => {
                        TeamSignup::AlreadyInTeam
                    }
                    Some(s) if s.self_premium_access() => TeamSignup::SelfSubscribed,
                    Some(s) if s.is_team_member_of(manager.id) => TeamSignup::AlreadyInTeam,
                    Some(_) => TeamSignup::SignedIn,
                };
                page(views::team_member_signup(&site, session.as_ref(), &manager, state))
            })
        },
    )
}

/// Serve a file from the static root. Fingerprinted names are cached for a
/// year; anything else is served without caching directives.
pub fn static_file<I: Interpreter>(site: &Site, parts: &[String]) -> I {
    let name = parts.join("/");
    match site.assets.resolve(&name) {
        Some(file) => I::write_file(file.to_string(), Some(ASSET_MAX_AGE)),
        None => I::write_file(name, None),
    }
}
