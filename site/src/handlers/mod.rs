// Route handlers
//
// Each handler is generic over the interpreter and builds the complete
// effect tree for one request. Errors returned while building are rendered
// by the dispatcher; errors inside continuations are rendered in place.

pub mod auth;
pub mod pages;
pub mod webhook;

use bitserve::session::UserData;
use bitserve::{Interpreter, Node, ServerError, Session, Step};
use hyper::StatusCode;
use time::OffsetDateTime;

use crate::catalog::{with_progress, Catalog, Episode, EpisodeWithProgress};
use crate::routes::Route;
use crate::Site;

/// Build the handler for `route`.
pub fn interpret<I: Interpreter>(site: &Site, route: Route) -> Result<I, ServerError> {
    match route {
        Route::Home => Ok(pages::home(site)),
        Route::Episodes => Ok(pages::episodes(site)),
        Route::EpisodesJson => Ok(pages::episodes_json(site)),
        Route::RssFeed => Ok(pages::rss_feed(site)),
        Route::Collections => Ok(pages::collections(site)),
        Route::CollectionsJson => Ok(pages::collections_json(site)),
        Route::Collection(slug) => pages::collection(site, &slug),
        Route::Episode(slug) => pages::episode(site, &slug),
        Route::Subscribe => pages::subscribe(site),
        Route::SubscribeTeam => pages::subscribe_team(site),
        Route::Sitemap => Ok(pages::sitemap(site)),
        Route::PromoCode(code) => Ok(pages::promo_code(site, code)),
        Route::TeamMemberSignup(token) => Ok(pages::team_member_signup(site, token)),
        Route::StaticFile(parts) => Ok(pages::static_file(site, &parts)),
        Route::Login { origin } => Ok(auth::login(site, origin.as_deref())),
        Route::GithubCallback { code, origin } => auth::github_callback(site, code, origin),
        Route::RecurlyWebhook => Ok(webhook::recurly(site)),
        Route::GithubWebhook => Ok(webhook::github(site)),
    }
}

pub(crate) fn page<I: Interpreter>(node: Node) -> I {
    I::write_html(node, StatusCode::OK)
}

/// The visitor's session and the episodes `select` picks for them, with
/// play progress attached.
pub(crate) fn visible_episodes<I, F>(
    site: &Site,
    select: F,
) -> Step<I, (Option<Session>, Vec<EpisodeWithProgress>)>
where
    I: Interpreter,
    F: FnOnce(&Catalog, Option<&UserData>, OffsetDateTime) -> Vec<Episode> + Send + 'static,
{
    let catalog = site.catalog();
    let now = site.now();
    Step::session().and_then(move |session: Option<Session>| {
        let episodes = select(&catalog, session.as_ref().map(|s| &s.user.data), now);
        let user_id = session.as_ref().map(Session::user_id);
        with_progress(episodes, user_id).map(move |episodes| (session, episodes))
    })
}
