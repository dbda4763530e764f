//! Page templates.
//!
//! Views only build node trees; every link goes through [`Route::path`].

use bitserve::query::Stored;
use bitserve::session::UserData;
use bitserve::{Node, Session};

use crate::catalog::{Collection, Episode, EpisodeWithProgress, Plan};
use crate::collaborators::Coupon;
use crate::routes::Route;
use crate::Site;

pub const SITE_NAME: &str = "Bitserve Screencasts";
const STYLESHEET: &str = "app.css";

/// What the team signup page tells the visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamSignup {
    SignIn,
    SignedIn,
    SelfSubscribed,
    AlreadyInTeam,
}

fn layout(site: &Site, session: Option<&Session>, current: &Route, title: &str, content: Vec<Node>) -> Node {
    let account = match session {
        Some(session) => Node::text(format!("Signed in as {}", display_name(&session.user.data))),
        None => Node::link(
            Route::Login {
                origin: Some(current.path()),
            }
            .path(),
            vec![Node::text("Log in")],
        ),
    };
    let nav = Node::element(
        "nav",
        Vec::new(),
        vec![
            Node::link(Route::Home.path(), vec![Node::text(SITE_NAME)]),
            Node::link(Route::Episodes.path(), vec![Node::text("Episodes")]),
            Node::link(Route::Collections.path(), vec![Node::text("Collections")]),
            Node::link(Route::Subscribe.path(), vec![Node::text("Subscribe")]),
            account,
        ],
    );
    let stylesheet = Route::StaticFile(vec![site.assets.public_name(STYLESHEET).to_string()]);
    let mut body = vec![
        Node::element(
            "link",
            vec![("rel", "stylesheet".to_string()), ("href", stylesheet.path())],
            Vec::new(),
        ),
        nav,
    ];
    body.push(Node::element("main", Vec::new(), content));
    Node::document(format!("{title} | {SITE_NAME}"), body)
}

fn display_name(user: &UserData) -> &str {
    user.name
        .as_deref()
        .or(user.github_login.as_deref())
        .unwrap_or(user.email.as_str())
}

fn episode_item(item: &EpisodeWithProgress) -> Node {
    let episode = &item.episode;
    let mut children = vec![
        Node::link(
            Route::Episode(episode.slug.clone()).path(),
            vec![Node::text(format!("#{} {}", episode.number, episode.title))],
        ),
        Node::text(format!(" {}", episode.pretty_duration())),
    ];
    if episode.subscription_only {
        children.push(Node::element(
            "span",
            vec![("class", "badge".to_string())],
            vec![Node::text("Subscribers only")],
        ));
    }
    if let Some(progress) = item.progress {
        children.push(Node::element(
            "span",
            vec![("class", "progress".to_string())],
            vec![Node::text(format!("Continue at {}:{:02}", progress / 60, progress % 60))],
        ));
    }
    Node::div("episode", children)
}

pub fn home(site: &Site, session: Option<&Session>, recent: &[EpisodeWithProgress]) -> Node {
    let mut content = vec![Node::h1(SITE_NAME), Node::h2("Latest episodes")];
    content.push(Node::ul(recent.iter().map(episode_item).collect()));
    content.push(Node::link(Route::Episodes.path(), vec![Node::text("All episodes")]));
    layout(site, session, &Route::Home, "Home", content)
}

pub fn episodes(site: &Site, session: Option<&Session>, episodes: &[EpisodeWithProgress]) -> Node {
    let content = vec![
        Node::h1("All episodes"),
        Node::ul(episodes.iter().map(episode_item).collect()),
    ];
    layout(site, session, &Route::Episodes, "Episodes", content)
}

pub fn collections(site: &Site, session: Option<&Session>, collections: &[(Collection, usize)]) -> Node {
    let items = collections
        .iter()
        .map(|(collection, count)| {
            let noun = if *count == 1 { "episode" } else { "episodes" };
            Node::p(vec![
                Node::link(
                    Route::Collection(collection.slug.clone()).path(),
                    vec![Node::text(&collection.title)],
                ),
                Node::text(format!(" {count} {noun}")),
            ])
        })
        .collect();
    let content = vec![Node::h1("Collections"), Node::ul(items)];
    layout(site, session, &Route::Collections, "Collections", content)
}

pub fn collection(
    site: &Site,
    session: Option<&Session>,
    collection: &Collection,
    episodes: &[EpisodeWithProgress],
) -> Node {
    let content = vec![
        Node::h1(&collection.title),
        Node::p(vec![Node::text(&collection.description)]),
        Node::ul(episodes.iter().map(episode_item).collect()),
    ];
    let route = Route::Collection(collection.slug.clone());
    layout(site, session, &route, &collection.title, content)
}

pub fn episode(site: &Site, session: Option<&Session>, episode: &Episode, progress: Option<u32>) -> Node {
    let mut content = vec![
        Node::h1(format!("#{} {}", episode.number, episode.title)),
        Node::p(vec![Node::text(&episode.synopsis)]),
    ];
    let locked = episode.subscription_only && !session.is_some_and(Session::premium_access);
    if locked {
        content.push(Node::p(vec![
            Node::text("This episode is for subscribers. "),
            Node::link(Route::Subscribe.path(), vec![Node::text("Become a subscriber")]),
        ]));
    } else {
        let start = progress.unwrap_or(0);
        content.push(Node::element(
            "div",
            vec![
                ("class", "player".to_string()),
                ("data-episode", episode.number.to_string()),
                ("data-start", start.to_string()),
            ],
            Vec::new(),
        ));
    }
    let route = Route::Episode(episode.slug.clone());
    layout(site, session, &route, &episode.title, content)
}

fn plan_item(plan: &Plan, coupon: Option<&Coupon>) -> Node {
    let mut text = format!("{}: {} every {}", plan.name, plan.pretty_price(), plan.pretty_duration());
    if let Some(percent) = coupon.and_then(|coupon| coupon.discount_percent) {
        text.push_str(&format!(" ({percent}% off)"));
    }
    Node::div("plan", vec![Node::text(text)])
}

fn sign_in_form(origin: &Route) -> Node {
    Node::form(
        Route::Login { origin: None }.path(),
        "get",
        vec![
            Node::input("hidden", "origin", origin.path()),
            Node::submit("Sign in with GitHub"),
        ],
    )
}

pub fn subscribe(site: &Site, session: Option<&Session>, monthly: &Plan, yearly: &Plan) -> Node {
    let mut content = vec![
        Node::h1("Subscribe"),
        plan_item(monthly, None),
        plan_item(yearly, None),
    ];
    match session {
        None => content.push(sign_in_form(&Route::Subscribe)),
        Some(session) if session.premium_access() => {
            content.push(Node::p(vec![Node::text("You already have access to every episode.")]))
        }
        Some(_) => content.push(Node::p(vec![Node::text(
            "Pick a plan to start your subscription.",
        )])),
    }
    content.push(Node::p(vec![
        Node::text("Buying for several people? "),
        Node::link(Route::SubscribeTeam.path(), vec![Node::text("Subscribe your team")]),
    ]));
    layout(site, session, &Route::Subscribe, "Subscribe", content)
}

pub fn subscribe_team(site: &Site, session: Option<&Session>, monthly: &Plan, yearly: &Plan) -> Node {
    let mut content = vec![
        Node::h1("Subscribe your team"),
        Node::p(vec![Node::text(
            "A team subscription is billed per member. Once subscribed, share your signup link and every member who joins through it gets full access.",
        )]),
        plan_item(monthly, None),
        plan_item(yearly, None),
    ];
    if session.is_none() {
        content.push(sign_in_form(&Route::SubscribeTeam));
    }
    layout(site, session, &Route::SubscribeTeam, "Subscribe your team", content)
}

pub fn promo_code(
    site: &Site,
    session: Option<&Session>,
    coupon: &Coupon,
    monthly: &Plan,
    yearly: &Plan,
) -> Node {
    let mut content = vec![
        Node::h1(format!("Promo code {}", coupon.coupon_code)),
        Node::p(vec![Node::text(&coupon.description)]),
        plan_item(monthly, Some(coupon)),
        plan_item(yearly, Some(coupon)),
    ];
    if session.is_none() {
        content.push(sign_in_form(&Route::PromoCode(coupon.coupon_code.clone())));
    }
    let route = Route::PromoCode(coupon.coupon_code.clone());
    layout(site, session, &route, "Promo code", content)
}

pub fn team_member_signup(
    site: &Site,
    session: Option<&Session>,
    manager: &Stored<UserData>,
    state: TeamSignup,
) -> Node {
    let route = Route::TeamMemberSignup(manager.data.team_token);
    let manager_name = display_name(&manager.data);
    let message = match state {
        TeamSignup::SignIn => format!("Sign in to join {manager_name}'s team."),
        TeamSignup::SignedIn => format!(
            "Joining {manager_name}'s team gives you access to every episode while their subscription lasts."
        ),
        TeamSignup::SelfSubscribed => {
            "You already have an active subscription, so there is no need to join a team.".to_string()
        }
        TeamSignup::AlreadyInTeam => "You are already part of this team.".to_string(),
    };
    let mut content = vec![Node::h1("Join a team"), Node::p(vec![Node::text(message)])];
    if state == TeamSignup::SignIn {
        content.push(sign_in_form(&route));
    }
    layout(site, session, &route, "Join a team", content)
}
