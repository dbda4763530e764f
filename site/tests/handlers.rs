//! Handler tests against the capturing interpreter.
//!
//! Queries are answered by an in-memory pool applied synchronously, tasks by
//! stubs keyed on the task name.

use bitserve::database::MemoryPool;
use bitserve::effects::task_value;
use bitserve::query::{Statement, Stored};
use bitserve::session::{SessionData, UserData};
use bitserve::{Captured, Outcome, Session, TaskError, Terminal, TestExecutor};
use bitserve_site::catalog::{Catalog, Collection, Episode, IntervalUnit, Plan};
use bitserve_site::collaborators::{GithubProfile, SubscriptionStatus, ACCESS_TOKEN, PROFILE, SEND_EMAIL, SUBSCRIPTION_STATUS};
use bitserve_site::gift::GiftData;
use bitserve_site::handlers::pages::{ASSET_MAX_AGE, INVALID_SIGNUP_LINK, NO_SUCH_COLLECTION};
use bitserve_site::{dispatch, Assets, RequestHead, Route, Site, REFRESH_CATALOG};
use hyper::{Method, StatusCode};
use serde_json::json;
use time::macros::datetime;
use time::OffsetDateTime;
use uuid::Uuid;

fn now() -> OffsetDateTime {
    datetime!(2024-05-01 12:00 UTC)
}

fn episode(number: u32, slug: &str, subscription_only: bool, released_at: Option<OffsetDateTime>) -> Episode {
    Episode {
        number,
        slug: slug.into(),
        title: format!("Episode {number}"),
        synopsis: format!("All about {slug}"),
        subscription_only,
        released_at,
        collections: vec!["basics".into()],
        duration_seconds: 900,
    }
}

fn plan(code: &str, length: u32) -> Plan {
    Plan {
        plan_code: code.into(),
        name: code.into(),
        interval_unit: IntervalUnit::Months,
        interval_length: length,
        unit_amount_cents: 1500 * length,
    }
}

fn catalog() -> Catalog {
    Catalog {
        episodes: vec![
            episode(1, "first-steps", false, Some(datetime!(2024-01-10 9:00 UTC))),
            episode(2, "going-further", true, Some(datetime!(2024-03-10 9:00 UTC))),
            episode(3, "coming-soon", true, Some(datetime!(2024-09-10 9:00 UTC))),
        ],
        collections: vec![
            Collection {
                slug: "basics".into(),
                title: "Basics".into(),
                description: "Start here.".into(),
            },
            Collection {
                slug: "advanced".into(),
                title: "Advanced".into(),
                description: String::new(),
            },
        ],
        plans: vec![plan("monthly", 1), plan("yearly", 12), plan("gift-3-months", 3)],
    }
}

fn site() -> Site {
    Site::with_catalog(catalog()).with_clock(now)
}

fn session(user: UserData) -> Session {
    Session {
        session_id: Uuid::new_v4(),
        user: Stored {
            id: Uuid::new_v4(),
            data: user,
        },
        team_manager: None,
    }
}

fn executor(pool: &MemoryPool) -> TestExecutor {
    let pool = pool.clone();
    TestExecutor::new().with_queries(move |statement| pool.apply(statement))
}

fn request(site: &Site, executor: &mut TestExecutor, route: &Route) -> Outcome {
    executor.run(dispatch::<Captured>(site, &RequestHead::for_route(route)))
}

fn updates<'a>(outcome: &'a Outcome, table: &str) -> Vec<&'a Statement> {
    outcome
        .all_queries()
        .into_iter()
        .filter(|statement| statement.is_update() && statement.table() == table)
        .collect()
}

fn assert_empty_text(terminal: &Terminal, expected: StatusCode) {
    match terminal {
        Terminal::Text { body, status, .. } => {
            assert_eq!(*status, expected);
            assert!(body.is_empty(), "unexpected body {body:?}");
        }
        other => panic!("expected a text write, got {other:?}"),
    }
}

#[test]
fn signed_out_pages_render_without_queries() {
    let pool = MemoryPool::default();
    let outcome = request(&site(), &mut executor(&pool), &Route::Episodes);

    assert_eq!(outcome.terminal.status(), StatusCode::OK);
    assert!(outcome.queries().is_empty());
    let body = outcome.terminal.body_text();
    assert!(body.contains("Episode 2"));
    assert!(!body.contains("Episode 3"), "unreleased episodes stay hidden");
    let login = Route::Login {
        origin: Some("/episodes".into()),
    };
    assert!(outcome.terminal.link_targets().contains(&login.path()));
}

#[test]
fn signed_in_pages_attach_play_progress() {
    let pool = MemoryPool::default();
    let visitor = session(UserData::new("dev@example.com"));
    pool.seed(
        "play_progress",
        [json!({
            "id": Uuid::new_v4(),
            "user_id": visitor.user_id(),
            "episode_number": 1,
            "progress": 125,
            "furthest_watched": 300,
        })
        .as_object()
        .cloned()
        .unwrap()],
    );
    let mut executor = executor(&pool).with_session(Some(visitor));
    let outcome = request(&site(), &mut executor, &Route::Home);

    assert_eq!(outcome.queries().len(), 1);
    assert_eq!(outcome.queries()[0].table(), "play_progress");
    assert!(outcome.terminal.body_text().contains("Continue at 2:05"));
}

#[test]
fn every_link_on_a_page_is_a_route() {
    let pool = MemoryPool::default();
    let site = site();
    for route in [Route::Home, Route::Episodes, Route::Collections, Route::Collection("basics".into())] {
        let outcome = request(&site, &mut executor(&pool), &route);
        let targets = outcome.terminal.link_targets();
        assert!(!targets.is_empty());
        for target in targets {
            let (path, query) = match target.split_once('?') {
                Some((path, query)) => (path, Some(query)),
                None => (target.as_str(), None),
            };
            assert!(
                Route::parse(&Method::GET, path, query).is_some(),
                "{target} on {route:?} is not a route"
            );
        }
    }
}

#[test]
fn unknown_collection_is_a_not_found_page() {
    let pool = MemoryPool::default();
    let outcome = request(&site(), &mut executor(&pool), &Route::Collection("missing".into()));

    assert_eq!(outcome.terminal.status(), StatusCode::NOT_FOUND);
    assert!(outcome.terminal.body_text().contains(NO_SUCH_COLLECTION));
    assert!(outcome.trace.is_empty());
}

#[test]
fn collections_without_visible_episodes_are_hidden() {
    let pool = MemoryPool::default();
    let outcome = request(&site(), &mut executor(&pool), &Route::Collections);
    let targets = outcome.terminal.link_targets();
    assert!(targets.contains(&Route::Collection("basics".into()).path()));
    assert!(!targets.contains(&Route::Collection("advanced".into()).path()));
}

#[test]
fn subscription_only_episodes_ask_visitors_to_subscribe() {
    let pool = MemoryPool::default();
    let route = Route::Episode("going-further".into());
    let outcome = request(&site(), &mut executor(&pool), &route);
    let body = outcome.terminal.body_text();
    assert!(body.contains("This episode is for subscribers."));
    assert!(!body.contains("class=\"player\""));

    let mut subscriber = UserData::new("sub@example.com");
    subscriber.subscriber = true;
    let mut executor = executor(&pool).with_session(Some(session(subscriber)));
    let outcome = request(&site(), &mut executor, &route);
    assert!(outcome.terminal.body_text().contains("class=\"player\""));
}

#[test]
fn unreleased_episodes_are_not_found() {
    let pool = MemoryPool::default();
    let outcome = request(&site(), &mut executor(&pool), &Route::Episode("coming-soon".into()));
    assert_eq!(outcome.terminal.status(), StatusCode::NOT_FOUND);
}

#[test]
fn signed_out_subscribe_page_offers_a_login_form() {
    let pool = MemoryPool::default();
    let outcome = request(&site(), &mut executor(&pool), &Route::Subscribe);
    let forms = outcome.terminal.forms();

    assert_eq!(forms.len(), 1);
    assert_eq!(forms[0].action, "/login");
    assert_eq!(forms[0].method, "get");
    assert_eq!(forms[0].inputs, vec![("origin".to_string(), "/subscribe".to_string())]);
}

#[test]
fn missing_plans_fail_at_dispatch_with_a_public_message() {
    let site = Site::with_catalog(Catalog::default());
    let pool = MemoryPool::default();
    let outcome = request(&site, &mut executor(&pool), &Route::Subscribe);

    assert_eq!(outcome.terminal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = outcome.terminal.body_text();
    assert!(body.contains(bitserve::GENERIC_PUBLIC_MESSAGE));
    assert!(!body.contains("monthly or yearly"));
}

#[test]
fn signed_out_team_page_returns_to_itself_after_login() {
    let pool = MemoryPool::default();
    let outcome = request(&site(), &mut executor(&pool), &Route::SubscribeTeam);

    assert_eq!(outcome.terminal.status(), StatusCode::OK);
    assert!(outcome.terminal.body_text().contains("Subscribe your team"));
    let forms = outcome.terminal.forms();
    assert_eq!(forms.len(), 1);
    assert_eq!(forms[0].inputs, vec![("origin".to_string(), "/subscribe-team".to_string())]);

    let mut signed_in = executor(&pool).with_session(Some(session(UserData::new("dev@example.com"))));
    let outcome = request(&site(), &mut signed_in, &Route::SubscribeTeam);
    assert!(outcome.terminal.forms().is_empty());
}

#[test]
fn team_page_without_plans_is_a_server_error() {
    let site = Site::with_catalog(Catalog::default());
    let pool = MemoryPool::default();
    let outcome = request(&site, &mut executor(&pool), &Route::SubscribeTeam);
    assert_eq!(outcome.terminal.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn collections_json_lists_visible_collections() {
    let pool = MemoryPool::default();
    let outcome = request(&site(), &mut executor(&pool), &Route::CollectionsJson);

    match &outcome.terminal {
        Terminal::Text { headers, .. } => {
            assert_eq!(headers.get("Content-Type").map(String::as_str), Some("application/json"));
        }
        other => panic!("expected a text write, got {other:?}"),
    }
    let listed: serde_json::Value = serde_json::from_str(&outcome.terminal.body_text()).unwrap();
    assert_eq!(
        listed,
        json!([{
            "title": "Basics",
            "description": "Start here.",
            "url": "http://localhost:8080/collections/basics",
            "episode_count": 2,
        }])
    );
}

#[test]
fn rss_feed_lists_released_episodes_newest_first() {
    let pool = MemoryPool::default();
    let outcome = request(&site(), &mut executor(&pool), &Route::RssFeed);

    match &outcome.terminal {
        Terminal::Text { status, headers, .. } => {
            assert_eq!(*status, StatusCode::OK);
            assert_eq!(
                headers.get("Content-Type").map(String::as_str),
                Some("application/rss+xml; charset=utf-8")
            );
        }
        other => panic!("expected a text write, got {other:?}"),
    }
    let body = outcome.terminal.body_text();
    let second = body.find("<title>Episode 2</title>").unwrap();
    let first = body.find("<title>Episode 1</title>").unwrap();
    assert!(second < first);
    assert!(!body.contains("Episode 3"));
    assert!(outcome.queries().is_empty());
}

#[test]
fn sitemap_lists_public_pages() {
    let pool = MemoryPool::default();
    let outcome = request(&site(), &mut executor(&pool), &Route::Sitemap);
    let body = outcome.terminal.body_text();
    let lines: Vec<&str> = body.lines().collect();

    assert!(lines.contains(&"http://localhost:8080/subscribe-team"));
    assert!(lines.contains(&"http://localhost:8080/collections/basics"));
    assert!(lines.contains(&"http://localhost:8080/episodes/going-further"));
    assert!(!lines.contains(&"http://localhost:8080/collections/advanced"));
    assert!(!lines.contains(&"http://localhost:8080/episodes/coming-soon"));
}

#[test]
fn fingerprinted_assets_are_cached_for_a_year() {
    let site = site().with_assets(Assets::new([("app-3f2a1c.css".to_string(), "app.css".to_string())]));
    let pool = MemoryPool::default();

    let hashed = request(&site, &mut executor(&pool), &Route::StaticFile(vec!["app-3f2a1c.css".into()]));
    assert_eq!(
        hashed.terminal,
        Terminal::File {
            path: "app.css".into(),
            max_age: Some(ASSET_MAX_AGE),
        }
    );

    let plain = request(&site, &mut executor(&pool), &Route::StaticFile(vec!["img".into(), "logo.svg".into()]));
    assert_eq!(
        plain.terminal,
        Terminal::File {
            path: "img/logo.svg".into(),
            max_age: None,
        }
    );
}

mod team_signup {
    use super::*;

    fn manager(pool: &MemoryPool) -> Stored<UserData> {
        let mut data = UserData::new("boss@example.com");
        data.subscriber = true;
        let manager = Stored {
            id: Uuid::new_v4(),
            data,
        };
        pool.seed_record(&manager).unwrap();
        manager
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        let pool = MemoryPool::default();
        let outcome = request(&site(), &mut executor(&pool), &Route::TeamMemberSignup(Uuid::new_v4()));
        assert_eq!(outcome.terminal.status(), StatusCode::NOT_FOUND);
        assert!(outcome.terminal.body_text().contains(INVALID_SIGNUP_LINK));
    }

    #[test]
    fn signed_out_visitors_are_asked_to_sign_in() {
        let pool = MemoryPool::default();
        let manager = manager(&pool);
        let route = Route::TeamMemberSignup(manager.data.team_token);
        let outcome = request(&site(), &mut executor(&pool), &route);

        assert_eq!(outcome.terminal.status(), StatusCode::OK);
        let forms = outcome.terminal.forms();
        assert_eq!(forms[0].inputs, vec![("origin".to_string(), route.path())]);
    }

    #[test]
    fn subscribers_do_not_need_a_team() {
        let pool = MemoryPool::default();
        let manager = manager(&pool);
        let mut subscriber = UserData::new("sub@example.com");
        subscriber.subscriber = true;
        let mut executor = executor(&pool).with_session(Some(session(subscriber)));
        let outcome = request(&site(), &mut executor, &Route::TeamMemberSignup(manager.data.team_token));
        assert!(outcome.terminal.body_text().contains("already have an active subscription"));
    }

    #[test]
    fn members_are_told_they_already_joined() {
        let pool = MemoryPool::default();
        let manager = manager(&pool);
        let mut member = session(UserData::new("dev@example.com"));
        member.team_manager = Some(manager.clone());
        let mut executor = executor(&pool).with_session(Some(member));
        let outcome = request(&site(), &mut executor, &Route::TeamMemberSignup(manager.data.team_token));
        assert!(outcome.terminal.body_text().contains("already part of this team"));
    }
}

mod sign_in {
    use super::*;

    fn stub_github(executor: TestExecutor) -> TestExecutor {
        executor.with_tasks(|description| match description.name.as_str() {
            ACCESS_TOKEN => task_value(Some("token".to_string())),
            PROFILE => task_value(GithubProfile {
                id: 42,
                login: "octo".into(),
                email: Some("octo@example.com".into()),
                avatar_url: "https://example.com/octo.png".into(),
                name: None,
            }),
            _ => Err(TaskError::Stub(format!("unexpected task {description}"))),
        })
    }

    fn callback(origin: &str) -> Route {
        Route::GithubCallback {
            code: Some("abc".into()),
            origin: Some(origin.into()),
        }
    }

    #[test]
    fn login_redirects_to_github_with_a_callback() {
        let site = site().with_github_client_id("client").with_base_url("https://screencasts.example/");
        let pool = MemoryPool::default();
        let outcome = request(&site, &mut executor(&pool), &Route::Login {
            origin: Some("/episodes".into()),
        });
        let location = outcome.terminal.location().unwrap();
        assert!(location.starts_with("https://github.com/login/oauth/authorize?scope=user:email&client_id=client"));
        assert!(location.contains("&redirect_uri=https%3A%2F%2Fscreencasts.example%2Fgithub-callback%3Forigin%3D%252Fepisodes"));
    }

    #[test]
    fn first_sign_in_creates_the_user_and_a_session() {
        let pool = MemoryPool::default();
        let mut executor = stub_github(executor(&pool));
        let outcome = request(&site(), &mut executor, &callback("/episodes"));

        assert_eq!(outcome.terminal.location(), Some("/episodes"));
        let users = pool.records::<UserData>().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].data.github_uid, Some(42));
        assert_eq!(users[0].data.email, "octo@example.com");

        let sessions = pool.records::<SessionData>().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].data.user_id, users[0].id);
        let cookie = outcome.terminal.header("Set-Cookie").unwrap();
        assert!(cookie.contains(&sessions[0].id.to_string()));
    }

    #[test]
    fn returning_users_are_not_duplicated() {
        let pool = MemoryPool::default();
        let mut executor = stub_github(executor(&pool));
        request(&site(), &mut executor, &callback("/"));
        request(&site(), &mut executor, &callback("/"));

        assert_eq!(pool.records::<UserData>().unwrap().len(), 1);
        assert_eq!(pool.records::<SessionData>().unwrap().len(), 2);
    }

    #[test]
    fn foreign_destinations_fall_back_to_home() {
        let pool = MemoryPool::default();
        let mut executor = stub_github(executor(&pool));
        let outcome = request(&site(), &mut executor, &callback("//evil.example"));
        assert_eq!(outcome.terminal.location(), Some("/"));
    }

    #[test]
    fn a_missing_code_is_a_bad_request() {
        let pool = MemoryPool::default();
        let route = Route::GithubCallback {
            code: None,
            origin: None,
        };
        let outcome = request(&site(), &mut executor(&pool), &route);
        assert_eq!(outcome.terminal.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn refused_tokens_render_the_profile_message() {
        let pool = MemoryPool::default();
        let mut executor = executor(&pool).with_tasks(|_| task_value(None::<String>));
        let outcome = request(&site(), &mut executor, &callback("/"));
        assert_eq!(outcome.terminal.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(outcome.terminal.body_text().contains("Couldn't access your Github profile."));
        assert!(pool.records::<UserData>().unwrap().is_empty());
    }
}

mod webhooks {
    use super::*;

    const SUBSCRIPTION: &str = "sub-1";

    fn gift(pool: &MemoryPool, activated: bool) -> Stored<GiftData> {
        let gift = Stored {
            id: Uuid::new_v4(),
            data: GiftData {
                gifter_email: Some("ana@example.com".into()),
                gifter_name: Some("Ana".into()),
                giftee_email: "bo@example.com".into(),
                giftee_name: "Bo".into(),
                send_at: datetime!(2024-06-01 9:00 UTC),
                message: "Enjoy!".into(),
                subscription_id: Some(SUBSCRIPTION.into()),
                activated,
                plan_code: "gift-3-months".into(),
            },
        };
        pool.seed_record(&gift).unwrap();
        gift
    }

    fn payload(state: &str, activated_at: &str) -> Vec<u8> {
        json!({
            "account": {"account_code": Uuid::new_v4()},
            "subscription": {
                "uuid": SUBSCRIPTION,
                "plan": {"plan_code": "gift-3-months"},
                "state": state,
                "activated_at": activated_at,
            }
        })
        .to_string()
        .into_bytes()
    }

    fn deliver(pool: &MemoryPool, body: Vec<u8>) -> Outcome {
        let mut executor = executor(pool)
            .with_body(body)
            .with_tasks(|description| match description.name.as_str() {
                SUBSCRIPTION_STATUS => task_value(None::<SubscriptionStatus>),
                SEND_EMAIL => task_value(()),
                _ => Err(TaskError::Stub(format!("unexpected task {description}"))),
            });
        request(&site(), &mut executor, &Route::RecurlyWebhook)
    }

    fn emails(outcome: &Outcome) -> usize {
        outcome
            .all_tasks()
            .iter()
            .filter(|task| task.name == SEND_EMAIL)
            .count()
    }

    #[test]
    fn future_gifts_are_rescheduled_once() {
        let pool = MemoryPool::default();
        let gift = gift(&pool, false);
        let body = payload("future", "2024-07-01T09:00:00Z");

        let first = deliver(&pool, body.clone());
        assert_empty_text(&first.terminal, StatusCode::OK);
        assert_eq!(updates(&first, "gifts").len(), 1);
        let stored = pool.records::<GiftData>().unwrap();
        assert_eq!(stored[0].id, gift.id);
        assert_eq!(stored[0].data.send_at, datetime!(2024-07-01 9:00 UTC));

        let second = deliver(&pool, body);
        assert_empty_text(&second.terminal, StatusCode::OK);
        assert!(updates(&second, "gifts").is_empty());
        assert_eq!(emails(&first) + emails(&second), 0);
    }

    #[test]
    fn activated_gifts_send_exactly_one_email() {
        let pool = MemoryPool::default();
        gift(&pool, false);
        let body = payload("active", "2024-06-01T09:00:00Z");

        let first = deliver(&pool, body.clone());
        assert_empty_text(&first.terminal, StatusCode::OK);
        assert_eq!(emails(&first), 1);
        let gift_updates = updates(&first, "gifts");
        assert_eq!(gift_updates.len(), 1);
        assert_eq!(gift_updates[0].assigned("activated"), Some(&json!(true)));
        assert!(pool.records::<GiftData>().unwrap()[0].data.activated);

        let second = deliver(&pool, body);
        assert_eq!(emails(&second), 0);
        assert!(updates(&second, "gifts").is_empty());
    }

    #[test]
    fn unknown_gifts_are_an_empty_server_error() {
        let pool = MemoryPool::default();
        let outcome = deliver(&pool, payload("active", "2024-06-01T09:00:00Z"));
        assert_empty_text(&outcome.terminal, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(emails(&outcome), 0);
    }

    #[test]
    fn malformed_payloads_are_acknowledged() {
        let pool = MemoryPool::default();
        gift(&pool, false);
        let outcome = deliver(&pool, b"<xml>nope</xml>".to_vec());
        assert_empty_text(&outcome.terminal, StatusCode::OK);
        assert!(outcome.all_queries().is_empty());
        assert!(outcome.detached().is_empty());
    }

    #[test]
    fn provider_status_is_copied_onto_the_user() {
        let pool = MemoryPool::default();
        let user = Stored {
            id: Uuid::new_v4(),
            data: UserData::new("sub@example.com"),
        };
        pool.seed_record(&user).unwrap();
        let body = json!({"account": {"account_code": user.id}}).to_string();
        let mut executor = executor(&pool)
            .with_body(body)
            .with_tasks(|_| {
                task_value(Some(SubscriptionStatus {
                    subscriber: true,
                    download_credits: 3,
                    canceled: false,
                }))
            });
        let outcome = request(&site(), &mut executor, &Route::RecurlyWebhook);

        assert_empty_text(&outcome.terminal, StatusCode::OK);
        assert_eq!(updates(&outcome, "users").len(), 1);
        let stored = pool.records::<UserData>().unwrap();
        assert!(stored[0].data.subscriber);
        assert_eq!(stored[0].data.download_credits, 3);
    }

    #[test]
    fn failed_status_lookups_do_not_change_the_response() {
        let pool = MemoryPool::default();
        let body = json!({"account": {"account_code": "unknown"}}).to_string();
        let mut executor = executor(&pool)
            .with_body(body)
            .with_tasks(|_| Err(TaskError::Failed("provider down".into())));
        let outcome = request(&site(), &mut executor, &Route::RecurlyWebhook);

        assert_empty_text(&outcome.terminal, StatusCode::OK);
        assert_eq!(outcome.detached().len(), 1);
        assert!(outcome.all_queries().is_empty());
    }

    #[test]
    fn github_pushes_refresh_the_catalog_after_answering() {
        let pool = MemoryPool::default();
        let mut executor = executor(&pool).with_tasks(|_| task_value(()));
        let outcome = request(&site(), &mut executor, &Route::GithubWebhook);

        assert_empty_text(&outcome.terminal, StatusCode::OK);
        let detached = outcome.detached();
        assert_eq!(detached.len(), 1);
        assert_eq!(detached[0].tasks()[0].name, REFRESH_CATALOG);
    }
}
