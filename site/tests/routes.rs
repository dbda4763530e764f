use bitserve_site::routes::safe_destination;
use bitserve_site::{RequestHead, Route};
use proptest::option;
use proptest::prelude::*;
use uuid::Uuid;

fn segment() -> impl Strategy<Value = String> {
    "\\PC{1,12}"
}

fn route() -> impl Strategy<Value = Route> {
    prop_oneof![
        Just(Route::Home),
        Just(Route::Episodes),
        Just(Route::EpisodesJson),
        Just(Route::Collections),
        Just(Route::Subscribe),
        Just(Route::SubscribeTeam),
        Just(Route::CollectionsJson),
        Just(Route::RssFeed),
        Just(Route::Sitemap),
        Just(Route::RecurlyWebhook),
        Just(Route::GithubWebhook),
        segment().prop_map(Route::Collection),
        segment().prop_map(Route::Episode),
        segment().prop_map(Route::PromoCode),
        any::<u128>().prop_map(|n| Route::TeamMemberSignup(Uuid::from_u128(n))),
        option::of(any::<String>()).prop_map(|origin| Route::Login { origin }),
        (option::of(any::<String>()), option::of(any::<String>()))
            .prop_map(|(code, origin)| Route::GithubCallback { code, origin }),
        prop::collection::vec(segment(), 1..4).prop_map(Route::StaticFile),
    ]
}

proptest! {
    #[test]
    fn routes_parse_back_from_their_urls(route in route()) {
        let head = RequestHead::for_route(&route);
        prop_assert_eq!(Route::parse(&head.method, &head.path, head.query.as_deref()), Some(route));
    }

    #[test]
    fn destinations_are_always_local(origin in any::<String>()) {
        let destination = safe_destination(&origin);
        prop_assert!(destination.starts_with('/'));
        prop_assert!(!destination.starts_with("//"));
        prop_assert!(!destination.chars().any(char::is_control));
    }

    #[test]
    fn origins_not_starting_with_a_slash_go_home(origin in "[^/%][^%]{0,20}") {
        prop_assert_eq!(safe_destination(&origin), "/");
    }

    #[test]
    fn absolute_urls_never_leave_the_site(
        scheme in prop_oneof![Just("http://"), Just("https://"), Just("//"), Just("%2F%2F")],
        host in "[a-z]{1,10}\\.[a-z]{2,3}",
    ) {
        prop_assert_eq!(safe_destination(&format!("{scheme}{host}/path")), "/");
    }

    #[test]
    fn local_paths_are_kept(path in "(/[a-z0-9]{1,8}){1,4}") {
        prop_assert_eq!(safe_destination(&path), path);
    }
}
