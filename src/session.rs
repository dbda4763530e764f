//! Session identity and its resolution from the session cookie.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::effects::{Interpreter, Step};
use crate::query::{Record, Stored};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "sessionid";

/// A registered user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub email: String,
    pub github_uid: Option<i64>,
    pub github_login: Option<String>,
    pub github_token: Option<String>,
    pub avatar_url: Option<String>,
    pub name: Option<String>,
    pub subscriber: bool,
    pub admin: bool,
    pub download_credits: i64,
    pub canceled: bool,
    pub team_token: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Record for UserData {
    const TABLE: &'static str = "users";
}

impl UserData {
    /// A fresh, unsubscribed account.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            github_uid: None,
            github_login: None,
            github_token: None,
            avatar_url: None,
            name: None,
            subscriber: false,
            admin: false,
            download_credits: 0,
            canceled: false,
            team_token: Uuid::new_v4(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Record for SessionData {
    const TABLE: &'static str = "sessions";
}

/// Membership of a user in a team paid for by `team_manager_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMemberData {
    pub user_id: Uuid,
    pub team_manager_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Record for TeamMemberData {
    const TABLE: &'static str = "team_members";
}

/// The identity behind a request. Built fresh for every request that asks
/// for it; changes are persisted as new rows, never applied in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: Uuid,
    pub user: Stored<UserData>,
    pub team_manager: Option<Stored<UserData>>,
}

impl Session {
    pub fn user_id(&self) -> Uuid {
        self.user.id
    }

    /// Access paid for by the user's own subscription.
    pub fn self_premium_access(&self) -> bool {
        self.user.data.admin || self.user.data.subscriber
    }

    /// Access through the user's own subscription or their team's.
    pub fn premium_access(&self) -> bool {
        self.self_premium_access()
            || self
                .team_manager
                .as_ref()
                .is_some_and(|manager| manager.data.subscriber)
    }

    pub fn is_team_member_of(&self, manager_id: Uuid) -> bool {
        self.team_manager
            .as_ref()
            .is_some_and(|manager| manager.id == manager_id)
    }
}

/// Extract the session token from a `Cookie` header value.
///
/// Both `sessionid="<uuid>"` and the unquoted form are accepted; anything
/// else means no session.
pub fn session_token(cookie_header: &str) -> Option<Uuid> {
    cookie_header.split(';').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() != SESSION_COOKIE {
            return None;
        }
        Uuid::parse_str(value.trim().trim_matches('"')).ok()
    })
}

/// `Set-Cookie` value establishing a session.
pub fn session_cookie(session_id: Uuid) -> String {
    format!("{SESSION_COOKIE}=\"{session_id}\"; HttpOnly; Path=/")
}

/// Load the session identified by `token`.
///
/// An unknown token or a session whose user no longer exists resolves to
/// `None`. Query failures end the chain with an error page.
pub fn resolve<I: Interpreter>(token: Uuid) -> Step<I, Option<Session>> {
    Step::query(Stored::<SessionData>::select_by("id", token))
        .or_fail()
        .and_then(|session| match session {
            None => Step::pure(None),
            Some(session) => Step::query(Stored::<UserData>::select_by("id", session.data.user_id))
                .or_fail()
                .and_then(move |user| match user {
                    None => Step::pure(None),
                    Some(user) => team_manager(user.id).map(move |team_manager| {
                        Some(Session {
                            session_id: session.id,
                            user,
                            team_manager,
                        })
                    }),
                }),
        })
}

fn team_manager<I: Interpreter>(user_id: Uuid) -> Step<I, Option<Stored<UserData>>> {
    Step::query(Stored::<TeamMemberData>::select_by("user_id", user_id))
        .or_fail()
        .and_then(|membership| match membership {
            None => Step::pure(None),
            Some(membership) => {
                Step::query(Stored::<UserData>::select_by("id", membership.data.team_manager_id))
                    .or_fail()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(data: UserData) -> Stored<UserData> {
        Stored {
            id: Uuid::new_v4(),
            data,
        }
    }

    #[test]
    fn token_is_read_from_quoted_and_bare_cookies() {
        let id = Uuid::new_v4();
        assert_eq!(session_token(&format!("theme=dark; sessionid=\"{id}\"")), Some(id));
        assert_eq!(session_token(&format!("sessionid={id}")), Some(id));
        assert_eq!(session_token("sessionid=\"garbage\""), None);
        assert_eq!(session_token("other=1"), None);
        assert_eq!(session_token(""), None);
    }

    #[test]
    fn cookie_round_trips_through_the_parser() {
        let id = Uuid::new_v4();
        let cookie = session_cookie(id);
        assert!(cookie.ends_with("; HttpOnly; Path=/"));
        let value = cookie.split(';').next().unwrap();
        assert_eq!(session_token(value), Some(id));
    }

    #[test]
    fn team_members_inherit_premium_access() {
        let mut manager = UserData::new("boss@example.com");
        manager.subscriber = true;
        let manager = stored(manager);
        let session = Session {
            session_id: Uuid::new_v4(),
            user: stored(UserData::new("dev@example.com")),
            team_manager: Some(manager.clone()),
        };
        assert!(!session.self_premium_access());
        assert!(session.premium_access());
        assert!(session.is_team_member_of(manager.id));
    }
}
