//! GitHub sign-in.

use bitserve::query::{insert, Stored};
use bitserve::session::{session_cookie, SessionData, UserData};
use bitserve::{Headers, Interpreter, InterpreterExt, ServerError};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::collaborators::GithubProfile;
use crate::routes::{percent_encode, safe_destination, Route};
use crate::Site;

pub const GITHUB_AUTHORIZE: &str = "https://github.com/login/oauth/authorize";
pub const PROFILE_UNAVAILABLE: &str = "Couldn't access your Github profile.";

/// Send the visitor to GitHub, asking it to come back to `origin`.
pub fn login<I: Interpreter>(site: &Site, origin: Option<&str>) -> I {
    let mut url = format!(
        "{GITHUB_AUTHORIZE}?scope=user:email&client_id={}",
        percent_encode(&site.github_client_id)
    );
    if let Some(origin) = origin {
        let callback = Route::GithubCallback {
            code: None,
            origin: Some(origin.to_string()),
        };
        let callback = format!("{}{}", site.base_url.trim_end_matches('/'), callback.path());
        url.push_str("&redirect_uri=");
        url.push_str(&percent_encode(&callback));
    }
    I::redirect_to(url)
}

/// Finish the OAuth dance: exchange the code, find or create the user and
/// start a session.
pub fn github_callback<I: Interpreter>(
    site: &Site,
    code: Option<String>,
    origin: Option<String>,
) -> Result<I, ServerError> {
    let Some(code) = code else {
        return Err(ServerError::bad_request(
            "no auth code",
            "Something went wrong, please try again.",
        ));
    };
    let exchange = site.oauth.access_token(&code);
    let oauth = site.oauth.clone();
    Ok(I::await_or_fail(exchange, PROFILE_UNAVAILABLE, move |token: Option<String>| {
        let Some(token) = token else {
            return I::write_error(ServerError::new("no github access token", PROFILE_UNAVAILABLE));
        };
        I::await_or_fail(
            oauth.profile(&token),
            PROFILE_UNAVAILABLE,
            move |profile: GithubProfile| {
                I::query_or_fail(
                    Stored::<UserData>::select_by("github_uid", profile.id),
                    move |user| match user {
                        Some(user) => start_session(user.id, origin),
                        None => {
                            let user = UserData {
                                github_uid: Some(profile.id),
                                github_login: Some(profile.login),
                                github_token: Some(token),
                                avatar_url: Some(profile.avatar_url),
                                name: profile.name,
                                ..UserData::new(profile.email.unwrap_or_default())
                            };
                            I::query_or_fail(insert(&user), move |id| start_session(id, origin))
                        }
                    },
                )
            },
        )
    }))
}

fn start_session<I: Interpreter>(user_id: Uuid, origin: Option<String>) -> I {
    let session = SessionData {
        user_id,
        created_at: OffsetDateTime::now_utc(),
    };
    I::query_or_fail(insert(&session), move |session_id| {
        let destination = origin
            .as_deref()
            .map_or_else(|| "/".to_string(), safe_destination);
        let mut headers = Headers::new();
        headers.insert("Set-Cookie".into(), session_cookie(session_id));
        I::redirect(destination, headers)
    })
}
