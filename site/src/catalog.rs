//! Episodes, collections and plans.
//!
//! The catalog is reference data: loaded at startup, shared read-only
//! through a `Reference`, and replaced wholesale when a refresh is requested.

use async_trait::async_trait;
use bitserve::effects::{Interpreter, Step};
use bitserve::query::{to_value, Order, Record, Stored};
use bitserve::session::UserData;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub number: u32,
    pub slug: String,
    pub title: String,
    pub synopsis: String,
    #[serde(default)]
    pub subscription_only: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub released_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub collections: Vec<String>,
    pub duration_seconds: u32,
}

impl Episode {
    pub fn is_released(&self, now: OffsetDateTime) -> bool {
        self.released_at.is_some_and(|released| released <= now)
    }

    pub fn pretty_duration(&self) -> String {
        let minutes = self.duration_seconds / 60;
        if minutes >= 60 {
            format!("{}h {}min", minutes / 60, minutes % 60)
        } else {
            format!("{minutes}min")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Days,
    Months,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_code: String,
    pub name: String,
    pub interval_unit: IntervalUnit,
    pub interval_length: u32,
    pub unit_amount_cents: u32,
}

impl Plan {
    pub fn is_gift(&self) -> bool {
        self.plan_code.starts_with("gift")
    }

    /// "1 month", "12 months", "14 days", ...
    pub fn pretty_duration(&self) -> String {
        let unit = match (self.interval_unit, self.interval_length) {
            (IntervalUnit::Days, 1) => "day",
            (IntervalUnit::Days, _) => "days",
            (IntervalUnit::Months, 1) => "month",
            (IntervalUnit::Months, _) => "months",
        };
        format!("{} {unit}", self.interval_length)
    }

    pub fn pretty_price(&self) -> String {
        format!("${}.{:02}", self.unit_amount_cents / 100, self.unit_amount_cents % 100)
    }

    fn is_monthly_interval(&self, months: u32) -> bool {
        self.interval_unit == IntervalUnit::Months && self.interval_length == months
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub episodes: Vec<Episode>,
    #[serde(default)]
    pub collections: Vec<Collection>,
    #[serde(default)]
    pub plans: Vec<Plan>,
}

impl Catalog {
    pub fn monthly(&self) -> Option<&Plan> {
        self.plans
            .iter()
            .find(|plan| !plan.is_gift() && plan.is_monthly_interval(1))
    }

    pub fn yearly(&self) -> Option<&Plan> {
        self.plans
            .iter()
            .find(|plan| !plan.is_gift() && plan.is_monthly_interval(12))
    }

    pub fn gifts(&self) -> impl Iterator<Item = &Plan> {
        self.plans.iter().filter(|plan| plan.is_gift())
    }

    pub fn plan(&self, plan_code: &str) -> Option<&Plan> {
        self.plans.iter().find(|plan| plan.plan_code == plan_code)
    }

    pub fn collection(&self, slug: &str) -> Option<&Collection> {
        self.collections.iter().find(|collection| collection.slug == slug)
    }

    pub fn episode(&self, slug: &str) -> Option<&Episode> {
        self.episodes.iter().find(|episode| episode.slug == slug)
    }

    /// Episodes visible to `user`, newest first. Admins also see unreleased
    /// episodes.
    pub fn scoped(&self, user: Option<&UserData>, now: OffsetDateTime) -> Vec<Episode> {
        let admin = user.is_some_and(|user| user.admin);
        let mut episodes: Vec<Episode> = self
            .episodes
            .iter()
            .filter(|episode| admin || episode.is_released(now))
            .cloned()
            .collect();
        episodes.sort_by(|a, b| b.number.cmp(&a.number));
        episodes
    }

    pub fn collection_episodes(
        &self,
        collection: &Collection,
        user: Option<&UserData>,
        now: OffsetDateTime,
    ) -> Vec<Episode> {
        self.scoped(user, now)
            .into_iter()
            .filter(|episode| episode.collections.contains(&collection.slug))
            .collect()
    }

    /// Collections with at least one episode visible to `user`.
    pub fn visible_collections(&self, user: Option<&UserData>, now: OffsetDateTime) -> Vec<(Collection, usize)> {
        self.collections
            .iter()
            .map(|collection| {
                let count = self.collection_episodes(collection, user, now).len();
                (collection.clone(), count)
            })
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

/// How far a user got into an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayProgressData {
    pub user_id: Uuid,
    pub episode_number: u32,
    pub progress: u32,
    pub furthest_watched: u32,
}

impl Record for PlayProgressData {
    const TABLE: &'static str = "play_progress";
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeWithProgress {
    pub episode: Episode,
    pub progress: Option<u32>,
}

/// Attach the user's play progress to `episodes`. Signed-out visitors get
/// no progress and no query.
pub fn with_progress<I: Interpreter>(
    episodes: Vec<Episode>,
    user_id: Option<Uuid>,
) -> Step<I, Vec<EpisodeWithProgress>> {
    let Some(user_id) = user_id else {
        return Step::pure(
            episodes
                .into_iter()
                .map(|episode| EpisodeWithProgress {
                    episode,
                    progress: None,
                })
                .collect(),
        );
    };
    let query = Stored::<PlayProgressData>::select(
        vec![("user_id".into(), to_value(user_id))],
        Some(Order {
            column: "episode_number".into(),
            descending: true,
        }),
        None,
    );
    Step::query(query).or_fail().map(move |progresses| {
        episodes
            .into_iter()
            .map(|episode| {
                let progress = progresses
                    .iter()
                    .find(|row| row.data.episode_number == episode.number)
                    .map(|row| row.data.progress);
                EpisodeWithProgress { episode, progress }
            })
            .collect()
    })
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid catalog {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Where the catalog comes from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn load(&self) -> Result<Catalog, CatalogError>;
}

/// A catalog read from a JSON file on every load.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for FileCatalog {
    async fn load(&self) -> Result<Catalog, CatalogError> {
        let contents = tokio::fs::read(&self.path)
            .await
            .map_err(|source| CatalogError::Read {
                path: self.path.clone(),
                source,
            })?;
        serde_json::from_slice(&contents).map_err(|source| CatalogError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

/// A fixed catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog(pub Catalog);

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn load(&self) -> Result<Catalog, CatalogError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn episode(number: u32, released_at: Option<OffsetDateTime>) -> Episode {
        Episode {
            number,
            slug: format!("episode-{number}"),
            title: format!("Episode {number}"),
            synopsis: String::new(),
            subscription_only: false,
            released_at,
            collections: vec!["basics".into()],
            duration_seconds: 754,
        }
    }

    #[test]
    fn scoping_hides_unreleased_episodes_from_non_admins() {
        let now = datetime!(2024-05-01 12:00 UTC);
        let catalog = Catalog {
            episodes: vec![
                episode(1, Some(datetime!(2024-01-01 0:00 UTC))),
                episode(2, Some(datetime!(2024-06-01 0:00 UTC))),
                episode(3, None),
                episode(4, Some(datetime!(2024-04-01 0:00 UTC))),
            ],
            ..Catalog::default()
        };
        let numbers = |episodes: Vec<Episode>| episodes.iter().map(|e| e.number).collect::<Vec<_>>();
        assert_eq!(numbers(catalog.scoped(None, now)), vec![4, 1]);

        let mut admin = UserData::new("admin@example.com");
        admin.admin = true;
        assert_eq!(numbers(catalog.scoped(Some(&admin), now)), vec![4, 3, 2, 1]);
    }

    #[test]
    fn plans_are_found_by_interval() {
        let plan = |code: &str, unit, length| Plan {
            plan_code: code.into(),
            name: code.into(),
            interval_unit: unit,
            interval_length: length,
            unit_amount_cents: 1500,
        };
        let catalog = Catalog {
            plans: vec![
                plan("gift-monthly", IntervalUnit::Months, 1),
                plan("monthly", IntervalUnit::Months, 1),
                plan("yearly", IntervalUnit::Months, 12),
            ],
            ..Catalog::default()
        };
        assert_eq!(catalog.monthly().map(|p| p.plan_code.as_str()), Some("monthly"));
        assert_eq!(catalog.yearly().map(|p| p.pretty_duration()), Some("12 months".into()));
        assert_eq!(catalog.gifts().count(), 1);
        assert_eq!(catalog.plans[0].pretty_price(), "$15.00");
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(episode(1, None).pretty_duration(), "12min");
        let mut long = episode(2, None);
        long.duration_seconds = 3 * 3600 + 5 * 60;
        assert_eq!(long.pretty_duration(), "3h 5min");
    }

    #[tokio::test]
    async fn file_catalog_reports_the_offending_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "{ not json").unwrap();
        let error = FileCatalog::new(&path).load().await.unwrap_err();
        assert!(matches!(error, CatalogError::Parse { .. }));
        assert!(error.to_string().contains("catalog.json"));
    }
}
