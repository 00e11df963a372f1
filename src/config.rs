//! Runtime configuration loading, including the seeded party catalog.

use std::{collections::BTreeMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::dao::models::{
    GameEntity, GameId, GameKind, HuntItemEntity, HuntItemId, HuntItemKind, HuntKind, OptionId,
    PollEntity, PollId, PollKind, PollOptionEntity,
};

/// Default location on disk where the session looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/party.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TINSEL_CORE_CONFIG_PATH";

const DEFAULT_EVENT_CAPACITY: usize = 64;
const DEFAULT_QUEUE_DEPTH: usize = 32;
const DEFAULT_COMMIT_ATTEMPTS: u32 = 5;
const DEFAULT_TOKEN_TTL_SECS: u64 = 600;

/// Immutable runtime configuration shared across the session.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Broadcast capacity of the domain event hub.
    pub event_capacity: usize,
    /// Mailbox depth of each per-game queue worker.
    pub queue_depth: usize,
    /// Bounded attempts for commits retried after a precondition conflict.
    pub commit_attempts: u32,
    /// How long committed mutation tokens are remembered.
    pub token_ttl: Duration,
    /// Catalog seeded into an empty store on first join.
    pub catalog: PartyCatalog,
}

impl CoreConfig {
    /// Load the configuration from disk, falling back to baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        games = config.catalog.games().len(),
                        polls = config.catalog.polls().len(),
                        hunt_items = config.catalog.hunt_items().len(),
                        "loaded party catalog from config"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
            catalog: PartyCatalog::default(),
        }
    }
}

/// Games, polls and hunt items written into an empty store on first join.
#[derive(Debug, Clone)]
pub struct PartyCatalog {
    games: Vec<GameEntity>,
    polls: Vec<PollEntity>,
    hunt_items: Vec<HuntItemEntity>,
}

impl PartyCatalog {
    /// Assemble a catalog from prebuilt entities.
    pub fn new(
        games: Vec<GameEntity>,
        polls: Vec<PollEntity>,
        hunt_items: Vec<HuntItemEntity>,
    ) -> Self {
        Self {
            games,
            polls,
            hunt_items,
        }
    }

    /// Catalog games, queues empty.
    pub fn games(&self) -> &[GameEntity] {
        &self.games
    }

    /// Catalog polls, answers empty.
    pub fn polls(&self) -> &[PollEntity] {
        &self.polls
    }

    /// Catalog hunt items.
    pub fn hunt_items(&self) -> &[HuntItemEntity] {
        &self.hunt_items
    }

    /// Game whose presence marks the store as already seeded.
    pub fn seed_marker(&self) -> Option<&GameId> {
        self.games.first().map(|game| &game.id)
    }
}

impl Default for PartyCatalog {
    fn default() -> Self {
        default_catalog()
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    event_capacity: Option<usize>,
    #[serde(default)]
    queue_depth: Option<usize>,
    #[serde(default)]
    commit_attempts: Option<u32>,
    #[serde(default)]
    token_ttl_secs: Option<u64>,
    #[serde(default)]
    catalog: Option<RawCatalog>,
}

impl From<RawConfig> for CoreConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            event_capacity: value.event_capacity.unwrap_or(DEFAULT_EVENT_CAPACITY),
            queue_depth: value.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH),
            commit_attempts: value.commit_attempts.unwrap_or(DEFAULT_COMMIT_ATTEMPTS),
            token_ttl: Duration::from_secs(
                value.token_ttl_secs.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
            ),
            catalog: value
                .catalog
                .map(Into::into)
                .unwrap_or_else(PartyCatalog::default),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    games: Vec<RawGame>,
    #[serde(default)]
    polls: Vec<RawPoll>,
    #[serde(default)]
    hunt_items: Vec<RawHuntItem>,
}

impl From<RawCatalog> for PartyCatalog {
    fn from(value: RawCatalog) -> Self {
        Self {
            games: value.games.into_iter().map(Into::into).collect(),
            polls: value.polls.into_iter().map(Into::into).collect(),
            hunt_items: value.hunt_items.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawGame {
    id: String,
    title: String,
    kind: GameKind,
}

impl From<RawGame> for GameEntity {
    fn from(value: RawGame) -> Self {
        game(&value.id, &value.title, value.kind)
    }
}

#[derive(Debug, Deserialize)]
struct RawPoll {
    id: String,
    question: String,
    kind: PollKind,
    #[serde(default)]
    options: Vec<RawPollOption>,
    #[serde(default = "default_true")]
    is_active: bool,
}

impl From<RawPoll> for PollEntity {
    fn from(value: RawPoll) -> Self {
        Self {
            id: PollId::from(value.id),
            question: value.question,
            kind: value.kind,
            options: value.options.into_iter().map(Into::into).collect(),
            answers: BTreeMap::new(),
            is_active: value.is_active,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPollOption {
    id: String,
    text: String,
}

impl From<RawPollOption> for PollOptionEntity {
    fn from(value: RawPollOption) -> Self {
        Self {
            id: OptionId::from(value.id),
            text: value.text,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawHuntItem {
    id: String,
    text: String,
    kind: HuntItemKind,
    hunt: HuntKind,
    #[serde(default)]
    category: Option<String>,
}

impl From<RawHuntItem> for HuntItemEntity {
    fn from(value: RawHuntItem) -> Self {
        Self {
            id: HuntItemId::from(value.id),
            text: value.text,
            kind: value.kind,
            hunt: value.hunt,
            category: value.category,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn game(id: &str, title: &str, kind: GameKind) -> GameEntity {
    GameEntity {
        id: GameId::from(id),
        title: title.to_owned(),
        kind,
        signups: Vec::new(),
        results: Vec::new(),
        scores: BTreeMap::new(),
        revision: 0,
    }
}

fn poll(id: &str, question: &str, options: &[(&str, &str)]) -> PollEntity {
    PollEntity {
        id: PollId::from(id),
        question: question.to_owned(),
        kind: if options.is_empty() {
            PollKind::FreeText
        } else {
            PollKind::MultipleChoice
        },
        options: options
            .iter()
            .map(|(id, text)| PollOptionEntity {
                id: OptionId::from(*id),
                text: (*text).to_owned(),
            })
            .collect(),
        answers: BTreeMap::new(),
        is_active: true,
    }
}

fn hunt_item(id: &str, text: &str, kind: HuntItemKind, hunt: HuntKind) -> HuntItemEntity {
    HuntItemEntity {
        id: HuntItemId::from(id),
        text: text.to_owned(),
        kind,
        hunt,
        category: None,
    }
}

/// Built-in catalog used when no configuration file is present.
fn default_catalog() -> PartyCatalog {
    PartyCatalog {
        games: vec![
            game("g1", "Corn Hole", GameKind::Team),
            game("g2", "Beer Pong", GameKind::Team),
            game("g3", "Jenga", GameKind::Individual),
            game("g4", "Connect 4", GameKind::Individual),
        ],
        polls: vec![
            poll(
                "p1",
                "Who is winning the cook-off?",
                &[
                    ("a", "The smoked brisket"),
                    ("b", "The tamales"),
                    ("c", "The seven-layer dip"),
                    ("d", "The mystery casserole"),
                ],
            ),
            poll(
                "p2",
                "Pick the first holiday movie for the projector",
                &[
                    ("a", "Die Hard"),
                    ("b", "Elf"),
                    ("c", "Home Alone"),
                    ("d", "Gremlins"),
                ],
            ),
            poll("p3", "Best dish of the night? Write it in!", &[]),
        ],
        hunt_items: vec![
            hunt_item("h1", "A stocking with a name on it", HuntItemKind::Checkbox, HuntKind::House),
            hunt_item("h2", "Mistletoe hanging in a doorway", HuntItemKind::Checkbox, HuntKind::House),
            hunt_item("h3", "An ornament older than you", HuntItemKind::Checkbox, HuntKind::House),
            hunt_item("h4", "What year is on the oldest photo on the wall?", HuntItemKind::Text, HuntKind::House),
            hunt_item("v1", "A snowman taller than a mailbox", HuntItemKind::Checkbox, HuntKind::Village),
            hunt_item("v2", "A house with icicle lights", HuntItemKind::Checkbox, HuntKind::Village),
            hunt_item("v3", "An inflatable lawn decoration", HuntItemKind::Checkbox, HuntKind::Village),
            hunt_item("v4", "Street name on the corner with the big wreath", HuntItemKind::Text, HuntKind::Village),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn default_catalog_ids_are_unique() {
        let catalog = PartyCatalog::default();
        let game_ids: BTreeSet<_> = catalog.games().iter().map(|g| g.id.clone()).collect();
        assert_eq!(game_ids.len(), catalog.games().len());
        let poll_ids: BTreeSet<_> = catalog.polls().iter().map(|p| p.id.clone()).collect();
        assert_eq!(poll_ids.len(), catalog.polls().len());
        let item_ids: BTreeSet<_> = catalog.hunt_items().iter().map(|i| i.id.clone()).collect();
        assert_eq!(item_ids.len(), catalog.hunt_items().len());
    }

    #[test]
    fn default_catalog_covers_both_hunts() {
        let catalog = PartyCatalog::default();
        assert!(catalog.hunt_items().iter().any(|i| i.hunt == HuntKind::House));
        assert!(catalog.hunt_items().iter().any(|i| i.hunt == HuntKind::Village));
    }

    #[test]
    fn raw_config_fills_missing_knobs_with_defaults() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "queue_depth": 8,
                "catalog": {
                    "games": [{"id": "g9", "title": "Trivia", "kind": "individual"}],
                    "polls": [{"id": "p9", "question": "Snacks?", "kind": "free-text"}],
                    "hunt_items": [
                        {"id": "x1", "text": "A candle", "kind": "checkbox", "hunt": "house"}
                    ]
                }
            }"#,
        )
        .unwrap();
        let config: CoreConfig = raw.into();
        assert_eq!(config.queue_depth, 8);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert_eq!(config.commit_attempts, DEFAULT_COMMIT_ATTEMPTS);
        assert_eq!(config.catalog.games().len(), 1);
        assert_eq!(config.catalog.seed_marker(), Some(&GameId::from("g9")));
        assert!(config.catalog.polls()[0].options.is_empty());
    }
}
