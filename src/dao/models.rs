use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::collections::BTreeMap;
use std::time::SystemTime;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

string_id!(
    /// Identifier of a guest, assigned by the authentication layer.
    UserId
);
string_id!(
    /// Identifier of a game from the seeded catalog (e.g. `g1`).
    GameId
);
string_id!(
    /// Identifier of a poll from the seeded catalog (e.g. `p1`).
    PollId
);
string_id!(
    /// Identifier of a poll option within its poll (e.g. `a`).
    OptionId
);
string_id!(
    /// Identifier of a scavenger-hunt item from the seeded catalog (e.g. `h3`).
    HuntItemId
);

/// Identifier of a queue signup.
pub type SignupId = Uuid;

/// Identifier of a recorded game result.
pub type ResultId = Uuid;

/// Caller-generated token carried by every mutation so retries are detected.
pub type MutationToken = Uuid;

/// Display language chosen by a guest.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English.
    #[default]
    En,
    /// Spanish.
    Es,
}

impl Language {
    /// Serialized form of the language tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
        }
    }
}

/// How signups for a game are formed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    /// Two-player teams (captain plus partner).
    Team,
    /// Solo signups.
    Individual,
}

/// Which scavenger hunt an item belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HuntKind {
    /// Items found around the village.
    Village,
    /// Items found inside the house.
    House,
}

impl HuntKind {
    /// All hunt kinds, in catalog order.
    pub const ALL: [HuntKind; 2] = [HuntKind::Village, HuntKind::House];
}

/// How a scavenger-hunt item is satisfied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HuntItemKind {
    /// Checked off with a single tap.
    Checkbox,
    /// Requires a written answer.
    Text,
}

/// How answers for a poll are collected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PollKind {
    /// One answer picked from a fixed option list.
    MultipleChoice,
    /// Free-text answer.
    FreeText,
}

/// Stored progress value for a single hunt item.
///
/// Checkbox items store a boolean, text items store the written answer. The
/// untagged representation keeps both shapes in one document field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HuntMark {
    /// Checkbox state.
    Checked(bool),
    /// Written answer for a text item.
    Answer(String),
}

impl HuntMark {
    /// Whether this mark satisfies its item: checked, or a non-blank answer.
    pub fn is_satisfied(&self) -> bool {
        match self {
            HuntMark::Checked(done) => *done,
            HuntMark::Answer(text) => !text.trim().is_empty(),
        }
    }
}

/// Guest document shared across layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserEntity {
    /// Stable identifier for the guest.
    pub id: UserId,
    /// Display name (first and last).
    pub name: String,
    /// Optional profile photo location; blobs live outside the core.
    pub photo_url: Option<String>,
    /// Preferred display language.
    pub language: Language,
    /// Guestbook lines appended by other guests, newline separated.
    pub host_comment: String,
    /// Number of sweater votes currently pointing at this guest.
    pub votes_received: i64,
    /// Target of this guest's sweater vote, if cast.
    pub has_voted_for: Option<UserId>,
    /// Scavenger-hunt progress, keyed by catalog item.
    pub hunt_progress: BTreeMap<HuntItemId, HuntMark>,
    /// When the guest joined the party.
    pub joined_at: SystemTime,
}

/// Entry in a game's king-of-the-hill queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignupEntity {
    /// Stable identifier for the signup.
    pub id: SignupId,
    /// Label shown on the queue board (team or player name).
    pub label: String,
    /// Guest who created the signup.
    pub captain: UserId,
    /// Wins accumulated while holding the hill.
    pub wins: u32,
    /// Guests playing under this signup: the captain, plus an optional partner.
    pub players: Vec<UserId>,
}

impl SignupEntity {
    /// Whether the given guest plays under this signup.
    pub fn involves(&self, user: &UserId) -> bool {
        self.players.contains(user)
    }
}

/// Concluded-match record, append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameResultEntity {
    /// Stable identifier for the result.
    pub id: ResultId,
    /// Label of the winning signup at the time of the match.
    pub winner_label: String,
    /// Label of the losing signup at the time of the match.
    pub loser_label: String,
    /// When the win was reported.
    pub recorded_at: SystemTime,
}

/// Game document: catalog metadata plus live queue, results and scores.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameEntity {
    /// Catalog identifier for the game.
    pub id: GameId,
    /// Display title (e.g. "Corn Hole").
    pub title: String,
    /// Team or individual signups.
    pub kind: GameKind,
    /// Ordered queue; the first two entries are the active match.
    pub signups: Vec<SignupEntity>,
    /// Concluded matches, oldest first. Never rewritten.
    pub results: Vec<GameResultEntity>,
    /// Live score counters for the active match, cleared when a win lands.
    #[serde_as(as = "BTreeMap<DisplayFromStr, _>")]
    pub scores: BTreeMap<SignupId, i64>,
    /// Bumped on every queue replacement; backs conditional writes.
    pub revision: u64,
}

impl GameEntity {
    /// The signup currently holding position zero, if any.
    pub fn leader(&self) -> Option<&SignupEntity> {
        self.signups.first()
    }

    /// Signup ids of the active match (the first two queue entries).
    pub fn active_match(&self) -> Option<(SignupId, SignupId)> {
        match self.signups.as_slice() {
            [first, second, ..] => Some((first.id, second.id)),
            _ => None,
        }
    }
}

/// Selectable option of a multiple-choice poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollOptionEntity {
    /// Option identifier, unique within the poll.
    pub id: OptionId,
    /// Option text as shown to guests.
    pub text: String,
}

/// Poll document: catalog metadata plus collected answers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollEntity {
    /// Catalog identifier for the poll.
    pub id: PollId,
    /// Question shown to guests.
    pub question: String,
    /// Multiple choice or free text.
    pub kind: PollKind,
    /// Options for multiple-choice polls; empty for free text.
    pub options: Vec<PollOptionEntity>,
    /// One recorded answer per guest. Re-answering overwrites.
    pub answers: BTreeMap<UserId, String>,
    /// Whether the poll currently accepts answers.
    pub is_active: bool,
}

impl PollEntity {
    /// Whether `answer` names one of this poll's options.
    pub fn has_option(&self, answer: &str) -> bool {
        self.options.iter().any(|option| option.id.as_str() == answer)
    }
}

/// Scavenger-hunt catalog item. Seeded once, read-only to guests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HuntItemEntity {
    /// Catalog identifier for the item.
    pub id: HuntItemId,
    /// Item description shown to guests.
    pub text: String,
    /// Checkbox or written answer.
    pub kind: HuntItemKind,
    /// Which hunt the item belongs to.
    pub hunt: HuntKind,
    /// Optional grouping label used by the presentation layer.
    pub category: Option<String>,
}
