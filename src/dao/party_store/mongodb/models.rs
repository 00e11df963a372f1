use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::dao::models::{
    GameEntity, GameId, GameKind, GameResultEntity, HuntItemEntity, HuntItemId, HuntItemKind,
    HuntKind, HuntMark, Language, PollEntity, PollId, PollKind, PollOptionEntity, SignupEntity,
    UserEntity, UserId,
};

/// Guest document as stored in the `users` collection.
///
/// String-backed identifier newtypes serialize as plain strings, so they are
/// embedded directly. UUID-backed ids are stored as strings to keep filters
/// and dotted update paths trivial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoUserDocument {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    pub photo_url: Option<String>,
    pub language: Language,
    #[serde(default)]
    pub host_comment: String,
    #[serde(default)]
    pub votes_received: i64,
    #[serde(default)]
    pub has_voted_for: Option<UserId>,
    #[serde(default)]
    pub hunt_progress: BTreeMap<HuntItemId, HuntMark>,
    pub joined_at: DateTime,
}

impl From<UserEntity> for MongoUserDocument {
    fn from(value: UserEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
            photo_url: value.photo_url,
            language: value.language,
            host_comment: value.host_comment,
            votes_received: value.votes_received,
            has_voted_for: value.has_voted_for,
            hunt_progress: value.hunt_progress,
            joined_at: DateTime::from_system_time(value.joined_at),
        }
    }
}

impl From<MongoUserDocument> for UserEntity {
    fn from(value: MongoUserDocument) -> Self {
        Self {
            id: value.id,
            name: value.name,
            photo_url: value.photo_url,
            language: value.language,
            host_comment: value.host_comment,
            votes_received: value.votes_received,
            has_voted_for: value.has_voted_for,
            hunt_progress: value.hunt_progress,
            joined_at: value.joined_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSignupDocument {
    pub id: String,
    pub label: String,
    pub captain: UserId,
    pub wins: u32,
    pub players: Vec<UserId>,
}

impl From<SignupEntity> for MongoSignupDocument {
    fn from(value: SignupEntity) -> Self {
        Self {
            id: value.id.to_string(),
            label: value.label,
            captain: value.captain,
            wins: value.wins,
            players: value.players,
        }
    }
}

impl TryFrom<MongoSignupDocument> for SignupEntity {
    type Error = String;

    fn try_from(value: MongoSignupDocument) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&value.id).map_err(|err| format!("signup id: {err}"))?;
        Ok(Self {
            id,
            label: value.label,
            captain: value.captain,
            wins: value.wins,
            players: value.players,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoResultDocument {
    pub id: String,
    pub winner_label: String,
    pub loser_label: String,
    pub recorded_at: DateTime,
}

impl From<GameResultEntity> for MongoResultDocument {
    fn from(value: GameResultEntity) -> Self {
        Self {
            id: value.id.to_string(),
            winner_label: value.winner_label,
            loser_label: value.loser_label,
            recorded_at: DateTime::from_system_time(value.recorded_at),
        }
    }
}

impl TryFrom<MongoResultDocument> for GameResultEntity {
    type Error = String;

    fn try_from(value: MongoResultDocument) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&value.id).map_err(|err| format!("result id: {err}"))?;
        Ok(Self {
            id,
            winner_label: value.winner_label,
            loser_label: value.loser_label,
            recorded_at: value.recorded_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGameDocument {
    #[serde(rename = "_id")]
    pub id: GameId,
    pub title: String,
    pub kind: GameKind,
    #[serde(default)]
    pub signups: Vec<MongoSignupDocument>,
    #[serde(default)]
    pub results: Vec<MongoResultDocument>,
    #[serde(default)]
    pub scores: BTreeMap<String, i64>,
    #[serde(default)]
    pub revision: i64,
}

impl From<GameEntity> for MongoGameDocument {
    fn from(value: GameEntity) -> Self {
        Self {
            id: value.id,
            title: value.title,
            kind: value.kind,
            signups: value.signups.into_iter().map(Into::into).collect(),
            results: value.results.into_iter().map(Into::into).collect(),
            scores: value
                .scores
                .into_iter()
                .map(|(id, score)| (id.to_string(), score))
                .collect(),
            revision: value.revision as i64,
        }
    }
}

impl TryFrom<MongoGameDocument> for GameEntity {
    type Error = String;

    fn try_from(value: MongoGameDocument) -> Result<Self, Self::Error> {
        let signups = value
            .signups
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<_>, _>>()?;
        let results = value
            .results
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<_>, _>>()?;
        let scores = value
            .scores
            .into_iter()
            .map(|(id, score)| {
                Uuid::parse_str(&id)
                    .map(|id| (id, score))
                    .map_err(|err| format!("score key: {err}"))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(Self {
            id: value.id,
            title: value.title,
            kind: value.kind,
            signups,
            results,
            scores,
            revision: value.revision.max(0) as u64,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPollDocument {
    #[serde(rename = "_id")]
    pub id: PollId,
    pub question: String,
    pub kind: PollKind,
    #[serde(default)]
    pub options: Vec<PollOptionEntity>,
    #[serde(default)]
    pub answers: BTreeMap<UserId, String>,
    #[serde(default)]
    pub is_active: bool,
}

impl From<PollEntity> for MongoPollDocument {
    fn from(value: PollEntity) -> Self {
        Self {
            id: value.id,
            question: value.question,
            kind: value.kind,
            options: value.options,
            answers: value.answers,
            is_active: value.is_active,
        }
    }
}

impl From<MongoPollDocument> for PollEntity {
    fn from(value: MongoPollDocument) -> Self {
        Self {
            id: value.id,
            question: value.question,
            kind: value.kind,
            options: value.options,
            answers: value.answers,
            is_active: value.is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoHuntItemDocument {
    #[serde(rename = "_id")]
    pub id: HuntItemId,
    pub text: String,
    pub kind: HuntItemKind,
    pub hunt: HuntKind,
    pub category: Option<String>,
}

impl From<HuntItemEntity> for MongoHuntItemDocument {
    fn from(value: HuntItemEntity) -> Self {
        Self {
            id: value.id,
            text: value.text,
            kind: value.kind,
            hunt: value.hunt,
            category: value.category,
        }
    }
}

impl From<MongoHuntItemDocument> for HuntItemEntity {
    fn from(value: MongoHuntItemDocument) -> Self {
        Self {
            id: value.id,
            text: value.text,
            kind: value.kind,
            hunt: value.hunt,
            category: value.category,
        }
    }
}
