use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    dao::models::{MutationToken, OptionId, PollEntity, PollId, PollKind, UserEntity, UserId},
    dto::validation::validate_text_payload,
};

/// Transfers the caller's single sweater vote to `target`.
#[derive(Debug, Deserialize)]
pub struct SweaterVoteRequest {
    pub token: MutationToken,
    pub voter: UserId,
    pub target: UserId,
}

/// Records (or overwrites) the caller's answer to a poll.
#[derive(Debug, Deserialize, Validate)]
pub struct PollAnswerRequest {
    pub token: MutationToken,
    pub poll: PollId,
    pub voter: UserId,
    /// Option id for multiple-choice polls, free text otherwise.
    #[validate(custom(function = validate_text_payload))]
    pub answer: String,
}

/// One row of the sweater-vote leaderboard.
#[derive(Clone, Debug, Serialize)]
pub struct LeaderboardEntry {
    pub user: UserId,
    pub name: String,
    pub votes: i64,
}

impl LeaderboardEntry {
    /// Rank guests by received votes, descending; ties break by name.
    pub fn ranking(users: &[UserEntity]) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<_> = users
            .iter()
            .map(|user| LeaderboardEntry {
                user: user.id.clone(),
                name: user.name.clone(),
                votes: user.votes_received,
            })
            .collect();
        entries.sort_by(|a, b| b.votes.cmp(&a.votes).then_with(|| a.name.cmp(&b.name)));
        entries
    }
}

/// Per-option tally of a multiple-choice poll.
#[derive(Clone, Debug, Serialize)]
pub struct PollOptionTally {
    pub option: OptionId,
    pub text: String,
    pub count: usize,
    /// Share of all answers, rounded to the nearest whole percent.
    pub percent: f64,
}

/// Aggregated answers for one poll.
#[derive(Clone, Debug, Serialize)]
pub struct PollTally {
    pub poll: PollId,
    pub question: String,
    pub kind: PollKind,
    pub is_active: bool,
    pub total_answers: usize,
    /// Empty for free-text polls.
    pub options: Vec<PollOptionTally>,
    /// Raw answers, populated for free-text polls only.
    pub free_answers: Vec<String>,
}

impl From<&PollEntity> for PollTally {
    fn from(poll: &PollEntity) -> Self {
        let total = poll.answers.len();
        let options = poll
            .options
            .iter()
            .map(|option| {
                let count = poll
                    .answers
                    .values()
                    .filter(|answer| answer.as_str() == option.id.as_str())
                    .count();
                let percent = if total == 0 {
                    0.0
                } else {
                    (count as f64 / total as f64 * 100.0).round()
                };
                PollOptionTally {
                    option: option.id.clone(),
                    text: option.text.clone(),
                    count,
                    percent,
                }
            })
            .collect();

        let free_answers = match poll.kind {
            PollKind::FreeText => poll.answers.values().cloned().collect(),
            PollKind::MultipleChoice => Vec::new(),
        };

        Self {
            poll: poll.id.clone(),
            question: poll.question.clone(),
            kind: poll.kind,
            is_active: poll.is_active,
            total_answers: total,
            options,
            free_answers,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::dao::models::PollOptionEntity;

    fn choice_poll(answers: &[(&str, &str)]) -> PollEntity {
        PollEntity {
            id: PollId::new("p1"),
            question: "Best holiday movie?".into(),
            kind: PollKind::MultipleChoice,
            options: vec![
                PollOptionEntity {
                    id: OptionId::new("a"),
                    text: "Die Hard".into(),
                },
                PollOptionEntity {
                    id: OptionId::new("b"),
                    text: "Elf".into(),
                },
            ],
            answers: answers
                .iter()
                .map(|(user, answer)| (UserId::new(*user), (*answer).to_string()))
                .collect::<BTreeMap<_, _>>(),
            is_active: true,
        }
    }

    #[test]
    fn tally_counts_and_rounds_percentages() {
        let poll = choice_poll(&[("u1", "a"), ("u2", "a"), ("u3", "b")]);
        let tally = PollTally::from(&poll);

        assert_eq!(tally.total_answers, 3);
        assert_eq!(tally.options[0].count, 2);
        assert_eq!(tally.options[0].percent, 67.0);
        assert_eq!(tally.options[1].count, 1);
        assert_eq!(tally.options[1].percent, 33.0);
        assert!(tally.free_answers.is_empty());
    }

    #[test]
    fn tally_of_unanswered_poll_is_all_zero() {
        let tally = PollTally::from(&choice_poll(&[]));
        assert_eq!(tally.total_answers, 0);
        assert!(tally.options.iter().all(|o| o.count == 0 && o.percent == 0.0));
    }

    #[test]
    fn free_text_polls_expose_raw_answers() {
        let mut poll = choice_poll(&[("u1", "more cocoa"), ("u2", "karaoke")]);
        poll.kind = PollKind::FreeText;
        poll.options.clear();

        let tally = PollTally::from(&poll);
        assert!(tally.options.is_empty());
        assert_eq!(tally.free_answers, vec!["more cocoa", "karaoke"]);
    }
}
