use serde::{Deserialize, Serialize};

use crate::dao::models::{
    HuntItemEntity, HuntItemId, HuntItemKind, HuntKind, HuntMark, MutationToken, UserId,
};

/// Stores or clears one hunt mark for the calling guest.
#[derive(Debug, Deserialize)]
pub struct MarkItemRequest {
    pub token: MutationToken,
    pub user: UserId,
    pub item: HuntItemId,
    /// `None` clears a previously stored mark.
    #[serde(default)]
    pub mark: Option<HuntMark>,
}

/// Catalog projection of a hunt item.
#[derive(Clone, Debug, Serialize)]
pub struct HuntItemSummary {
    pub id: HuntItemId,
    pub text: String,
    pub kind: HuntItemKind,
    pub hunt: HuntKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl From<&HuntItemEntity> for HuntItemSummary {
    fn from(item: &HuntItemEntity) -> Self {
        Self {
            id: item.id.clone(),
            text: item.text.clone(),
            kind: item.kind,
            hunt: item.hunt,
            category: item.category.clone(),
        }
    }
}

/// One guest's progress through one hunt.
#[derive(Clone, Debug, Serialize)]
pub struct HuntProgressSummary {
    pub hunt: HuntKind,
    pub found: usize,
    pub total: usize,
    /// Share of items satisfied, rounded to the nearest whole percent.
    pub percent: f64,
    pub complete: bool,
}
