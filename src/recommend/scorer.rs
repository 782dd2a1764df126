use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::store::entities::PersistedActivityRow;

pub const RECOMMENDATION_LIMIT: usize = 6;
pub const ARCHIVED_LIMIT: usize = 20;
pub const DEFAULT_LOOKBACK: Duration = Duration::days(30);

const RECENCY_WEIGHT: f64 = 0.4;
/// Recency decays linearly to zero over one week.
const RECENCY_HORIZON_HOURS: f64 = 168.;
const FREQUENCY_STEP: f64 = 0.03;
const FREQUENCY_CAP: f64 = 0.3;
/// Flat bonuses. Neither looks at other rows or at the time of day yet.
const DOMAIN_DIVERSITY_BONUS: f64 = 0.1;
const TIME_OF_DAY_BONUS: f64 = 0.05;
const MAX_SCORE: f64 = 1.;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub recency: f64,
    pub frequency: f64,
    pub domain_diversity: f64,
    pub time_of_day: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRow {
    #[serde(flatten)]
    pub row: PersistedActivityRow,
    pub score: ScoreBreakdown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub recommendations: Vec<RankedRow>,
    pub archived: Vec<PersistedActivityRow>,
}

pub fn recency_score(hours_since_last_visit: f64) -> f64 {
    // Visits stamped in the future count as happening right now.
    let hours = hours_since_last_visit.max(0.);
    (RECENCY_WEIGHT * (1. - hours / RECENCY_HORIZON_HOURS)).max(0.)
}

pub fn frequency_score(visit_count: u64) -> f64 {
    (visit_count as f64 * FREQUENCY_STEP).min(FREQUENCY_CAP)
}

pub fn score_row(row: &PersistedActivityRow, now: DateTime<Utc>) -> ScoreBreakdown {
    let hours = (now - row.last_visited_at).num_milliseconds() as f64 / 3_600_000.;
    let recency = recency_score(hours);
    let frequency = frequency_score(row.visit_count);
    let total = (recency + frequency + DOMAIN_DIVERSITY_BONUS + TIME_OF_DAY_BONUS).min(MAX_SCORE);

    ScoreBreakdown {
        recency,
        frequency,
        domain_diversity: DOMAIN_DIVERSITY_BONUS,
        time_of_day: TIME_OF_DAY_BONUS,
        total,
    }
}

/// Ranks the `candidates` visited within `lookback` of `now`. Equal scores keep the order the
/// rows came in. Archived rows are never recommended; `archived` is listed on its own, newest
/// archival first, and is not subject to the lookback.
pub fn rank(
    candidates: &[PersistedActivityRow],
    archived: &[PersistedActivityRow],
    now: DateTime<Utc>,
    lookback: Duration,
) -> Recommendations {
    let window_start = now - lookback;

    let mut recommendations: Vec<RankedRow> = candidates
        .iter()
        .filter(|v| !v.is_archived && v.last_visited_at >= window_start)
        .map(|v| RankedRow {
            row: v.clone(),
            score: score_row(v, now),
        })
        .collect();
    recommendations.sort_by(|a, b| b.score.total.total_cmp(&a.score.total));
    recommendations.truncate(RECOMMENDATION_LIMIT);

    let mut archived: Vec<PersistedActivityRow> =
        archived.iter().filter(|v| v.is_archived).cloned().collect();
    archived.sort_by(|a, b| b.archived_at.cmp(&a.archived_at));
    archived.truncate(ARCHIVED_LIMIT);

    Recommendations {
        recommendations,
        archived,
    }
}
