//! Per-participant pledge report.
//!
//! Organisers export one row per participant. Pledges are grouped by
//! email address (trimmed, case-insensitive) and rows are ordered by the
//! participant's latest pledge, newest first. A row shows the address as
//! the participant first entered it.

use chrono::{DateTime, Utc};
use claimboard_core::model::Pledge;
use serde::Serialize;
use std::collections::HashMap;

/// Shown for pledges without an email address.
pub const NO_EMAIL: &str = "(no email)";

/// One participant's pledges, merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRow {
    /// Email from the participant's first pledge, or [`NO_EMAIL`]
    pub email: String,
    /// First non-empty name seen
    pub name: String,
    /// First non-empty phone seen
    pub phone: String,
    /// Item names across all pledges, in pledge order
    pub items: Vec<String>,
    /// Number of items pledged
    pub item_count: usize,
    /// Most recent pledge time
    pub latest: DateTime<Utc>,
}

/// Pledges grouped per participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PledgeReport {
    /// Rows ordered by latest pledge, newest first
    pub rows: Vec<ParticipantRow>,
}

impl PledgeReport {
    /// Builds the report from every pledge on record.
    #[must_use]
    pub fn from_pledges(pledges: &[Pledge]) -> Self {
        let mut rows: Vec<ParticipantRow> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for pledge in pledges {
            let email = match pledge.email.trim() {
                "" => NO_EMAIL,
                email => email,
            };
            let position = *index.entry(email.to_lowercase()).or_insert_with(|| {
                rows.push(ParticipantRow {
                    email: email.to_string(),
                    name: String::new(),
                    phone: String::new(),
                    items: Vec::new(),
                    item_count: 0,
                    latest: pledge.created_at,
                });
                rows.len() - 1
            });

            let row = &mut rows[position];
            if row.name.is_empty() {
                row.name = pledge.name.trim().to_string();
            }
            if row.phone.is_empty() {
                row.phone = pledge.phone.trim().to_string();
            }
            row.items
                .extend(pledge.items.iter().map(|item| item.name.clone()));
            row.item_count = row.items.len();
            row.latest = row.latest.max(pledge.created_at);
        }

        rows.sort_by(|a, b| b.latest.cmp(&a.latest));
        Self { rows }
    }

    /// Total items across every participant
    #[must_use]
    pub fn total_items(&self) -> usize {
        self.rows.iter().map(|row| row.item_count).sum()
    }
}
