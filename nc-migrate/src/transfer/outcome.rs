//! Per-entity and per-run results

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use super::catalog::EntityType;

/// What happened to one source record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityStatus {
    Created,
    SkippedDuplicate,
    /// Dry run: the record would have been created
    WouldCreate,
    Failed,
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityStatus::Created => "created",
            EntityStatus::SkippedDuplicate => "skipped-duplicate",
            EntityStatus::WouldCreate => "would-create",
            EntityStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityOutcome {
    pub entity_type: EntityType,
    pub source_id: String,
    pub name: String,
    pub status: EntityStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Completed,
    /// Finished, but at least one record failed
    Partial,
    Cancelled,
    Failed,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunOutcome::Completed => "Completed",
            RunOutcome::Partial => "Completed with failures",
            RunOutcome::Cancelled => "Cancelled",
            RunOutcome::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Counts per status for one entity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeSummary {
    pub created: usize,
    pub skipped: usize,
    pub would_create: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub outcomes: Vec<EntityOutcome>,
    pub total_processed: usize,
    /// Run-level failure reason, set when `outcome` is `Failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    pub fn summary(&self) -> BTreeMap<EntityType, TypeSummary> {
        let mut summary: BTreeMap<EntityType, TypeSummary> = BTreeMap::new();
        for outcome in &self.outcomes {
            let entry = summary.entry(outcome.entity_type).or_default();
            match outcome.status {
                EntityStatus::Created => entry.created += 1,
                EntityStatus::SkippedDuplicate => entry.skipped += 1,
                EntityStatus::WouldCreate => entry.would_create += 1,
                EntityStatus::Failed => entry.failed += 1,
            }
        }
        summary
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntityOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == EntityStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(entity_type: EntityType, id: &str, status: EntityStatus) -> EntityOutcome {
        EntityOutcome {
            entity_type,
            source_id: id.to_string(),
            name: id.to_string(),
            status,
            destination_id: None,
            detail: None,
        }
    }

    #[test]
    fn test_summary_counts() {
        let result = RunResult {
            run_id: Uuid::new_v4(),
            outcome: RunOutcome::Partial,
            outcomes: vec![
                outcome(EntityType::Customer, "1", EntityStatus::Created),
                outcome(EntityType::Customer, "2", EntityStatus::SkippedDuplicate),
                outcome(EntityType::User, "3", EntityStatus::Failed),
                outcome(EntityType::User, "4", EntityStatus::Created),
            ],
            total_processed: 4,
            error: None,
        };

        let summary = result.summary();
        assert_eq!(
            summary[&EntityType::Customer],
            TypeSummary {
                created: 1,
                skipped: 1,
                would_create: 0,
                failed: 0
            }
        );
        assert_eq!(summary[&EntityType::User].failed, 1);
        assert_eq!(result.failures().count(), 1);
        assert_eq!(
            result
                .outcomes
                .iter()
                .filter(|o| o.entity_type == EntityType::Customer)
                .count(),
            2
        );
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        let json = serde_json::to_string(&EntityStatus::SkippedDuplicate).unwrap();
        assert_eq!(json, "\"skipped-duplicate\"");
    }
}
