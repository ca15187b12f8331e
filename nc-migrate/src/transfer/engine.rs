//! Cross-server migration engine
//!
//! A run walks the selected entity types in dependency order. For each type
//! it snapshots the destination listing once, then handles every source
//! record in listing order: match an existing destination entity by natural
//! key, or rewrite the record's references and create it. Every decision
//! lands in the identifier map so later types can resolve references into
//! it. Referenced types that are not part of the selection are matched by
//! natural key only, so references into records that already exist on the
//! destination still resolve. Record-level problems are captured as outcomes
//! and never stop the run.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::cancel::CancelFlag;
use super::catalog::{Catalog, EntityType};
use super::client::{EntityClient, Scope, fetch_all};
use super::id_map::IdentifierMap;
use super::outcome::{EntityOutcome, EntityStatus, RunOutcome, RunResult};
use super::progress::{ProgressReporter, RunEvent, percent};
use super::record::Record;

/// What to do when two source records of one run share a natural key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Later records map onto the first one's destination entity
    #[default]
    FirstWins,
    /// Later records fail
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Reasons a run is refused before it starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The request itself is unusable
    Config(String),
    /// Another run is in progress on this engine
    Conflict,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Config(msg) => write!(f, "Invalid migration request: {}", msg),
            EngineError::Conflict => write!(f, "A migration is already running"),
        }
    }
}

impl std::error::Error for EngineError {}

#[derive(Debug, Clone)]
pub struct MigrationRequest {
    pub selected_types: BTreeSet<EntityType>,
    pub source: Scope,
    /// Absent means there is nowhere to migrate to
    pub destination: Option<Scope>,
    /// Match and rewrite, but never create
    pub dry_run: bool,
}

pub struct MigrationEngine {
    catalog: Catalog,
    options: EngineOptions,
    state: Mutex<EngineState>,
    cancel: CancelFlag,
}

impl MigrationEngine {
    pub fn new(catalog: Catalog, options: EngineOptions) -> Self {
        MigrationEngine {
            catalog,
            options,
            state: Mutex::new(EngineState::Idle),
            cancel: CancelFlag::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask the running migration to stop at its next checkpoint
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Handle that can cancel runs of this engine from elsewhere
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run a migration to completion
    ///
    /// # Errors
    /// `EngineError::Config` for an unusable request and
    /// `EngineError::Conflict` when a run is already active. Everything that
    /// goes wrong after the run started is reported in the [`RunResult`].
    pub async fn start(
        &self,
        request: MigrationRequest,
        source: &dyn EntityClient,
        destination: &dyn EntityClient,
        events: Option<mpsc::UnboundedSender<RunEvent>>,
    ) -> Result<RunResult, EngineError> {
        let destination_scope = self.validate(&request, source, destination)?;

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == EngineState::Running {
                return Err(EngineError::Conflict);
            }
            *state = EngineState::Running;
            self.cancel.reset();
        }

        let mut guard = RunGuard {
            state: &self.state,
            finished: false,
        };

        let run = Run {
            id: Uuid::new_v4(),
            catalog: &self.catalog,
            options: &self.options,
            cancel: &self.cancel,
            reporter: ProgressReporter::new(events),
            source,
            destination,
            dry_run: request.dry_run,
            ids: IdentifierMap::with_scope(
                request.source.service_org_id,
                destination_scope.service_org_id,
            ),
            outcomes: Vec::new(),
            processed: 0,
            seeded: BTreeSet::new(),
        };

        let result = run.execute(&request.selected_types).await;
        guard.finish(match result.outcome {
            RunOutcome::Completed | RunOutcome::Partial => EngineState::Completed,
            RunOutcome::Cancelled => EngineState::Cancelled,
            RunOutcome::Failed => EngineState::Failed,
        });

        Ok(result)
    }

    fn validate(
        &self,
        request: &MigrationRequest,
        source: &dyn EntityClient,
        destination: &dyn EntityClient,
    ) -> Result<Scope, EngineError> {
        request
            .source
            .validate()
            .map_err(|e| EngineError::Config(format!("source scope: {}", e)))?;

        let destination_scope = request.destination.clone().ok_or_else(|| {
            EngineError::Config("no destination scope given, use an export instead".to_string())
        })?;
        destination_scope
            .validate()
            .map_err(|e| EngineError::Config(format!("destination scope: {}", e)))?;

        if source.scope() != &request.source {
            return Err(EngineError::Config(format!(
                "source client is bound to {}, request names {}",
                source.scope(),
                request.source
            )));
        }
        if destination.scope() != &destination_scope {
            return Err(EngineError::Config(format!(
                "destination client is bound to {}, request names {}",
                destination.scope(),
                destination_scope
            )));
        }
        if request.source == destination_scope {
            return Err(EngineError::Config(
                "source and destination are the same scope".to_string(),
            ));
        }

        for entity_type in &request.selected_types {
            if !self.catalog.contains(*entity_type) {
                return Err(EngineError::Config(format!(
                    "{} is not in the entity catalog",
                    entity_type
                )));
            }
            if !self.catalog.is_migratable(*entity_type) {
                return Err(EngineError::Config(format!(
                    "{} can be exported but not migrated",
                    entity_type.label()
                )));
            }
        }

        Ok(destination_scope)
    }
}

/// Leaves the engine in `Failed` if a run is abandoned mid-flight
struct RunGuard<'a> {
    state: &'a Mutex<EngineState>,
    finished: bool,
}

impl RunGuard<'_> {
    fn finish(&mut self, state: EngineState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            *self.state.lock().unwrap_or_else(|e| e.into_inner()) = EngineState::Failed;
        }
    }
}

/// State owned by one in-flight run
struct Run<'a> {
    id: Uuid,
    catalog: &'a Catalog,
    options: &'a EngineOptions,
    cancel: &'a CancelFlag,
    reporter: ProgressReporter,
    source: &'a dyn EntityClient,
    destination: &'a dyn EntityClient,
    dry_run: bool,
    ids: IdentifierMap,
    outcomes: Vec<EntityOutcome>,
    processed: usize,
    /// Unselected types already matched against the destination
    seeded: BTreeSet<EntityType>,
}

/// Destination entities already created or matched during one type's pass
struct TypePass {
    existing: HashMap<String, String>,
    /// natural key -> (source id, destination id) of records handled this run
    claimed: HashMap<String, (String, String)>,
}

impl<'a> Run<'a> {
    async fn execute(mut self, selected: &BTreeSet<EntityType>) -> RunResult {
        let ordered = self.catalog.ordered_types(selected);
        if ordered.is_empty() {
            self.reporter.info("No entity types selected, nothing to migrate");
            return self.finish(RunOutcome::Completed, None);
        }

        self.reporter.info(format!(
            "Migrating {} from {} to {}{}",
            ordered
                .iter()
                .map(|t| t.label())
                .collect::<Vec<_>>()
                .join(", "),
            self.source.scope(),
            self.destination.scope(),
            if self.dry_run { " (dry run)" } else { "" }
        ));

        // Discovery: the cumulative total drives percent reporting
        let mut listings = Vec::with_capacity(ordered.len());
        for (index, entity_type) in ordered.iter().enumerate() {
            self.reporter.progress(
                "Discovery",
                format!("Fetching {} from source", entity_type.label()),
                0.0,
                index,
                ordered.len(),
            );
            match fetch_all(self.source, *entity_type, self.cancel).await {
                Ok(Some(records)) => {
                    self.reporter.info(format!(
                        "Found {} {} on source",
                        records.len(),
                        entity_type.label()
                    ));
                    listings.push((*entity_type, records));
                }
                Ok(None) => return self.cancelled(),
                Err(e) => {
                    return self.failed(format!(
                        "Failed to list {} on source: {}",
                        entity_type.label(),
                        e
                    ));
                }
            }
        }

        let total: usize = listings.iter().map(|(_, records)| records.len()).sum();
        if total == 0 {
            self.reporter.info("Source has no records for the selected types");
            return self.finish(RunOutcome::Completed, None);
        }

        for (entity_type, records) in listings {
            if self.cancel.is_cancelled() {
                return self.cancelled();
            }

            for referenced in self.unselected_references(entity_type, selected) {
                if self.seed(referenced).await.is_none() {
                    return self.cancelled();
                }
            }

            self.reporter.progress(
                entity_type.label(),
                format!("Matching {} against destination", entity_type.label()),
                percent(self.processed, total),
                0,
                records.len(),
            );

            let existing = match fetch_all(self.destination, entity_type, self.cancel).await {
                Ok(Some(records)) => self.snapshot(&records),
                Ok(None) => return self.cancelled(),
                Err(e) => {
                    return self.failed(format!(
                        "Failed to list {} on destination: {}",
                        entity_type.label(),
                        e
                    ));
                }
            };
            log::debug!(
                "{} existing {} on destination",
                existing.len(),
                entity_type.label()
            );

            let mut pass = TypePass {
                existing,
                claimed: HashMap::new(),
            };

            for (index, record) in records.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    return self.cancelled();
                }

                let outcome = self.process(record, &mut pass).await;
                self.processed += 1;

                let message = match &outcome.detail {
                    Some(detail) => format!("{} '{}': {}", outcome.status, outcome.name, detail),
                    None => format!("{} '{}'", outcome.status, outcome.name),
                };
                if outcome.status == EntityStatus::Failed {
                    self.reporter.warn(format!("{}: {}", entity_type, message));
                }
                self.reporter.progress(
                    entity_type.label(),
                    message,
                    percent(self.processed, total),
                    index + 1,
                    records.len(),
                );
                self.outcomes.push(outcome);
            }
        }

        let failed = self
            .outcomes
            .iter()
            .filter(|o| o.status == EntityStatus::Failed)
            .count();
        if failed > 0 {
            self.reporter
                .warn(format!("Migration finished with {} failed records", failed));
            self.finish(RunOutcome::Partial, None)
        } else {
            self.reporter.info("Migration finished");
            self.finish(RunOutcome::Completed, None)
        }
    }

    /// Types `entity_type` refers to that are outside the selection, together
    /// with the types their own references need, in dependency order
    fn unselected_references(
        &self,
        entity_type: EntityType,
        selected: &BTreeSet<EntityType>,
    ) -> Vec<EntityType> {
        let mut found = BTreeSet::new();
        let mut pending = vec![entity_type];
        while let Some(current) = pending.pop() {
            for fk in self.catalog.foreign_keys(current) {
                for candidate in fk.references.candidates() {
                    if selected.contains(&candidate)
                        || self.seeded.contains(&candidate)
                        || !self.catalog.contains(candidate)
                    {
                        continue;
                    }
                    if found.insert(candidate) {
                        pending.push(candidate);
                    }
                }
            }
        }
        self.catalog.ordered_types(&found)
    }

    /// Map source records of an unselected type onto the destination records
    /// with the same natural key
    ///
    /// Nothing is created. A failed listing leaves the type unmapped and
    /// references into it fail per record. Returns `None` when cancelled.
    async fn seed(&mut self, entity_type: EntityType) -> Option<()> {
        self.seeded.insert(entity_type);

        let mut listings = Vec::with_capacity(2);
        for (side, client) in [("source", self.source), ("destination", self.destination)] {
            match fetch_all(client, entity_type, self.cancel).await {
                Ok(Some(records)) => listings.push(records),
                Ok(None) => return None,
                Err(e) => {
                    self.reporter.warn(format!(
                        "Cannot match existing {}, failed to list them on {}: {}",
                        entity_type.label(),
                        side,
                        e
                    ));
                    return Some(());
                }
            }
        }
        let destination_records = listings.pop().unwrap_or_default();
        let source_records = listings.pop().unwrap_or_default();

        let existing = self.snapshot(&destination_records);
        let mut matched = 0;
        for record in &source_records {
            let key = self.catalog.natural_key(record, |t, id| {
                self.ids.resolve_target(t, id).map(str::to_string)
            });
            if let Some(dest_id) = key.and_then(|k| existing.get(&k)) {
                self.ids.put(entity_type, &record.source_id, dest_id);
                matched += 1;
            }
        }

        self.reporter.info(format!(
            "{} not selected, matched {} of {} by name on destination",
            entity_type.label(),
            matched,
            source_records.len()
        ));
        Some(())
    }

    /// natural key -> destination id, first record wins on collisions
    fn snapshot(&self, records: &[Record]) -> HashMap<String, String> {
        let mut existing = HashMap::with_capacity(records.len());
        for record in records {
            if let Some(key) = self
                .catalog
                .natural_key(record, |_, id| Some(id.to_string()))
            {
                existing
                    .entry(key)
                    .or_insert_with(|| record.source_id.clone());
            }
        }
        existing
    }

    async fn process(&mut self, record: &Record, pass: &mut TypePass) -> EntityOutcome {
        let entity_type = record.entity_type;
        let mut outcome = EntityOutcome {
            entity_type,
            source_id: record.source_id.clone(),
            name: record.display_name(self.catalog),
            status: EntityStatus::Failed,
            destination_id: None,
            detail: None,
        };

        let key = self.catalog.natural_key(record, |t, id| {
            self.ids.resolve_target(t, id).map(str::to_string)
        });

        if let Some(key) = &key {
            if let Some(dest_id) = pass.existing.get(key) {
                self.ids.put(entity_type, &record.source_id, dest_id);
                outcome.status = EntityStatus::SkippedDuplicate;
                outcome.destination_id = Some(dest_id.clone());
                return outcome;
            }

            if let Some((first_source, dest_id)) = pass.claimed.get(key) {
                match self.options.duplicate_policy {
                    DuplicatePolicy::FirstWins => {
                        self.ids.put(entity_type, &record.source_id, dest_id);
                        outcome.status = EntityStatus::SkippedDuplicate;
                        outcome.destination_id = Some(dest_id.clone());
                        outcome.detail = Some(format!("same name as source record {}", first_source));
                    }
                    DuplicatePolicy::Error => {
                        outcome.detail = Some(format!(
                            "Duplicate name: source record {} already maps to destination {}",
                            first_source, dest_id
                        ));
                    }
                }
                return outcome;
            }
        }

        let rewritten = match self.ids.rewrite(record, self.catalog) {
            Ok(rewritten) => rewritten,
            Err(e) => {
                outcome.detail = Some(format!("Reference error: {}", e));
                return outcome;
            }
        };

        let dest_id = if self.dry_run {
            outcome.status = EntityStatus::WouldCreate;
            format!("dry-run:{}", record.source_id)
        } else {
            match self.destination.create(entity_type, &rewritten).await {
                Ok(id) => {
                    outcome.status = EntityStatus::Created;
                    id
                }
                Err(e) => {
                    outcome.detail = Some(e.to_string());
                    return outcome;
                }
            }
        };

        self.ids.put(entity_type, &record.source_id, &dest_id);
        if let Some(key) = key {
            pass.claimed
                .insert(key, (record.source_id.clone(), dest_id.clone()));
        }
        outcome.destination_id = Some(dest_id);
        outcome
    }

    fn cancelled(self) -> RunResult {
        self.reporter.warn(format!(
            "Migration cancelled after {} records, records already created are kept",
            self.processed
        ));
        self.finish(RunOutcome::Cancelled, None)
    }

    fn failed(self, error: String) -> RunResult {
        self.reporter.error(error.clone());
        self.finish(RunOutcome::Failed, Some(error))
    }

    fn finish(self, outcome: RunOutcome, error: Option<String>) -> RunResult {
        log::info!(
            "Run {} finished: {} ({} records, {} mappings)",
            self.id,
            outcome,
            self.processed,
            self.ids.len()
        );
        RunResult {
            run_id: self.id,
            outcome,
            outcomes: self.outcomes,
            total_processed: self.processed,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ClientError, ClientErrorKind};
    use crate::transfer::client::Page;
    use async_trait::async_trait;
    use serde_json::{Value as JsonValue, json};
    use std::sync::Arc;
    use tokio::sync::Notify;

    const SOURCE_SO: i64 = 50;
    const DEST_SO: i64 = 900;

    /// In-memory server scope
    struct FakeServer {
        scope: Scope,
        catalog: Catalog,
        data: Mutex<HashMap<EntityType, Vec<Record>>>,
        next_id: Mutex<u64>,
        page_size: usize,
        created: Mutex<Vec<(EntityType, Record)>>,
        /// Create calls fail for records with these display names
        reject_names: Vec<&'static str>,
        /// Listings of this type fail
        broken_listing: Option<EntityType>,
        /// Cancel this flag once this many creates have happened
        cancel_after_creates: Option<(usize, CancelFlag)>,
        /// Pause the first listing until released
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl FakeServer {
        fn new(service_org_id: i64) -> Self {
            FakeServer {
                scope: Scope::new(format!("nc{}.example.com", service_org_id), service_org_id),
                catalog: Catalog::standard(),
                data: Mutex::new(HashMap::new()),
                next_id: Mutex::new(1000),
                page_size: 2,
                created: Mutex::new(Vec::new()),
                reject_names: Vec::new(),
                broken_listing: None,
                cancel_after_creates: None,
                gate: None,
            }
        }

        fn with(self, entity_type: EntityType, id: &str, fields: JsonValue) -> Self {
            let record = Record::new(entity_type, id, fields.as_object().cloned().unwrap());
            self.data
                .lock()
                .unwrap()
                .entry(entity_type)
                .or_default()
                .push(record);
            self
        }

        fn created(&self) -> Vec<(EntityType, Record)> {
            self.created.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EntityClient for FakeServer {
        fn scope(&self) -> &Scope {
            &self.scope
        }

        async fn list(&self, entity_type: EntityType, page: u32) -> Result<Page, ClientError> {
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            if self.broken_listing == Some(entity_type) {
                return Err(ClientError::new(ClientErrorKind::Server, "HTTP 500"));
            }
            let data = self.data.lock().unwrap();
            let all = data.get(&entity_type).cloned().unwrap_or_default();
            let start = (page as usize - 1) * self.page_size;
            let records: Vec<_> = all.iter().skip(start).take(self.page_size).cloned().collect();
            Ok(Page {
                has_more: start + self.page_size < all.len(),
                records,
            })
        }

        async fn create(&self, entity_type: EntityType, record: &Record) -> Result<String, ClientError> {
            let name = record.display_name(&self.catalog);
            if self.reject_names.contains(&name.as_str()) {
                return Err(ClientError::new(ClientErrorKind::Validation, "HTTP 400: rejected"));
            }

            let id = {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                next.to_string()
            };
            let descriptor = self.catalog.descriptor(entity_type);
            let mut fields = record.create_payload(&self.catalog);
            fields.insert(descriptor.id_fields[0].to_string(), json!(id.parse::<i64>().unwrap()));
            let stored = Record::new(entity_type, id.clone(), fields);

            self.data
                .lock()
                .unwrap()
                .entry(entity_type)
                .or_default()
                .push(stored);
            let count = {
                let mut created = self.created.lock().unwrap();
                created.push((entity_type, record.clone()));
                created.len()
            };
            if let Some((after, flag)) = &self.cancel_after_creates {
                if count == *after {
                    flag.cancel();
                }
            }
            Ok(id)
        }
    }

    fn request(types: &[EntityType], source: &FakeServer, destination: &FakeServer) -> MigrationRequest {
        MigrationRequest {
            selected_types: types.iter().copied().collect(),
            source: source.scope.clone(),
            destination: Some(destination.scope.clone()),
            dry_run: false,
        }
    }

    fn engine() -> MigrationEngine {
        MigrationEngine::new(Catalog::standard(), EngineOptions::default())
    }

    fn status_of(result: &RunResult, entity_type: EntityType, source_id: &str) -> EntityOutcome {
        result
            .outcomes
            .iter()
            .find(|o| o.entity_type == entity_type && o.source_id == source_id)
            .cloned()
            .unwrap_or_else(|| panic!("no outcome for {} {}", entity_type, source_id))
    }

    fn count_of(result: &RunResult, entity_type: EntityType) -> usize {
        result
            .outcomes
            .iter()
            .filter(|o| o.entity_type == entity_type)
            .count()
    }

    fn scenario_source() -> FakeServer {
        FakeServer::new(SOURCE_SO)
            .with(EntityType::Customer, "1", json!({"customerId": 1, "customerName": "Acme", "parentId": SOURCE_SO}))
            .with(EntityType::Customer, "2", json!({"customerName": "Globex", "customerId": 2, "parentId": SOURCE_SO}))
            .with(EntityType::UserRole, "10", json!({"roleId": 10, "roleName": "Technician", "orgUnitId": SOURCE_SO}))
            .with(EntityType::User, "20", json!({"userId": 20, "userName": "jane@acme.test", "orgUnitId": 1, "roleIds": [10]}))
            .with(EntityType::User, "21", json!({"userId": 21, "userName": "joe@globex.test", "orgUnitId": 2, "roleIds": [10]}))
    }

    #[tokio::test]
    async fn test_empty_selection_completes() {
        let source = scenario_source();
        let destination = FakeServer::new(DEST_SO);
        let engine = engine();

        let result = engine
            .start(request(&[], &source, &destination), &source, &destination, None)
            .await
            .unwrap();

        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.total_processed, 0);
        assert!(result.outcomes.is_empty());
        assert_eq!(engine.state(), EngineState::Completed);
    }

    #[tokio::test]
    async fn test_existing_customer_is_reused_by_users() {
        let source = scenario_source();
        let destination = FakeServer::new(DEST_SO).with(
            EntityType::Customer,
            "555",
            json!({"customerId": 555, "customerName": "ACME ", "parentId": DEST_SO}),
        );
        let engine = engine();

        let result = engine
            .start(
                request(&[EntityType::User, EntityType::Customer, EntityType::UserRole], &source, &destination),
                &source,
                &destination,
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.total_processed, 5);

        let acme = status_of(&result, EntityType::Customer, "1");
        assert_eq!(acme.status, EntityStatus::SkippedDuplicate);
        assert_eq!(acme.destination_id.as_deref(), Some("555"));
        assert_eq!(status_of(&result, EntityType::Customer, "2").status, EntityStatus::Created);

        let created = destination.created();
        let globex = created
            .iter()
            .find(|(t, r)| *t == EntityType::Customer && r.get("customerName") == Some(&json!("Globex")))
            .unwrap();
        assert_eq!(globex.1.get("parentId"), Some(&json!(DEST_SO)));

        let jane = created
            .iter()
            .find(|(t, r)| *t == EntityType::User && r.source_id == "20")
            .unwrap();
        assert_eq!(jane.1.get("orgUnitId"), Some(&json!(555)));

        let role_dest = status_of(&result, EntityType::UserRole, "10").destination_id.unwrap();
        assert_eq!(
            jane.1.get("roleIds"),
            Some(&json!([role_dest.parse::<i64>().unwrap()]))
        );
    }

    #[tokio::test]
    async fn test_types_processed_in_dependency_order() {
        let source = scenario_source();
        let destination = FakeServer::new(DEST_SO);
        let engine = engine();

        let result = engine
            .start(
                request(&[EntityType::User, EntityType::UserRole, EntityType::Customer], &source, &destination),
                &source,
                &destination,
                None,
            )
            .await
            .unwrap();

        let ranks: Vec<u8> = result
            .outcomes
            .iter()
            .map(|o| engine.catalog().rank(o.entity_type))
            .collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);

        let created_types: Vec<_> = destination.created().iter().map(|(t, _)| *t).collect();
        assert_eq!(
            created_types,
            vec![
                EntityType::Customer,
                EntityType::Customer,
                EntityType::UserRole,
                EntityType::User,
                EntityType::User,
            ]
        );
    }

    #[tokio::test]
    async fn test_second_run_skips_everything() {
        let source = scenario_source();
        let destination = FakeServer::new(DEST_SO);
        let engine = engine();
        let types = [EntityType::Customer, EntityType::UserRole, EntityType::User];

        let first = engine
            .start(request(&types, &source, &destination), &source, &destination, None)
            .await
            .unwrap();
        assert!(first.outcomes.iter().all(|o| o.status == EntityStatus::Created));

        let second = engine
            .start(request(&types, &source, &destination), &source, &destination, None)
            .await
            .unwrap();

        assert_eq!(second.outcome, RunOutcome::Completed);
        assert_eq!(second.outcomes.len(), first.outcomes.len());
        for (a, b) in first.outcomes.iter().zip(&second.outcomes) {
            assert_eq!(b.status, EntityStatus::SkippedDuplicate, "{} {}", b.entity_type, b.name);
            assert_eq!(a.destination_id, b.destination_id);
        }
        assert_eq!(destination.created().len(), first.outcomes.len());
    }

    #[tokio::test]
    async fn test_failed_role_fails_dependent_user() {
        let source = scenario_source();
        let mut destination = FakeServer::new(DEST_SO);
        destination.reject_names = vec!["Technician"];
        let engine = engine();

        let result = engine
            .start(
                request(&[EntityType::Customer, EntityType::UserRole, EntityType::User], &source, &destination),
                &source,
                &destination,
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.outcome, RunOutcome::Partial);
        assert_eq!(engine.state(), EngineState::Completed);

        let role = status_of(&result, EntityType::UserRole, "10");
        assert_eq!(role.status, EntityStatus::Failed);
        assert!(role.detail.unwrap().contains("rejected"));

        for user in ["20", "21"] {
            let outcome = status_of(&result, EntityType::User, user);
            assert_eq!(outcome.status, EntityStatus::Failed);
            assert!(outcome.detail.unwrap().starts_with("Reference error"));
        }
        assert_eq!(result.total_processed, 5);
    }

    #[tokio::test]
    async fn test_cancel_mid_type() {
        let source = FakeServer::new(SOURCE_SO)
            .with(EntityType::Customer, "1", json!({"customerId": 1, "customerName": "A"}))
            .with(EntityType::Customer, "2", json!({"customerId": 2, "customerName": "B"}))
            .with(EntityType::Customer, "3", json!({"customerId": 3, "customerName": "C"}))
            .with(EntityType::Customer, "4", json!({"customerId": 4, "customerName": "D"}))
            .with(EntityType::UserRole, "10", json!({"roleId": 10, "roleName": "R"}));
        let engine = engine();
        let mut destination = FakeServer::new(DEST_SO);
        destination.cancel_after_creates = Some((2, engine.cancel_flag()));

        let result = engine
            .start(
                request(&[EntityType::Customer, EntityType::UserRole], &source, &destination),
                &source,
                &destination,
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.outcome, RunOutcome::Cancelled);
        assert_eq!(engine.state(), EngineState::Cancelled);
        assert_eq!(result.total_processed, 2);
        assert_eq!(count_of(&result, EntityType::Customer), 2);
        assert_eq!(count_of(&result, EntityType::UserRole), 0);

        let ids: Vec<_> = result.outcomes.iter().map(|o| o.source_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_new_run_clears_previous_cancel() {
        let source = scenario_source();
        let destination = FakeServer::new(DEST_SO);
        let engine = engine();
        engine.cancel();

        let result = engine
            .start(request(&[EntityType::Customer], &source, &destination), &source, &destination, None)
            .await
            .unwrap();
        assert_eq!(result.outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_start_while_running_conflicts() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut source = scenario_source();
        source.gate = Some((entered.clone(), release.clone()));
        let destination = FakeServer::new(DEST_SO);
        let other_source = scenario_source();
        let engine = engine();

        let first = engine.start(
            request(&[EntityType::Customer], &source, &destination),
            &source,
            &destination,
            None,
        );
        let second = async {
            entered.notified().await;
            let err = engine
                .start(
                    request(&[EntityType::Customer], &other_source, &destination),
                    &other_source,
                    &destination,
                    None,
                )
                .await
                .unwrap_err();
            assert_eq!(err, EngineError::Conflict);
            assert_eq!(engine.state(), EngineState::Running);
            // keep releasing, the gated source pauses on every page
            for _ in 0..8 {
                release.notify_one();
                tokio::task::yield_now().await;
            }
        };

        let (result, _) = tokio::join!(first, second);
        let result = result.unwrap();
        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(engine.state(), EngineState::Completed);
    }

    #[tokio::test]
    async fn test_config_errors_reject_before_start() {
        let source = scenario_source();
        let destination = FakeServer::new(DEST_SO);
        let engine = engine();

        let mut no_destination = request(&[EntityType::Customer], &source, &destination);
        no_destination.destination = None;
        assert!(matches!(
            engine.start(no_destination, &source, &destination, None).await,
            Err(EngineError::Config(_))
        ));

        let devices = request(&[EntityType::Device], &source, &destination);
        assert!(matches!(
            engine.start(devices, &source, &destination, None).await,
            Err(EngineError::Config(_))
        ));

        let mut bad_scope = request(&[EntityType::Customer], &source, &destination);
        bad_scope.source = Scope::new("", SOURCE_SO);
        assert!(matches!(
            engine.start(bad_scope, &source, &destination, None).await,
            Err(EngineError::Config(_))
        ));

        let same = request(&[EntityType::Customer], &source, &source);
        assert!(matches!(
            engine.start(same, &source, &source, None).await,
            Err(EngineError::Config(_))
        ));

        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn test_duplicate_source_names_first_wins() {
        let source = FakeServer::new(SOURCE_SO)
            .with(EntityType::UserRole, "1", json!({"roleId": 1, "roleName": "Admin"}))
            .with(EntityType::UserRole, "2", json!({"roleId": 2, "roleName": "admin"}))
            .with(EntityType::User, "3", json!({"userId": 3, "userName": "x", "roleIds": [2]}));
        let destination = FakeServer::new(DEST_SO);
        let engine = engine();

        let result = engine
            .start(
                request(&[EntityType::UserRole, EntityType::User], &source, &destination),
                &source,
                &destination,
                None,
            )
            .await
            .unwrap();

        let first = status_of(&result, EntityType::UserRole, "1");
        let second = status_of(&result, EntityType::UserRole, "2");
        assert_eq!(first.status, EntityStatus::Created);
        assert_eq!(second.status, EntityStatus::SkippedDuplicate);
        assert_eq!(first.destination_id, second.destination_id);
        assert_eq!(status_of(&result, EntityType::User, "3").status, EntityStatus::Created);
        assert_eq!(destination.created().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_source_names_error_policy() {
        let source = FakeServer::new(SOURCE_SO)
            .with(EntityType::UserRole, "1", json!({"roleId": 1, "roleName": "Admin"}))
            .with(EntityType::UserRole, "2", json!({"roleId": 2, "roleName": "Admin"}));
        let destination = FakeServer::new(DEST_SO);
        let engine = MigrationEngine::new(
            Catalog::standard(),
            EngineOptions {
                duplicate_policy: DuplicatePolicy::Error,
            },
        );

        let result = engine
            .start(request(&[EntityType::UserRole], &source, &destination), &source, &destination, None)
            .await
            .unwrap();

        assert_eq!(result.outcome, RunOutcome::Partial);
        let second = status_of(&result, EntityType::UserRole, "2");
        assert_eq!(second.status, EntityStatus::Failed);
        assert!(second.detail.unwrap().contains("Duplicate name"));
    }

    #[tokio::test]
    async fn test_dry_run_creates_nothing() {
        let source = scenario_source();
        let destination = FakeServer::new(DEST_SO).with(
            EntityType::Customer,
            "555",
            json!({"customerId": 555, "customerName": "Acme"}),
        );
        let engine = engine();
        let mut req = request(&[EntityType::Customer, EntityType::UserRole, EntityType::User], &source, &destination);
        req.dry_run = true;

        let result = engine.start(req, &source, &destination, None).await.unwrap();

        assert_eq!(result.outcome, RunOutcome::Completed);
        assert!(destination.created().is_empty());
        assert_eq!(status_of(&result, EntityType::Customer, "1").status, EntityStatus::SkippedDuplicate);
        assert_eq!(status_of(&result, EntityType::Customer, "2").status, EntityStatus::WouldCreate);
        assert_eq!(status_of(&result, EntityType::User, "21").status, EntityStatus::WouldCreate);
    }

    #[tokio::test]
    async fn test_listing_failure_fails_run() {
        let source = scenario_source();
        let mut destination = FakeServer::new(DEST_SO);
        destination.broken_listing = Some(EntityType::UserRole);
        let engine = engine();

        let result = engine
            .start(
                request(&[EntityType::Customer, EntityType::UserRole, EntityType::User], &source, &destination),
                &source,
                &destination,
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.outcome, RunOutcome::Failed);
        assert_eq!(engine.state(), EngineState::Failed);
        assert!(result.error.as_deref().unwrap().contains("destination"));
        assert_eq!(count_of(&result, EntityType::Customer), 2);
        assert_eq!(count_of(&result, EntityType::UserRole), 0);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let source = scenario_source();
        let destination = FakeServer::new(DEST_SO);
        let engine = engine();
        let (tx, mut rx) = mpsc::unbounded_channel();

        engine
            .start(request(&[EntityType::Customer, EntityType::UserRole], &source, &destination), &source, &destination, Some(tx))
            .await
            .unwrap();

        let mut updates = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RunEvent::Progress(p) = event {
                updates.push(p);
            }
        }

        let per_record: Vec<_> = updates
            .iter()
            .filter(|p| p.phase != "Discovery" && p.current > 0)
            .collect();
        assert_eq!(per_record.len(), 3);
        assert!(per_record.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(per_record.last().unwrap().percent, 100.0);
        assert!(updates.iter().all(|p| (0.0..=100.0).contains(&p.percent)));
        assert_eq!(per_record[0].phase, "Customers");
        assert_eq!(per_record[0].total, 2);
    }

    #[tokio::test]
    async fn test_references_into_sites_resolve() {
        let source = FakeServer::new(SOURCE_SO)
            .with(EntityType::Customer, "1", json!({"customerId": 1, "customerName": "Acme", "parentId": SOURCE_SO}))
            .with(EntityType::Site, "5", json!({"siteId": 5, "siteName": "HQ", "parentId": 1}))
            .with(EntityType::User, "20", json!({"userId": 20, "userName": "jane@acme.test", "orgUnitId": 5}))
            .with(EntityType::OrgProperty, "30", json!({"propertyId": 30, "label": "Asset Tag", "orgUnitId": 5}));
        let destination = FakeServer::new(DEST_SO);
        let engine = engine();

        let result = engine
            .start(
                request(
                    &[EntityType::Customer, EntityType::Site, EntityType::User, EntityType::OrgProperty],
                    &source,
                    &destination,
                ),
                &source,
                &destination,
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.outcome, RunOutcome::Completed);
        assert!(result.outcomes.iter().all(|o| o.status == EntityStatus::Created));

        let site_dest: i64 = status_of(&result, EntityType::Site, "5")
            .destination_id
            .unwrap()
            .parse()
            .unwrap();
        let created = destination.created();
        for entity_type in [EntityType::User, EntityType::OrgProperty] {
            let (_, record) = created.iter().find(|(t, _)| *t == entity_type).unwrap();
            assert_eq!(record.get("orgUnitId"), Some(&json!(site_dest)), "{}", entity_type);
        }
    }

    #[tokio::test]
    async fn test_unselected_roles_matched_by_name() {
        let source = FakeServer::new(SOURCE_SO)
            .with(EntityType::Customer, "1", json!({"customerId": 1, "customerName": "Acme", "parentId": SOURCE_SO}))
            .with(EntityType::UserRole, "10", json!({"roleId": 10, "roleName": "Technician"}))
            .with(EntityType::UserRole, "11", json!({"roleId": 11, "roleName": "Auditor"}))
            .with(EntityType::User, "20", json!({"userId": 20, "userName": "jane@acme.test", "orgUnitId": 1, "roleIds": [10]}))
            .with(EntityType::User, "21", json!({"userId": 21, "userName": "joe@acme.test", "orgUnitId": 1, "roleIds": [11]}));
        let destination = FakeServer::new(DEST_SO).with(
            EntityType::UserRole,
            "77",
            json!({"roleId": 77, "roleName": "technician"}),
        );
        let engine = engine();

        let result = engine
            .start(
                request(&[EntityType::Customer, EntityType::User], &source, &destination),
                &source,
                &destination,
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.outcome, RunOutcome::Partial);
        assert_eq!(count_of(&result, EntityType::UserRole), 0);

        assert_eq!(status_of(&result, EntityType::User, "20").status, EntityStatus::Created);
        let created = destination.created();
        let (_, jane) = created
            .iter()
            .find(|(t, r)| *t == EntityType::User && r.source_id == "20")
            .unwrap();
        assert_eq!(jane.get("roleIds"), Some(&json!([77])));

        let joe = status_of(&result, EntityType::User, "21");
        assert_eq!(joe.status, EntityStatus::Failed);
        assert!(joe.detail.unwrap().contains("UserRole 11"));
        assert!(created.iter().all(|(t, _)| *t != EntityType::UserRole));
    }
}
