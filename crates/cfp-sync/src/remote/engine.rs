//! Pushes local records into the remote database and reconciles pages the local store no
//! longer knows about.

use std::collections::HashSet;
use std::fmt;

use cfp_core::{normalize_url, EventRecord};
use cfp_storage::FixedDelay;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::resolve::{
    closed_status, create_properties, name_and_date_filter, resolve_candidates, update_properties,
    MatchStrategy, Resolution,
};
use super::{
    PropertyDefinition, PropertyKind, Query, QueryFilter, RemoteDatabase, RemoteError,
    RemotePage, RemoteSchema, SourceScope, PROP_SOURCE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    CloseDuplicate,
    MarkClosed,
    ArchiveMissing,
}

impl ActionKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::CloseDuplicate => "CLOSE DUPLICATE",
            Self::MarkClosed => "MARK CLOSED",
            Self::ArchiveMissing => "ARCHIVE MISSING",
        }
    }
}

/// One remote mutation, performed or (in dry-run) only announced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncAction {
    pub kind: ActionKind,
    pub name: Option<String>,
    pub target: String,
}

impl SyncAction {
    fn new(kind: ActionKind, name: Option<&str>, target: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.map(str::to_string),
            target: target.into(),
        }
    }

    fn announce(&self, dry_run: bool) {
        if dry_run {
            info!("[DRY-RUN] {self}");
        } else {
            debug!("{self}");
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}: {} ({})", self.kind.label(), name, self.target),
            None => write!(f, "{}: {}", self.kind.label(), self.target),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub created: usize,
    pub updated: usize,
    pub processed: usize,
    pub skipped: usize,
    pub closed_duplicates: usize,
    pub created_items: Vec<String>,
    pub updated_items: Vec<String>,
    pub actions: Vec<SyncAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub scanned: usize,
    pub affected: usize,
    pub actions: Vec<SyncAction>,
}

/// Sequential, rate-paced sync against one remote database.
///
/// The schema is read once when connecting. It decides how the workflow status and source
/// tag are written and whether queries are scoped to this tracker's source tag.
pub struct RemoteSyncEngine<'a, R: RemoteDatabase + ?Sized> {
    remote: &'a R,
    schema: RemoteSchema,
    scope: Option<SourceScope>,
    source_tag: String,
}

impl<'a, R: RemoteDatabase + ?Sized> RemoteSyncEngine<'a, R> {
    /// Introspect the schema. A failure leaves the schema empty, which disables every
    /// kind-dependent write instead of aborting the run.
    pub async fn connect(remote: &'a R, source_tag: &str) -> Self {
        let schema = match remote.retrieve_schema().await {
            Ok(schema) => schema,
            Err(err) => {
                warn!(error = %err, "schema introspection failed; status and source writes disabled");
                RemoteSchema::default()
            }
        };
        Self::with_schema(remote, source_tag, schema)
    }

    pub fn with_schema(remote: &'a R, source_tag: &str, schema: RemoteSchema) -> Self {
        let scope = SourceScope::from_schema(&schema, source_tag);
        if scope.is_none() {
            warn!(
                property = PROP_SOURCE,
                "no usable source property; every page in the database is treated as ours"
            );
        }
        Self {
            remote,
            schema,
            scope,
            source_tag: source_tag.to_string(),
        }
    }

    pub fn schema(&self) -> &RemoteSchema {
        &self.schema
    }

    pub fn scope(&self) -> Option<&SourceScope> {
        self.scope.as_ref()
    }

    /// Add the `Source` select property when the database lacks it. Returns whether the
    /// property was (or in dry-run would be) added.
    ///
    /// Scoping stays as it was at connect time: pages created before the property existed
    /// carry no tag and must stay matchable for the rest of this run.
    pub async fn ensure_schema(&mut self, dry_run: bool) -> Result<bool, RemoteError> {
        if self.schema.is_empty() {
            warn!("schema unknown; not adding properties");
            return Ok(false);
        }
        if self.schema.kind(PROP_SOURCE).is_some() {
            debug!(property = PROP_SOURCE, "schema already has the source property");
            return Ok(false);
        }
        if dry_run {
            info!("[DRY-RUN] ADD PROPERTY: {PROP_SOURCE} (select)");
            return Ok(true);
        }

        let definition = PropertyDefinition::select(PROP_SOURCE, [self.source_tag.clone()]);
        self.remote
            .add_properties(std::slice::from_ref(&definition))
            .await?;
        self.schema.insert(PROP_SOURCE, PropertyKind::Select);
        info!(property = PROP_SOURCE, "added source property to the database");
        Ok(true)
    }

    /// Create or update one page per record, in store order, for at most `limit` records.
    pub async fn upsert(
        &self,
        records: &[EventRecord],
        limit: Option<usize>,
        dry_run: bool,
        requests_per_second: f64,
    ) -> Result<UpsertSummary, RemoteError> {
        let pacer = FixedDelay::from_requests_per_second(requests_per_second);
        let mut summary = UpsertSummary::default();

        for record in records.iter().take(limit.unwrap_or(usize::MAX)) {
            summary.processed += 1;
            let name = record.display_name();
            let url_key = normalize_url(record.hyperlink.as_deref().unwrap_or_default());
            if url_key.is_empty() {
                warn!(event = %name, "skipping event without a hyperlink");
                summary.skipped += 1;
                continue;
            }

            match self.resolve(record, &url_key).await? {
                Resolution::Matched { page, strategy } => {
                    debug!(event = %name, page_id = %page.id, ?strategy, "matched remote page");
                    let properties = update_properties(record, &page, &self.schema);
                    if !dry_run {
                        self.remote.update_page(&page.id, &properties).await?;
                    }
                    let action = SyncAction::new(ActionKind::Update, Some(name.as_str()), url_key.as_str());
                    action.announce(dry_run);
                    summary.actions.push(action);
                    summary.updated += 1;
                    summary.updated_items.push(name);
                }
                Resolution::Unmatched { stale } => {
                    for duplicate in &stale {
                        let action = SyncAction::new(
                            ActionKind::CloseDuplicate,
                            Some(name.as_str()),
                            format!("{} -> {}", duplicate.url_key(), url_key),
                        );
                        if self.close_page(duplicate, action, dry_run, &mut summary.actions).await? {
                            summary.closed_duplicates += 1;
                            pacer.wait().await;
                        }
                    }

                    let properties =
                        create_properties(record, &url_key, &self.schema, &self.source_tag);
                    if !dry_run {
                        let page_id = self.remote.create_page(&properties).await?;
                        debug!(event = %name, %page_id, "created remote page");
                    }
                    let action = SyncAction::new(ActionKind::Create, Some(name.as_str()), url_key.as_str());
                    action.announce(dry_run);
                    summary.actions.push(action);
                    summary.created += 1;
                    summary.created_items.push(name);
                }
            }
            pacer.wait().await;
        }

        info!(
            created = summary.created,
            updated = summary.updated,
            processed = summary.processed,
            dry_run,
            "remote upsert finished"
        );
        Ok(summary)
    }

    /// Close (or archive) every scoped page whose normalized URL is not in `current_url_keys`.
    pub async fn reconcile_missing(
        &self,
        current_url_keys: &HashSet<String>,
        dry_run: bool,
        requests_per_second: f64,
        archive: bool,
    ) -> Result<ReconcileSummary, RemoteError> {
        let pacer = FixedDelay::from_requests_per_second(requests_per_second);
        let mut summary = ReconcileSummary::default();

        for page in self.list_all().await? {
            summary.scanned += 1;
            let url_key = page.url_key();
            if url_key.is_empty() || current_url_keys.contains(&url_key) {
                continue;
            }

            if archive {
                if self.schema.is_empty() && !self.tagged_as_ours(&page) {
                    warn!(page_id = %page.id, "schema unknown and page not tagged with this source; not archiving");
                    continue;
                }
                if !dry_run {
                    self.remote.archive_page(&page.id).await?;
                }
                let action = SyncAction::new(ActionKind::ArchiveMissing, None, page.id.as_str());
                action.announce(dry_run);
                summary.actions.push(action);
            } else {
                let action = SyncAction::new(ActionKind::MarkClosed, None, page.id.as_str());
                if !self.close_page(&page, action, dry_run, &mut summary.actions).await? {
                    continue;
                }
            }
            summary.affected += 1;
            pacer.wait().await;
        }

        info!(
            scanned = summary.scanned,
            affected = summary.affected,
            archive,
            dry_run,
            "remote reconciliation finished"
        );
        Ok(summary)
    }

    /// URL key lookup first, then the name+date fallback.
    async fn resolve(&self, record: &EventRecord, url_key: &str) -> Result<Resolution, RemoteError> {
        let by_url = self
            .query_once(QueryFilter::UrlEquals(url_key.to_string()))
            .await?;
        if let Some(page) = by_url.into_iter().next() {
            return Ok(Resolution::Matched {
                page,
                strategy: MatchStrategy::UrlKey,
            });
        }

        match name_and_date_filter(record) {
            Some(filter) => {
                let candidates = self.query_once(filter).await?;
                Ok(resolve_candidates(candidates, url_key))
            }
            None => Ok(Resolution::Unmatched { stale: Vec::new() }),
        }
    }

    /// First result page only, re-checked against the source scope.
    async fn query_once(&self, filter: QueryFilter) -> Result<Vec<RemotePage>, RemoteError> {
        let query = Query::new(filter, self.scope.clone());
        let result = self.remote.query(&query).await?;
        Ok(result
            .pages
            .into_iter()
            .filter(|page| self.owns(&query, page))
            .collect())
    }

    /// Every scoped page, collected before any mutation so cursors stay valid.
    async fn list_all(&self) -> Result<Vec<RemotePage>, RemoteError> {
        let base = Query::new(QueryFilter::All, self.scope.clone());
        let mut pages = Vec::new();
        let mut cursor = None;
        loop {
            let query = base.clone().after(cursor);
            let result = self.remote.query(&query).await?;
            pages.extend(result.pages.into_iter().filter(|page| self.owns(&query, page)));
            match result.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(pages)
    }

    /// Client-side re-check of a query result. Without a usable scope, a page naming a
    /// different source is still foreign; untagged pages count as ours.
    fn owns(&self, query: &Query, page: &RemotePage) -> bool {
        if !query.admits(page) {
            return false;
        }
        if self.scope.is_some() {
            return true;
        }
        match page.text(PROP_SOURCE) {
            Some(tag) if !tag.trim().is_empty() => tag.trim() == self.source_tag,
            _ => true,
        }
    }

    fn tagged_as_ours(&self, page: &RemotePage) -> bool {
        page.text(PROP_SOURCE)
            .is_some_and(|tag| tag.trim() == self.source_tag)
    }

    /// Set the workflow status to closed. Returns `false` when the status kind is unknown
    /// and nothing was (or would have been) written.
    async fn close_page(
        &self,
        page: &RemotePage,
        action: SyncAction,
        dry_run: bool,
        actions: &mut Vec<SyncAction>,
    ) -> Result<bool, RemoteError> {
        let Some(properties) = closed_status(&self.schema) else {
            warn!(page_id = %page.id, "status kind unknown; page left as is");
            return Ok(false);
        };
        if !dry_run {
            self.remote.update_page(&page.id, &properties).await?;
        }
        action.announce(dry_run);
        actions.push(action);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{
        MemoryDatabase, Mutation, PropertyMap, PropertyValue, PROP_DATE, PROP_NAME, PROP_STATUS,
        PROP_TECHNOLOGY, PROP_URL,
    };
    use cfp_core::{CandidateEvent, DateValue};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    const TAG: &str = "developers.events";
    const FAST: f64 = 1000.0;

    fn schema() -> RemoteSchema {
        RemoteSchema::from_properties([
            (PROP_NAME, PropertyKind::Title),
            (PROP_URL, PropertyKind::Url),
            (PROP_DATE, PropertyKind::Date),
            (PROP_TECHNOLOGY, PropertyKind::MultiSelect),
            (PROP_STATUS, PropertyKind::Status),
            (PROP_SOURCE, PropertyKind::Select),
        ])
    }

    fn record(name: &str, hyperlink: &str) -> EventRecord {
        EventRecord::first_sighting(
            CandidateEvent {
                name: Some(name.into()),
                hyperlink: Some(hyperlink.into()),
                event_start: Some(DateValue::Text("2025-10-01".into())),
                source_tags: Some(vec!["cloud".into()]),
                ..CandidateEvent::default()
            },
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        )
    }

    fn page(name: &str, url: &str, source: &str) -> PropertyMap {
        PropertyMap::from([
            (PROP_NAME.to_string(), PropertyValue::Title(name.into())),
            (PROP_URL.to_string(), PropertyValue::Url(Some(url.into()))),
            (
                PROP_DATE.to_string(),
                PropertyValue::Date {
                    start: Some("2025-10-01".into()),
                    end: None,
                },
            ),
            (PROP_SOURCE.to_string(), PropertyValue::Select(source.into())),
        ])
    }

    #[tokio::test]
    async fn creates_unmatched_and_updates_matched() {
        let db = MemoryDatabase::new(schema());
        let existing = db.insert_page(&page("Jfokus", "https://www.jfokus.se", TAG));
        let engine = RemoteSyncEngine::connect(&db, TAG).await;

        let records = vec![record("DevConf", "https://DevConf.info/cfp/"), record("Jfokus", "https://www.jfokus.se/")];
        let summary = engine.upsert(&records, None, false, FAST).await.unwrap();

        assert_eq!((summary.created, summary.updated, summary.processed), (1, 1, 2));
        assert_eq!(summary.created_items, vec!["DevConf"]);
        assert_eq!(summary.updated_items, vec!["Jfokus"]);

        let mutations = db.mutations();
        match &mutations[0] {
            Mutation::Create { properties, .. } => {
                assert_eq!(properties.get(PROP_STATUS), Some(&PropertyValue::Status("Open".into())));
                assert_eq!(properties.get(PROP_SOURCE), Some(&PropertyValue::Select(TAG.into())));
                assert_eq!(
                    properties.get(PROP_URL),
                    Some(&PropertyValue::Url(Some("https://devconf.info/cfp".into())))
                );
            }
            other => panic!("expected create, got {other:?}"),
        }
        assert!(matches!(&mutations[1], Mutation::Update { page_id, .. } if *page_id == existing));
    }

    #[tokio::test]
    async fn second_run_updates_what_the_first_created() {
        let db = MemoryDatabase::new(schema());
        let engine = RemoteSyncEngine::connect(&db, TAG).await;
        let records = vec![record("DevConf", "https://devconf.info/cfp")];

        engine.upsert(&records, None, false, FAST).await.unwrap();
        let again = engine.upsert(&records, None, false, FAST).await.unwrap();
        assert_eq!((again.created, again.updated), (0, 1));
        assert_eq!(db.pages().len(), 1);
    }

    #[tokio::test]
    async fn changed_url_closes_stale_duplicate_then_creates() {
        let db = MemoryDatabase::new(schema());
        let stale = db.insert_page(&page("DevConf", "https://old.devconf.info", TAG));
        let engine = RemoteSyncEngine::connect(&db, TAG).await;

        let summary = engine
            .upsert(&[record("DevConf", "https://devconf.info/cfp")], None, false, FAST)
            .await
            .unwrap();
        assert_eq!((summary.closed_duplicates, summary.created), (1, 1));
        assert_eq!(
            db.page(&stale).unwrap().text(PROP_STATUS).as_deref(),
            Some("Closed")
        );
        assert_eq!(summary.actions[0].kind, ActionKind::CloseDuplicate);
    }

    #[tokio::test]
    async fn name_and_date_candidate_with_same_url_is_updated() {
        let db = MemoryDatabase::new(schema());
        let id = db.insert_page(&page("DevConf", "https://DEVCONF.info/cfp/", TAG));
        let engine = RemoteSyncEngine::connect(&db, TAG).await;

        let summary = engine
            .upsert(&[record("DevConf", "https://devconf.info/cfp")], None, false, FAST)
            .await
            .unwrap();
        assert_eq!((summary.created, summary.updated, summary.closed_duplicates), (0, 1, 0));
        assert!(matches!(&db.mutations()[0], Mutation::Update { page_id, .. } if *page_id == id));
    }

    #[tokio::test]
    async fn pages_of_other_sources_are_never_touched() {
        let db = MemoryDatabase::new(schema());
        db.insert_page(&page("DevConf", "https://devconf.info/cfp", "manual"));
        let engine = RemoteSyncEngine::connect(&db, TAG).await;

        let summary = engine
            .upsert(&[record("DevConf", "https://devconf.info/cfp")], None, false, FAST)
            .await
            .unwrap();
        assert_eq!((summary.created, summary.updated, summary.closed_duplicates), (1, 0, 0));

        let reconciled = engine
            .reconcile_missing(&HashSet::new(), false, FAST, false)
            .await
            .unwrap();
        // only the page created above is in scope
        assert_eq!(reconciled.scanned, 1);
        assert_eq!(db.pages()[0].text(PROP_STATUS), None);
    }

    #[tokio::test]
    async fn records_without_hyperlink_and_limit() {
        let db = MemoryDatabase::new(schema());
        let engine = RemoteSyncEngine::connect(&db, TAG).await;
        let mut nameless = record("Nowhere", "");
        nameless.hyperlink = None;
        let records = vec![nameless, record("A", "https://a.example"), record("B", "https://b.example")];

        let summary = engine.upsert(&records, Some(2), false, FAST).await.unwrap();
        assert_eq!((summary.processed, summary.skipped, summary.created), (2, 1, 1));
    }

    #[tokio::test]
    async fn dry_run_issues_no_mutations() {
        let db = MemoryDatabase::new(schema());
        db.insert_page(&page("Gone", "https://gone.example", TAG));
        let mut engine = RemoteSyncEngine::connect(&db, TAG).await;

        assert!(!engine.ensure_schema(true).await.unwrap());
        let summary = engine
            .upsert(&[record("DevConf", "https://devconf.info/cfp")], None, true, FAST)
            .await
            .unwrap();
        let reconciled = engine
            .reconcile_missing(&HashSet::from(["https://devconf.info/cfp".to_string()]), true, FAST, true)
            .await
            .unwrap();

        assert_eq!((summary.created, summary.updated), (1, 0));
        assert_eq!(summary.actions[0].to_string(), "CREATE: DevConf (https://devconf.info/cfp)");
        assert_eq!((reconciled.scanned, reconciled.affected), (1, 1));
        assert_eq!(reconciled.actions[0].kind, ActionKind::ArchiveMissing);
        assert!(db.mutations().is_empty());
    }

    #[tokio::test]
    async fn reconcile_marks_unknown_pages_closed() {
        let db = MemoryDatabase::new(schema());
        let keep = db.insert_page(&page("Keep", "https://keep.example/", TAG));
        let gone = db.insert_page(&page("Gone", "https://gone.example", TAG));
        db.insert_page(&page("No url", "", TAG));
        let engine = RemoteSyncEngine::connect(&db, TAG).await;

        let keys = HashSet::from(["https://keep.example".to_string()]);
        let summary = engine.reconcile_missing(&keys, false, FAST, false).await.unwrap();

        assert_eq!((summary.scanned, summary.affected), (3, 1));
        assert_eq!(db.page(&gone).unwrap().text(PROP_STATUS).as_deref(), Some("Closed"));
        assert_eq!(db.page(&keep).unwrap().text(PROP_STATUS), None);
    }

    #[tokio::test]
    async fn unreadable_schema_disables_scope_and_status_writes() {
        let db = MemoryDatabase::without_schema();
        db.insert_page(&page("Gone", "https://gone.example", TAG));
        let mut engine = RemoteSyncEngine::connect(&db, TAG).await;
        assert!(engine.scope().is_none());
        assert!(!engine.ensure_schema(false).await.unwrap());

        let summary = engine.reconcile_missing(&HashSet::new(), false, FAST, false).await.unwrap();
        assert_eq!((summary.scanned, summary.affected), (1, 0));

        let created = engine
            .upsert(&[record("DevConf", "https://devconf.info/cfp")], None, false, FAST)
            .await
            .unwrap();
        assert_eq!(created.created, 1);
        match &db.mutations()[0] {
            Mutation::Create { properties, .. } => {
                assert!(properties.get(PROP_STATUS).is_none());
                assert!(properties.get(PROP_SOURCE).is_none());
            }
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_schema_archives_only_pages_tagged_with_our_source() {
        let db = MemoryDatabase::without_schema();
        let foreign = db.insert_page(&page("Manual", "https://manual.example", "manual"));
        let ours = db.insert_page(&page("Ours", "https://ours.example", TAG));
        let mut untagged = page("Untagged", "https://untagged.example", TAG);
        untagged.remove(PROP_SOURCE);
        let untagged = db.insert_page(&untagged);
        let engine = RemoteSyncEngine::connect(&db, TAG).await;

        let summary = engine.reconcile_missing(&HashSet::new(), false, FAST, true).await.unwrap();

        assert_eq!((summary.scanned, summary.affected), (2, 1));
        assert_eq!(db.mutations(), vec![Mutation::Archive { page_id: ours.clone() }]);
        assert!(!db.page(&foreign).unwrap().archived);
        assert!(!db.page(&untagged).unwrap().archived);
    }

    #[tokio::test]
    async fn unknown_schema_never_matches_a_foreign_page() {
        let db = MemoryDatabase::without_schema();
        let foreign = db.insert_page(&page("DevConf", "https://devconf.info/cfp", "manual"));
        let engine = RemoteSyncEngine::connect(&db, TAG).await;

        let summary = engine
            .upsert(&[record("DevConf", "https://devconf.info/cfp")], None, false, FAST)
            .await
            .unwrap();

        assert_eq!((summary.created, summary.updated, summary.closed_duplicates), (1, 0, 0));
        assert!(db
            .mutations()
            .iter()
            .all(|m| !matches!(m, Mutation::Update { page_id, .. } if *page_id == foreign)));
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_still_paces_every_announced_write() {
        let db = MemoryDatabase::new(schema());
        db.insert_page(&page("Jfokus", "https://www.jfokus.se", TAG));
        db.insert_page(&page("Gone", "https://gone.example", TAG));
        let engine = RemoteSyncEngine::connect(&db, TAG).await;
        let records = vec![
            record("Jfokus", "https://www.jfokus.se"),
            record("KubeCon", "https://kubecon.example"),
            record("RustConf", "https://rustconf.example"),
        ];

        let started = tokio::time::Instant::now();
        let summary = engine.upsert(&records, None, true, 2.5).await.unwrap();
        let elapsed = started.elapsed();
        assert_eq!((summary.created, summary.updated), (2, 1));
        assert!(elapsed >= Duration::from_millis(1200), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1300), "{elapsed:?}");

        let keys: HashSet<String> = records
            .iter()
            .filter_map(|r| r.hyperlink.as_deref().map(normalize_url))
            .collect();
        let started = tokio::time::Instant::now();
        let reconciled = engine.reconcile_missing(&keys, true, 2.5, true).await.unwrap();
        let elapsed = started.elapsed();
        assert_eq!(reconciled.affected, 1);
        assert!(elapsed >= Duration::from_millis(400), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "{elapsed:?}");
        assert!(db.mutations().is_empty());
    }

    #[tokio::test]
    async fn ensure_schema_adds_source_select() {
        let schema = RemoteSchema::from_properties([(PROP_NAME, PropertyKind::Title), (PROP_URL, PropertyKind::Url)]);
        let db = MemoryDatabase::new(schema);
        let mut engine = RemoteSyncEngine::connect(&db, TAG).await;

        assert!(engine.ensure_schema(false).await.unwrap());
        assert_eq!(engine.schema().kind(PROP_SOURCE), Some(PropertyKind::Select));
        assert!(engine.scope().is_none());
        assert_eq!(
            db.mutations(),
            vec![Mutation::AddProperties(vec![PropertyDefinition::select(PROP_SOURCE, [TAG.to_string()])])]
        );
        assert!(!engine.ensure_schema(false).await.unwrap());
    }
}
