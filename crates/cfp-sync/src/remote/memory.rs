//! In-process `RemoteDatabase` backend. Evaluates queries with the same client-side rules
//! the engine uses and journals every mutation, so sync runs can be inspected offline.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{
    PropertyDefinition, PropertyMap, Query, QueryPage, RemoteDatabase, RemoteError,
    RemotePage, RemoteSchema,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create { page_id: String, properties: PropertyMap },
    Update { page_id: String, properties: PropertyMap },
    Archive { page_id: String },
    AddProperties(Vec<PropertyDefinition>),
}

#[derive(Debug, Default)]
struct MemoryState {
    schema: Option<RemoteSchema>,
    pages: Vec<RemotePage>,
    queries: Vec<Query>,
    mutations: Vec<Mutation>,
    next_id: usize,
}

#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: Mutex<MemoryState>,
}

impl MemoryDatabase {
    pub fn new(schema: RemoteSchema) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                schema: Some(schema),
                ..MemoryState::default()
            }),
        }
    }

    /// A database whose schema endpoint fails.
    pub fn without_schema() -> Self {
        Self::default()
    }

    /// Seed a page without journaling it as a mutation.
    pub fn insert_page(&self, properties: &PropertyMap) -> String {
        let mut state = self.lock();
        let id = state.allocate_id();
        state.pages.push(RemotePage::from_properties(id.clone(), properties));
        id
    }

    pub fn pages(&self) -> Vec<RemotePage> {
        self.lock().pages.clone()
    }

    pub fn page(&self, page_id: &str) -> Option<RemotePage> {
        self.lock().pages.iter().find(|page| page.id == page_id).cloned()
    }

    pub fn queries(&self) -> Vec<Query> {
        self.lock().queries.clone()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("page-{}", self.next_id)
    }

    fn page_mut(&mut self, page_id: &str) -> Result<&mut RemotePage, RemoteError> {
        self.pages
            .iter_mut()
            .find(|page| page.id == page_id)
            .ok_or_else(|| RemoteError::HttpStatus {
                status: 404,
                body: format!("page {page_id} not found"),
            })
    }
}

#[async_trait]
impl RemoteDatabase for MemoryDatabase {
    async fn retrieve_schema(&self) -> Result<RemoteSchema, RemoteError> {
        self.lock().schema.clone().ok_or_else(|| RemoteError::HttpStatus {
            status: 403,
            body: "schema not shared with this integration".to_string(),
        })
    }

    async fn query(&self, query: &Query) -> Result<QueryPage, RemoteError> {
        let mut state = self.lock();
        state.queries.push(query.clone());

        let offset = match &query.start_cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| RemoteError::Decode(format!("bad cursor {cursor}")))?,
            None => 0,
        };
        let matching: Vec<RemotePage> = state
            .pages
            .iter()
            .filter(|page| query.matches(page))
            .cloned()
            .collect();
        let page_size = query.page_size.max(1) as usize;
        let end = (offset + page_size).min(matching.len());
        let pages = matching.get(offset..end).map(<[RemotePage]>::to_vec).unwrap_or_default();
        let next_cursor = (end < matching.len()).then(|| end.to_string());
        Ok(QueryPage { pages, next_cursor })
    }

    async fn create_page(&self, properties: &PropertyMap) -> Result<String, RemoteError> {
        let mut state = self.lock();
        let page_id = state.allocate_id();
        state
            .pages
            .push(RemotePage::from_properties(page_id.clone(), properties));
        state.mutations.push(Mutation::Create {
            page_id: page_id.clone(),
            properties: properties.clone(),
        });
        Ok(page_id)
    }

    async fn update_page(&self, page_id: &str, properties: &PropertyMap) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.page_mut(page_id)?.apply(properties);
        state.mutations.push(Mutation::Update {
            page_id: page_id.to_string(),
            properties: properties.clone(),
        });
        Ok(())
    }

    async fn archive_page(&self, page_id: &str) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.page_mut(page_id)?.archived = true;
        state.mutations.push(Mutation::Archive {
            page_id: page_id.to_string(),
        });
        Ok(())
    }

    async fn add_properties(&self, definitions: &[PropertyDefinition]) -> Result<(), RemoteError> {
        let mut state = self.lock();
        let schema = state.schema.get_or_insert_with(RemoteSchema::default);
        for definition in definitions {
            schema.insert(definition.name.clone(), definition.kind);
        }
        state
            .mutations
            .push(Mutation::AddProperties(definitions.to_vec()));
        Ok(())
    }
}
