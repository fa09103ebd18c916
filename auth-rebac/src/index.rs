use crate::{
    error::IndexError,
    models::{Page, PageRequest, RelationTuple, SubjectRef, WriteRequest},
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Read interface of the tuple store.
///
/// Implementations must allow concurrent reads. Result sets are paginated and
/// callers follow `next_token` until it is `None`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TupleIndex: Send + Sync {
    /// Tuples `namespace:object_id#relation@*`
    async fn list_subjects(
        &self,
        namespace: &str,
        object_id: &str,
        relation: &str,
        page: PageRequest,
    ) -> Result<Page<RelationTuple>, IndexError>;

    /// Ids of objects in `namespace` on which `subject` directly holds `relation`
    async fn list_objects(
        &self,
        namespace: &str,
        relation: &str,
        subject: &SubjectRef,
        page: PageRequest,
    ) -> Result<Page<String>, IndexError>;
}

/// In-memory tuple index for testing and development
#[derive(Clone, Default)]
pub struct InMemoryTupleIndex {
    tuples: Arc<DashMap<String, RelationTuple>>,
}

impl InMemoryTupleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tuples(tuples: impl IntoIterator<Item = RelationTuple>) -> Self {
        let index = Self::new();
        for tuple in tuples {
            index.write_tuple(tuple);
        }
        index
    }

    fn tuple_key(tuple: &RelationTuple) -> String {
        tuple.to_string()
    }

    pub fn write_tuple(&self, tuple: RelationTuple) {
        self.tuples.insert(Self::tuple_key(&tuple), tuple);
    }

    pub fn delete_tuple(&self, tuple: &RelationTuple) {
        self.tuples.remove(&Self::tuple_key(tuple));
    }

    pub fn batch_write(&self, request: WriteRequest) {
        for tuple in request.writes {
            self.write_tuple(tuple);
        }
        for tuple in &request.deletes {
            self.delete_tuple(tuple);
        }
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    fn paginate<T>(mut items: Vec<T>, page: &PageRequest) -> Result<Page<T>, IndexError> {
        let offset = match page.token {
            Some(ref token) => token
                .parse::<usize>()
                .map_err(|_| IndexError::InvalidPageToken(token.clone()))?,
            None => 0,
        };
        let size = page.size.max(1);

        if offset >= items.len() {
            return Ok(Page::last(Vec::new()));
        }
        let mut rest = items.split_off(offset);
        let next_token = if rest.len() > size {
            rest.truncate(size);
            Some((offset + size).to_string())
        } else {
            None
        };
        Ok(Page {
            items: rest,
            next_token,
        })
    }
}

#[async_trait]
impl TupleIndex for InMemoryTupleIndex {
    async fn list_subjects(
        &self,
        namespace: &str,
        object_id: &str,
        relation: &str,
        page: PageRequest,
    ) -> Result<Page<RelationTuple>, IndexError> {
        let mut tuples: Vec<RelationTuple> = self
            .tuples
            .iter()
            .filter(|entry| {
                let tuple = entry.value();
                tuple.object.namespace == namespace
                    && tuple.object.id == object_id
                    && tuple.relation == relation
            })
            .map(|entry| entry.value().clone())
            .collect();
        tuples.sort();

        Self::paginate(tuples, &page)
    }

    async fn list_objects(
        &self,
        namespace: &str,
        relation: &str,
        subject: &SubjectRef,
        page: PageRequest,
    ) -> Result<Page<String>, IndexError> {
        let mut ids: Vec<String> = self
            .tuples
            .iter()
            .filter(|entry| {
                let tuple = entry.value();
                tuple.object.namespace == namespace
                    && tuple.relation == relation
                    && tuple.subject == *subject
            })
            .map(|entry| entry.value().object.id.clone())
            .collect();
        ids.sort();
        ids.dedup();

        Self::paginate(ids, &page)
    }
}
