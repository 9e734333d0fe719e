//! Per-call bundle of database handle and resource identifier.

use crate::config::CountScope;
use crate::error::RepoError;
use crate::store::Store;
use std::fmt;
use std::sync::Arc;

/// Cloning copies the handle reference, never connection state; clones run independent
/// transactions against the same store.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    db: Option<Arc<dyn Store>>,
    resource_id: String,
    count_scope: CountScope,
}

impl ExecutionContext {
    pub fn new(db: Arc<dyn Store>) -> Self {
        ExecutionContext {
            db: Some(db),
            resource_id: String::new(),
            count_scope: CountScope::default(),
        }
    }

    /// Context without a database handle. Every repository call on it fails with `NoDatabaseHandle`.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Copy of this context addressing `id`.
    pub fn with_resource_id(&self, id: impl Into<String>) -> Self {
        ExecutionContext {
            resource_id: id.into(),
            ..self.clone()
        }
    }

    pub fn with_count_scope(mut self, scope: CountScope) -> Self {
        self.count_scope = scope;
        self
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn count_scope(&self) -> CountScope {
        self.count_scope
    }

    pub fn store(&self) -> Result<&dyn Store, RepoError> {
        self.db.as_deref().ok_or(RepoError::NoDatabaseHandle)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("db", &self.db.is_some())
            .field("resource_id", &self.resource_id)
            .field("count_scope", &self.count_scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::recording::RecordingStore;

    #[test]
    fn detached_context_has_no_handle() {
        let ctx = ExecutionContext::detached();
        assert!(matches!(ctx.store(), Err(RepoError::NoDatabaseHandle)));
    }

    #[test]
    fn clones_share_the_handle() {
        let store = Arc::new(RecordingStore::new());
        let ctx = ExecutionContext::new(store).with_count_scope(CountScope::Query);
        let addressed = ctx.with_resource_id("7");
        assert_eq!(addressed.resource_id(), "7");
        assert_eq!(ctx.resource_id(), "");
        assert_eq!(addressed.count_scope(), CountScope::Query);
        assert!(addressed.store().is_ok());
    }
}
