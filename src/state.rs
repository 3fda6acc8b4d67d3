use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{
    Mutex as AsyncMutex, OwnedMutexGuard, RwLock as AsyncRwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
use tracing::{info, warn};

use crate::db::catalog::{self, SchemaCatalog, SchemaRegistry};
use crate::export::{self, BackupRequest, ExportFile, ExportRequest};
use crate::import::{self, ImportMode, ImportRequest};
use crate::report::MutationReport;
use crate::table_order;
use crate::wipe::{self, WipeOutcome, WipeProjectRequest, WipeRequest};
use crate::AppResult;

/// Serializes operations that touch the same scope. Database-wide work takes
/// the write side of `global`; project work takes the read side and then the
/// project's own mutex, always in that order.
#[derive(Default)]
pub struct ScopeLocks {
    global: AsyncRwLock<()>,
    projects: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one project operation. Dropping it releases the
/// project's mutex and forgets the slot once nobody else is waiting on it.
pub struct ProjectLock<'a> {
    locks: &'a ScopeLocks,
    project_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
    _shared: RwLockReadGuard<'a, ()>,
}

impl Drop for ProjectLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut projects = self.locks.projects.lock().unwrap_or_else(|e| e.into_inner());
        if projects
            .get(&self.project_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            projects.remove(&self.project_id);
        }
    }
}

impl ScopeLocks {
    pub async fn database(&self) -> RwLockWriteGuard<'_, ()> {
        self.global.write().await
    }

    pub async fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.global.read().await
    }

    pub async fn project(&self, project_id: i64) -> ProjectLock<'_> {
        let shared = self.global.read().await;
        let slot = {
            let mut projects = self.projects.lock().unwrap_or_else(|e| e.into_inner());
            projects.entry(project_id).or_default().clone()
        };
        ProjectLock {
            locks: self,
            project_id,
            guard: Some(slot.lock_owned().await),
            _shared: shared,
        }
    }

    #[cfg(test)]
    fn tracked_projects(&self) -> usize {
        self.projects.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared handle behind both the HTTP router and the CLI.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub import_mode: ImportMode,
    registry: Arc<RwLock<Arc<SchemaRegistry>>>,
    locks: Arc<ScopeLocks>,
}

impl AppState {
    /// Loads the table registry and builds the dependency order. A declared
    /// table whose scoping column is missing is logged, not fatal, so the
    /// remaining operations stay usable.
    pub async fn new(pool: SqlitePool, import_mode: ImportMode) -> AppResult<Self> {
        let order = table_order::declared()?;
        let mut conn = pool.acquire().await?;
        let registry = SchemaRegistry::load(&mut conn).await?;
        if let Err(err) = order.verify_against_schema(&mut conn).await {
            warn!(target: "faena", event = "scope_schema_mismatch", error = %err);
        }
        drop(conn);
        info!(
            target: "faena",
            event = "state_ready",
            tables = registry.len(),
            import_mode = ?import_mode
        );
        Ok(Self {
            pool,
            import_mode,
            registry: Arc::new(RwLock::new(Arc::new(registry))),
            locks: Arc::new(ScopeLocks::default()),
        })
    }

    pub fn registry(&self) -> Arc<SchemaRegistry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Re-reads the base-table listing. Returns the number of known tables.
    pub async fn refresh_registry(&self) -> AppResult<usize> {
        let _lock = self.locks.database().await;
        let mut conn = self.pool.acquire().await?;
        let fresh = SchemaRegistry::load(&mut conn).await?;
        let count = fresh.len();
        *self.registry.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(fresh);
        info!(target: "faena", event = "registry_refreshed", tables = count);
        Ok(count)
    }

    pub async fn tables(&self) -> AppResult<Vec<TableInfo>> {
        let registry = self.registry();
        let _lock = self.locks.shared().await;
        let mut conn = self.pool.acquire().await?;
        let mut tables = Vec::with_capacity(registry.len());
        for name in registry.tables() {
            let info = match catalog::count_rows(&mut conn, name).await {
                Ok(count) => TableInfo {
                    name: name.to_string(),
                    count: Some(count),
                    error: None,
                },
                Err(err) => {
                    warn!(target: "faena", event = "table_count_failed", table = name, error = %err);
                    TableInfo {
                        name: name.to_string(),
                        count: None,
                        error: Some(err.message().to_string()),
                    }
                }
            };
            tables.push(info);
        }
        Ok(tables)
    }

    pub async fn schema(&self) -> AppResult<SchemaCatalog> {
        let _lock = self.locks.shared().await;
        let mut conn = self.pool.acquire().await?;
        Ok(catalog::catalog(&mut conn).await)
    }

    pub async fn export(&self, request: &ExportRequest) -> AppResult<ExportFile> {
        let registry = self.registry();
        if request.full_backup {
            let _lock = self.locks.database().await;
            export::export_tables(&self.pool, &registry, request).await
        } else {
            let _lock = self.locks.shared().await;
            export::export_tables(&self.pool, &registry, request).await
        }
    }

    pub async fn backup_project(
        &self,
        project_id: i64,
        request: &BackupRequest,
    ) -> AppResult<ExportFile> {
        let _lock = self.locks.project(project_id).await;
        export::backup_project(&self.pool, project_id, request).await
    }

    pub async fn import(&self, request: &ImportRequest) -> AppResult<MutationReport> {
        let registry = self.registry();
        let _lock = self.locks.database().await;
        import::import(&self.pool, &registry, request, self.import_mode).await
    }

    pub async fn wipe(&self, request: &WipeRequest) -> AppResult<WipeOutcome> {
        wipe::check_confirmation(request.confirm.as_deref())?;
        let registry = self.registry();
        let _lock = self.locks.database().await;
        wipe::wipe(&self.pool, &registry, request).await
    }

    pub async fn wipe_project(
        &self,
        project_id: i64,
        request: &WipeProjectRequest,
    ) -> AppResult<WipeOutcome> {
        wipe::check_confirmation(request.confirm.as_deref())?;
        let _lock = self.locks.project(project_id).await;
        wipe::wipe_project(&self.pool, project_id, request).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
