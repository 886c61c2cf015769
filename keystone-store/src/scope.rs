use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use sea_query::{QueryStatementWriter, SchemaStatementBuilder};
use tokio::{sync::Mutex as AsyncMutex, task};
use tracing::debug;

use crate::{
    engine::{Backend, Engine, Transaction},
    error::{Result, StoreError},
};

/// Identifies the call chain owning an ambient transaction. Code that runs
/// outside of a spawned task (`block_on`) shares the `None` entry.
type AmbientKey = Option<task::Id>;

#[derive(Debug, Default)]
struct AmbientState {
    depth: usize,
    aborted: bool,
}

#[derive(Default)]
struct Ambient {
    state: Mutex<AmbientState>,
    transaction: AsyncMutex<Option<Box<dyn Transaction>>>,
}

/// Hands out nestable units of work over one engine.
///
/// The first scope created by a task begins a transaction. Scopes created by
/// the same task while it is open join that transaction instead of starting
/// their own, and only the outermost scope commits or rolls back. Each tokio
/// task gets its own ambient transaction, so clones of a provider can be
/// shared freely between concurrent requests. Futures polled together inside
/// one task (`join!`, `select!`) share the task's ambient scope.
#[derive(Clone)]
pub struct ScopeProvider {
    engine: Box<dyn Engine>,
    ambients: Arc<Mutex<HashMap<AmbientKey, Arc<Ambient>>>>,
}

impl ScopeProvider {
    pub fn new<E: Engine + 'static>(engine: E) -> Self {
        Self::from_engine(Box::new(engine))
    }

    pub fn from_engine(engine: Box<dyn Engine>) -> Self {
        Self {
            engine,
            ambients: Arc::default(),
        }
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub fn backend(&self) -> Backend {
        self.engine.backend()
    }

    /// Depth of the current task's scope stack, zero when no scope is open.
    pub fn depth(&self) -> usize {
        self.ambients
            .lock()
            .get(&task::try_id())
            .map(|ambient| ambient.state.lock().depth)
            .unwrap_or_default()
    }

    pub async fn create_scope(&self) -> Result<Scope> {
        let key = task::try_id();

        let (ambient, outermost) = {
            let mut ambients = self.ambients.lock();
            let ambient = ambients.entry(key).or_default().clone();
            let mut state = ambient.state.lock();
            state.depth += 1;

            if state.depth == 1 {
                state.aborted = false;
            }

            let outermost = state.depth == 1;
            drop(state);

            (ambient, outermost)
        };

        if outermost {
            match self.engine.begin().await {
                Ok(transaction) => {
                    *ambient.transaction.lock().await = Some(transaction);
                }
                Err(err) => {
                    self.leave(key, &ambient, true, false);

                    return Err(err);
                }
            }
        }

        Ok(Scope {
            provider: self.clone(),
            key,
            ambient,
            outermost,
            disposed: false,
        })
    }

    /// Pops one scope off the ambient stack and returns whether an inner scope
    /// aborted the transaction. The entry is released with its outermost scope.
    fn leave(&self, key: AmbientKey, ambient: &Arc<Ambient>, outermost: bool, completed: bool) -> bool {
        let mut ambients = self.ambients.lock();
        let mut state = ambient.state.lock();
        state.depth = state.depth.saturating_sub(1);

        let aborted = if outermost {
            std::mem::take(&mut state.aborted)
        } else {
            if !completed {
                state.aborted = true;
            }

            false
        };

        if (outermost || state.depth == 0)
            && ambients
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, ambient))
        {
            ambients.remove(&key);
        }

        aborted
    }
}

/// A unit of work. Call [`Scope::complete`] to vote for commit; dropping a
/// scope without completing it rolls the whole ambient transaction back.
pub struct Scope {
    provider: ScopeProvider,
    key: AmbientKey,
    ambient: Arc<Ambient>,
    outermost: bool,
    disposed: bool,
}

impl Scope {
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }

    pub fn backend(&self) -> Backend {
        self.provider.backend()
    }

    pub async fn execute(&self, sql: &str) -> Result<u64> {
        let mut transaction = self.ambient.transaction.lock().await;
        let transaction = transaction.as_mut().ok_or(StoreError::NoAmbientTransaction)?;

        transaction.execute(sql).await
    }

    pub async fn execute_schema<S: SchemaStatementBuilder>(&self, statement: &S) -> Result<u64> {
        let sql = self.backend().schema(statement);

        self.execute(&sql).await
    }

    pub async fn execute_query<Q: QueryStatementWriter>(&self, statement: &Q) -> Result<u64> {
        let sql = self.backend().query(statement);

        self.execute(&sql).await
    }

    pub async fn count(&self, sql: &str) -> Result<i64> {
        let mut transaction = self.ambient.transaction.lock().await;
        let transaction = transaction.as_mut().ok_or(StoreError::NoAmbientTransaction)?;

        transaction.count(sql).await
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let mut transaction = self.ambient.transaction.lock().await;
        let transaction = transaction.as_mut().ok_or(StoreError::NoAmbientTransaction)?;

        transaction.table_exists(table).await
    }

    pub async fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let mut transaction = self.ambient.transaction.lock().await;
        let transaction = transaction.as_mut().ok_or(StoreError::NoAmbientTransaction)?;

        transaction.column_exists(table, column).await
    }

    pub async fn index_exists(&self, index: &str) -> Result<bool> {
        let mut transaction = self.ambient.transaction.lock().await;
        let transaction = transaction.as_mut().ok_or(StoreError::NoAmbientTransaction)?;

        transaction.index_exists(index).await
    }

    pub async fn foreign_key_exists(&self, table: &str, referenced_table: &str) -> Result<bool> {
        let mut transaction = self.ambient.transaction.lock().await;
        let transaction = transaction.as_mut().ok_or(StoreError::NoAmbientTransaction)?;

        transaction.foreign_key_exists(table, referenced_table).await
    }

    pub async fn key_values(&self, prefix: &str) -> Result<HashMap<String, Option<String>>> {
        let mut transaction = self.ambient.transaction.lock().await;
        let transaction = transaction.as_mut().ok_or(StoreError::NoAmbientTransaction)?;

        transaction.key_values(prefix).await
    }

    pub async fn set_key_value(&self, key: &str, value: &str) -> Result<()> {
        let mut transaction = self.ambient.transaction.lock().await;
        let transaction = transaction.as_mut().ok_or(StoreError::NoAmbientTransaction)?;

        transaction.set_key_value(key, value).await
    }

    /// Completes the scope. The outermost scope commits, unless an inner scope
    /// was dropped without completing, in which case it rolls back and
    /// returns [`StoreError::ScopeAborted`].
    pub async fn complete(mut self) -> Result<()> {
        self.disposed = true;

        let aborted = self
            .provider
            .leave(self.key, &self.ambient, self.outermost, true);

        if !self.outermost {
            return Ok(());
        }

        let transaction = self
            .ambient
            .transaction
            .lock()
            .await
            .take()
            .ok_or(StoreError::NoAmbientTransaction)?;

        if aborted {
            debug!("inner scope was not completed, rolling back");
            transaction.rollback().await?;

            return Err(StoreError::ScopeAborted);
        }

        transaction.commit().await
    }

    /// Abandons the scope. The outermost scope rolls back immediately, an
    /// inner scope marks the ambient transaction for rollback.
    pub async fn rollback(mut self) -> Result<()> {
        self.disposed = true;

        self.provider
            .leave(self.key, &self.ambient, self.outermost, false);

        if !self.outermost {
            return Ok(());
        }

        match self.ambient.transaction.lock().await.take() {
            Some(transaction) => transaction.rollback().await,
            None => Ok(()),
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }

        self.provider
            .leave(self.key, &self.ambient, self.outermost, false);

        if !self.outermost {
            return;
        }

        // dropping the transaction rolls it back
        if let Ok(mut transaction) = self.ambient.transaction.try_lock() {
            transaction.take();
        }
    }
}
