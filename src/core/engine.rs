//! Query engine
//!
//! [`QueryEngine`] runs query models and write helpers through an [`Executor`].
//! Every terminal operation compiles a fresh statement for the executor's dialect,
//! runs it under the engine's cancellation token and maps the rows it returns.
//! [`BlockingQueryEngine`] offers the read and write paths for a caller-owned
//! synchronous connection.

use super::convert::ToDbValue;
use super::database::{BlockingExecutor, Executor, Statement, Transaction, Transactional};
use super::error::{DatabaseError, Result};
use super::expression::{AggregateFunction, Expr};
use super::filter::SearchRequest;
use super::metadata::{Entity, MetadataRegistry};
use super::outcome::{OptionalResult, PagedResult};
use super::query::{PageWindow, QueryModel};
use super::row_mapper::FromRow;
use super::sql_builder::SqlBuilder;
use super::value::{DatabaseResult, DatabaseRow, DatabaseValue};
use super::write_builder::{DeleteBuilder, InsertBuilder, UpdateBuilder};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn map_rows<T: FromRow>(rows: &[DatabaseRow]) -> Result<Vec<T>> {
    rows.iter().map(T::from_row).collect()
}

fn first_scalar<V: FromRow>(rows: &[DatabaseRow]) -> Result<V> {
    let row = rows
        .first()
        .ok_or_else(|| DatabaseError::mapping("scalar statement returned no rows"))?;
    V::from_row(row)
}

fn row_count(count: i64) -> Result<u64> {
    u64::try_from(count).map_err(|_| DatabaseError::mapping(format!("negative row count {count}")))
}

/// Page number and size reported for a window over `returned` rows
fn page_figures(window: Option<PageWindow>, returned: usize) -> (u64, u64) {
    match window {
        Some(PageWindow {
            skip,
            take: Some(take),
        }) if take > 0 => (skip / take + 1, take),
        _ => (1, returned as u64),
    }
}

fn single_key_field<E: Entity>(registry: &MetadataRegistry) -> Result<String> {
    let metadata = registry.of::<E>()?;
    match metadata.key_fields() {
        [field] => Ok(field.clone()),
        [] => Err(DatabaseError::configuration(format!(
            "{} declares no key",
            E::shape_name()
        ))),
        _ => Err(DatabaseError::configuration(format!(
            "{} has a composite key; query it with a filter",
            E::shape_name()
        ))),
    }
}

/// Runs query models and write statements through an executor
///
/// ```rust,no_run
/// use entity_query::prelude::*;
/// use std::sync::Arc;
///
/// #[derive(Debug, Clone, Default)]
/// struct Trip {
///     id: i64,
///     name: String,
///     price: f64,
/// }
///
/// entity_query::impl_entity!(Trip => "Trips" {
///     id: "Id" [key, computed],
///     name: "Name",
///     price: "Price",
/// });
///
/// # async fn run() -> Result<()> {
/// let registry = Arc::new(MetadataRegistry::builder().register::<Trip>()?.build());
/// let db = PooledSqliteDatabase::with_config(PoolConfig::new("trips.db")).await?;
/// let engine = QueryEngine::new(db, registry);
///
/// let cheap = QueryModel::<Trip>::new()
///     .filter(Expr::field("price").lt(20.0))
///     .order_by(Expr::field("name"))
///     .page(1, 10);
/// let page = engine.to_paged_result(&cheap).await?;
/// println!("{} of {} trips", page.items.len(), page.total_count);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct QueryEngine<X> {
    executor: X,
    registry: Arc<MetadataRegistry>,
    cancel: CancellationToken,
}

impl<X: Executor> QueryEngine<X> {
    pub fn new(executor: X, registry: Arc<MetadataRegistry>) -> Self {
        Self {
            executor,
            registry,
            cancel: CancellationToken::new(),
        }
    }

    /// Run every operation of this engine under `cancel`
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Statement builder for this engine's registry and dialect
    pub fn sql(&self) -> SqlBuilder<'_> {
        SqlBuilder::new(&self.registry, self.executor.dialect())
    }

    async fn rows(&self, statement: &Statement) -> Result<DatabaseResult> {
        log::debug!("query: {} ({} params)", statement, statement.params.len());
        self.executor.query(statement, &self.cancel).await
    }

    async fn affected(&self, statement: &Statement) -> Result<u64> {
        log::debug!("execute: {} ({} params)", statement, statement.params.len());
        self.executor.execute(statement, &self.cancel).await
    }

    // Terminal operations

    /// Every row of the model
    pub async fn to_list<T: FromRow>(&self, model: &QueryModel<T>) -> Result<Vec<T>> {
        let statement = self.sql().select(model)?;
        map_rows(&self.rows(&statement).await?)
    }

    /// Rows of the model as they are fetched
    pub fn stream<T: FromRow + Send + 'static>(
        &self,
        model: &QueryModel<T>,
    ) -> Result<BoxStream<'static, Result<T>>> {
        let statement = self.sql().select(model)?;
        log::debug!("stream: {} ({} params)", statement, statement.params.len());
        Ok(self
            .executor
            .query_stream(statement, self.cancel.clone())
            .map(|row| row.and_then(|row| T::from_row(&row)))
            .boxed())
    }

    async fn try_first<T: FromRow>(&self, model: &QueryModel<T>) -> Result<Option<T>> {
        let statement = self.sql().select(&model.take(1))?;
        let rows = self.rows(&statement).await?;
        rows.first().map(T::from_row).transpose()
    }

    /// The model's first row
    pub async fn first<T: FromRow>(&self, model: &QueryModel<T>) -> OptionalResult<T> {
        self.try_first(model).await.into()
    }

    /// The entity stored under `key`. The entity must have a single key field.
    pub async fn find<E: Entity>(&self, key: impl ToDbValue) -> OptionalResult<E> {
        let field = match single_key_field::<E>(&self.registry) {
            Ok(field) => field,
            Err(e) => return e.into(),
        };
        let model = QueryModel::<E>::new().filter(Expr::field(field).eq(key.to_db_value()));
        self.first(&model).await
    }

    /// Number of rows the model returns
    pub async fn count<T>(&self, model: &QueryModel<T>) -> Result<u64> {
        let statement = self.sql().count(model)?;
        row_count(first_scalar(&self.rows(&statement).await?)?)
    }

    /// Whether the model returns any row
    pub async fn any<T>(&self, model: &QueryModel<T>) -> Result<bool> {
        let statement = self.sql().exists(model)?;
        first_scalar(&self.rows(&statement).await?)
    }

    async fn scalar_aggregate<T, V: FromRow>(
        &self,
        model: &QueryModel<T>,
        function: AggregateFunction,
        selector: Expr,
    ) -> Result<V> {
        let statement = self.sql().scalar_aggregate(model, function, &selector)?;
        first_scalar(&self.rows(&statement).await?)
    }

    /// Sum of `selector` over the model's rows; zero when there are none
    pub async fn sum<T, V: FromRow>(&self, model: &QueryModel<T>, selector: Expr) -> Result<V> {
        self.scalar_aggregate(model, AggregateFunction::Sum, selector).await
    }

    /// Smallest `selector`; use an `Option` target when the model may be empty
    pub async fn min<T, V: FromRow>(&self, model: &QueryModel<T>, selector: Expr) -> Result<V> {
        self.scalar_aggregate(model, AggregateFunction::Min, selector).await
    }

    pub async fn max<T, V: FromRow>(&self, model: &QueryModel<T>, selector: Expr) -> Result<V> {
        self.scalar_aggregate(model, AggregateFunction::Max, selector).await
    }

    pub async fn average<T, V: FromRow>(&self, model: &QueryModel<T>, selector: Expr) -> Result<V> {
        self.scalar_aggregate(model, AggregateFunction::Avg, selector).await
    }

    /// Rows of a grouped or aggregated model, mapped by alias into `R`
    pub async fn aggregate<T, R: FromRow>(&self, model: &QueryModel<T>) -> Result<Vec<R>> {
        let statement = self.sql().select(model)?;
        map_rows(&self.rows(&statement).await?)
    }

    /// One page of the model together with the number of rows across all pages
    pub async fn to_paged_result<T: FromRow>(&self, model: &QueryModel<T>) -> Result<PagedResult<T>> {
        let window = model.parts().window()?;
        let total_statement = self.sql().total_count(model)?;
        let total = row_count(first_scalar(&self.rows(&total_statement).await?)?)?;
        let items = self.to_list(model).await?;
        let (page, page_size) = page_figures(window, items.len());
        Ok(PagedResult::new(items, total, page, page_size))
    }

    /// Run a paged search request against entity `E`
    pub async fn search<E: Entity>(&self, request: &SearchRequest) -> Result<PagedResult<E>> {
        self.to_paged_result(&QueryModel::<E>::search(request)).await
    }

    // Write helpers

    /// Insert one entity; returns the affected row count
    pub async fn insert<E: Entity>(&self, entity: &E) -> Result<u64> {
        let statement = InsertBuilder::of::<E>(&self.registry)?
            .entity(entity)?
            .build(self.executor.dialect())?;
        self.affected(&statement).await
    }

    /// Insert one entity and read back its generated key
    pub async fn insert_returning_key<E: Entity, K: FromRow>(&self, entity: &E) -> Result<K> {
        let statement = InsertBuilder::of::<E>(&self.registry)?
            .entity(entity)?
            .returning_key()
            .build(self.executor.dialect())?;
        first_scalar(&self.rows(&statement).await?)
    }

    /// Insert many entities with multi-row statements, each kept under the
    /// dialect's parameter ceiling. Batches run in order; run through a
    /// transaction when they must land together.
    pub async fn insert_many<E: Entity>(&self, entities: &[E]) -> Result<u64> {
        if entities.is_empty() {
            return Ok(0);
        }
        let mut builder = InsertBuilder::of::<E>(&self.registry)?;
        for entity in entities {
            builder = builder.entity(entity)?;
        }
        let mut total = 0;
        for statement in builder.build_batches(self.executor.dialect())? {
            total += self.affected(&statement).await?;
        }
        Ok(total)
    }

    /// Write every non-key column of `entity` to the row matching its key
    pub async fn update<E: Entity>(&self, entity: &E) -> Result<u64> {
        let statement = UpdateBuilder::of::<E>(&self.registry)?.entity(entity)?.build()?;
        self.affected(&statement).await
    }

    /// Set `assignments` on every row matching `predicate`
    pub async fn update_where<E: Entity>(
        &self,
        predicate: Expr,
        assignments: &[(&str, DatabaseValue)],
    ) -> Result<u64> {
        let mut builder = UpdateBuilder::of::<E>(&self.registry)?;
        for (field, value) in assignments {
            builder = builder.set(field, value)?;
        }
        let statement = builder.filter(predicate).build()?;
        self.affected(&statement).await
    }

    /// Delete the row matching `entity`'s key
    pub async fn delete<E: Entity>(&self, entity: &E) -> Result<u64> {
        let statement = DeleteBuilder::of::<E>(&self.registry)?.entity(entity)?.build()?;
        self.affected(&statement).await
    }

    pub async fn delete_where<E: Entity>(&self, predicate: Expr) -> Result<u64> {
        let statement = DeleteBuilder::of::<E>(&self.registry)?
            .filter(predicate)
            .build()?;
        self.affected(&statement).await
    }

    /// Run a hand-written statement that returns no rows
    pub async fn execute(&self, statement: &Statement) -> Result<u64> {
        self.affected(statement).await
    }

    /// Run a hand-written statement and map its rows
    pub async fn query<R: FromRow>(&self, statement: &Statement) -> Result<Vec<R>> {
        map_rows(&self.rows(statement).await?)
    }
}

impl<X: Transactional> QueryEngine<X> {
    /// Insert a parent and its children in one transaction.
    ///
    /// `link` receives each child with the parent's generated key. Nothing is kept
    /// unless every insert succeeds.
    pub async fn insert_with_children<P: Entity, C: Entity>(
        &self,
        parent: &P,
        mut children: Vec<C>,
        mut link: impl FnMut(&mut C, &DatabaseValue),
    ) -> Result<DatabaseValue> {
        let tx = self.executor.begin().await?;
        let outcome = {
            let scoped = QueryEngine {
                executor: &tx,
                registry: Arc::clone(&self.registry),
                cancel: self.cancel.clone(),
            };
            async {
                let key: DatabaseValue = scoped.insert_returning_key(parent).await?;
                for child in children.iter_mut() {
                    link(child, &key);
                }
                scoped.insert_many(&children).await?;
                Ok::<_, DatabaseError>(key)
            }
            .await
        };

        match outcome {
            Ok(key) => {
                tx.commit().await?;
                Ok(key)
            }
            Err(e) => {
                log::error!("insert of {} with children failed: {}", P::shape_name(), e);
                if let Err(rollback) = tx.rollback().await {
                    log::error!("rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }
}

/// Runs query models on a caller-owned synchronous connection
pub struct BlockingQueryEngine<'c, C: ?Sized> {
    connection: &'c C,
    registry: Arc<MetadataRegistry>,
    cancel: CancellationToken,
}

impl<'c, C: BlockingExecutor + ?Sized> BlockingQueryEngine<'c, C> {
    pub fn new(connection: &'c C, registry: Arc<MetadataRegistry>) -> Self {
        Self {
            connection,
            registry,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn sql(&self) -> SqlBuilder<'_> {
        SqlBuilder::new(&self.registry, self.connection.dialect())
    }

    fn rows(&self, statement: &Statement) -> Result<DatabaseResult> {
        log::debug!("query: {} ({} params)", statement, statement.params.len());
        self.connection.query_blocking(statement, &self.cancel)
    }

    pub fn to_list<T: FromRow>(&self, model: &QueryModel<T>) -> Result<Vec<T>> {
        let statement = self.sql().select(model)?;
        map_rows(&self.rows(&statement)?)
    }

    /// Hand each row of the model to `on_item` as it is read
    pub fn for_each<T: FromRow>(
        &self,
        model: &QueryModel<T>,
        mut on_item: impl FnMut(T) -> Result<()>,
    ) -> Result<()> {
        let statement = self.sql().select(model)?;
        log::debug!("read: {} ({} params)", statement, statement.params.len());
        self.connection
            .read_blocking(&statement, &self.cancel, &mut |row| on_item(T::from_row(&row)?))
    }

    pub fn first<T: FromRow>(&self, model: &QueryModel<T>) -> OptionalResult<T> {
        let attempt = || -> Result<Option<T>> {
            let statement = self.sql().select(&model.take(1))?;
            self.rows(&statement)?.first().map(T::from_row).transpose()
        };
        attempt().into()
    }

    pub fn count<T>(&self, model: &QueryModel<T>) -> Result<u64> {
        let statement = self.sql().count(model)?;
        log::debug!("scalar: {}", statement);
        let value = self.connection.query_scalar_blocking(&statement, &self.cancel)?;
        let count = value
            .as_ref()
            .and_then(DatabaseValue::as_long)
            .ok_or_else(|| DatabaseError::mapping("count returned no value"))?;
        row_count(count)
    }

    pub fn any<T>(&self, model: &QueryModel<T>) -> Result<bool> {
        let statement = self.sql().exists(model)?;
        first_scalar(&self.rows(&statement)?)
    }

    pub fn insert<E: Entity>(&self, entity: &E) -> Result<u64> {
        let statement = InsertBuilder::of::<E>(&self.registry)?
            .entity(entity)?
            .build(self.connection.dialect())?;
        self.execute(&statement)
    }

    pub fn execute(&self, statement: &Statement) -> Result<u64> {
        log::debug!("execute: {} ({} params)", statement, statement.params.len());
        self.connection.execute_blocking(statement, &self.cancel)
    }

    pub fn query<R: FromRow>(&self, statement: &Statement) -> Result<Vec<R>> {
        map_rows(&self.rows(statement)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dialect::SqlDialect;
    use crate::core::database::RowStream;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Route {
        id: i64,
        origin: String,
    }

    crate::impl_entity!(Route => "Routes" {
        id: "Id" [key],
        origin: "Origin",
    });

    /// Records statements and answers every query with canned rows
    #[derive(Default)]
    struct Recorder {
        statements: Mutex<Vec<String>>,
        rows: Vec<DatabaseRow>,
    }

    #[async_trait]
    impl Executor for Recorder {
        fn dialect(&self) -> SqlDialect {
            SqlDialect::Sqlite
        }

        async fn execute(&self, statement: &Statement, cancel: &CancellationToken) -> Result<u64> {
            if cancel.is_cancelled() {
                return Err(DatabaseError::Cancelled);
            }
            self.statements.lock().unwrap().push(statement.sql.clone());
            Ok(1)
        }

        async fn query(&self, statement: &Statement, cancel: &CancellationToken) -> Result<DatabaseResult> {
            if cancel.is_cancelled() {
                return Err(DatabaseError::Cancelled);
            }
            self.statements.lock().unwrap().push(statement.sql.clone());
            Ok(self.rows.clone())
        }

        fn query_stream(&self, _statement: Statement, _cancel: CancellationToken) -> RowStream {
            futures::stream::iter(self.rows.clone().into_iter().map(Ok)).boxed()
        }
    }

    fn registry() -> Arc<MetadataRegistry> {
        Arc::new(MetadataRegistry::builder().register::<Route>().unwrap().build())
    }

    fn route_row(id: i64, origin: &str) -> DatabaseRow {
        [
            ("id", DatabaseValue::Long(id)),
            ("origin", DatabaseValue::from(origin)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_page_figures() {
        let window = Some(PageWindow {
            skip: 20,
            take: Some(10),
        });
        assert_eq!(page_figures(window, 10), (3, 10));
        assert_eq!(page_figures(None, 7), (1, 7));
        assert_eq!(page_figures(Some(PageWindow { skip: 5, take: None }), 4), (1, 4));
    }

    #[tokio::test]
    async fn test_first_applies_take_one() {
        let recorder = Recorder {
            rows: vec![route_row(1, "Lyon")],
            ..Default::default()
        };
        let engine = QueryEngine::new(&recorder, registry());
        let found = engine.first(&QueryModel::<Route>::new()).await;
        assert_eq!(
            found.value(),
            Some(Route {
                id: 1,
                origin: "Lyon".into()
            })
        );
        let statements = recorder.statements.lock().unwrap();
        assert!(statements[0].ends_with("LIMIT 1 OFFSET 0"));
    }

    #[tokio::test]
    async fn test_find_filters_by_key() {
        let recorder = Recorder::default();
        let engine = QueryEngine::new(&recorder, registry());
        let found = engine.find::<Route>(42_i64).await;
        assert!(!found.has_value());
        assert!(!found.is_error());
        let statements = recorder.statements.lock().unwrap();
        assert!(statements[0].contains("WHERE ([t0].[Id] = @p0)"));
    }

    #[tokio::test]
    async fn test_cancelled_engine_returns_cancelled() {
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = QueryEngine::new(&recorder, registry()).with_cancellation(cancel);

        let result = engine.to_list(&QueryModel::<Route>::new()).await;
        assert!(matches!(result, Err(DatabaseError::Cancelled)));
        assert!(engine.first(&QueryModel::<Route>::new()).await.is_error());
        assert!(recorder.statements.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_many_of_nothing_runs_nothing() {
        let recorder = Recorder::default();
        let engine = QueryEngine::new(&recorder, registry());
        assert_eq!(engine.insert_many::<Route>(&[]).await.unwrap(), 0);
        assert!(recorder.statements.lock().unwrap().is_empty());
    }

    #[test]
    fn test_insert_many_runs_one_statement_per_batch() {
        let recorder = Recorder::default();
        let engine = QueryEngine::new(&recorder, registry());
        let routes: Vec<Route> = (0..2500)
            .map(|id| Route {
                id,
                origin: format!("Stop {id}"),
            })
            .collect();

        let inserted = tokio_test::block_on(engine.insert_many(&routes)).unwrap();
        // Recorder reports one affected row per statement.
        assert_eq!(inserted, 3);
        let statements = recorder.statements.lock().unwrap();
        assert_eq!(statements.len(), 3);
        assert!(statements.iter().all(|sql| sql.starts_with("INSERT INTO [Routes] ([Id], [Origin]) VALUES ")));
    }

    #[tokio::test]
    async fn test_stream_maps_rows() {
        let recorder = Recorder {
            rows: vec![route_row(1, "Lyon"), route_row(2, "Nice")],
            ..Default::default()
        };
        let engine = QueryEngine::new(&recorder, registry());
        let routes: Vec<Route> = engine
            .stream(&QueryModel::<Route>::new())
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[1].origin, "Nice");
    }
}
