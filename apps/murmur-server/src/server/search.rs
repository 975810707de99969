use std::{collections::HashSet, sync::Arc, time::Duration};

use anyhow::anyhow;
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{NumericOptions, Schema, TextFieldIndexing, TextOptions, Value, STORED, STRING},
    TantivyDocument, Term,
};
use tokio::sync::{mpsc, oneshot};

use crate::server::{
    core::{
        AppState, IndexedUpdate, SearchCommand, SearchFields, SearchIndexState, SearchOperation,
        SearchService, DEFAULT_SEARCH_RESULT_LIMIT, MAX_SEARCH_FUZZY, MAX_SEARCH_TERMS,
        MAX_SEARCH_WILDCARDS, SEARCH_INDEX_QUEUE_CAPACITY,
    },
    errors::AuthFailure,
    metrics::{record_search_index_failure, SEARCH_INDEX_FAILURE_BATCH, SEARCH_INDEX_FAILURE_ENQUEUE},
    post_repository::{PostPersistence, PostRepository},
    types::SearchQuery,
};

const SEARCH_WORKER_BATCH_LIMIT: usize = 128;
const SEARCH_WRITER_HEAP_BYTES: usize = 50_000_000;

pub(crate) fn build_search_schema() -> (Schema, SearchFields) {
    let mut schema_builder = Schema::builder();
    let update_id = schema_builder.add_text_field("update_id", STRING | STORED);
    let author_id = schema_builder.add_text_field("author_id", STRING | STORED);
    let posted_at_unix =
        schema_builder.add_i64_field("posted_at_unix", NumericOptions::default().set_stored());
    let body_options = TextOptions::default()
        .set_stored()
        .set_indexing_options(TextFieldIndexing::default().set_tokenizer("default"));
    let body = schema_builder.add_text_field("body", body_options);
    let schema = schema_builder.build();

    (
        schema,
        SearchFields {
            update_id,
            author_id,
            posted_at_unix,
            body,
        },
    )
}

pub(crate) fn init_search_service() -> anyhow::Result<SearchService> {
    let (schema, fields) = build_search_schema();
    let index = tantivy::Index::create_in_ram(schema);
    let reader = index
        .reader()
        .map_err(|e| anyhow!("search reader init failed: {e}"))?;
    let state = Arc::new(SearchIndexState {
        index,
        reader,
        fields,
    });
    let (tx, mut rx) = mpsc::channel::<SearchCommand>(SEARCH_INDEX_QUEUE_CAPACITY);
    let worker_state = state.clone();

    std::thread::Builder::new()
        .name(String::from("murmur-search-index"))
        .spawn(move || {
            while let Some(command) = rx.blocking_recv() {
                let batch = drain_search_batch(command, &mut rx, SEARCH_WORKER_BATCH_LIMIT);
                if let Err(error) = apply_search_batch(&worker_state, batch) {
                    record_search_index_failure(SEARCH_INDEX_FAILURE_BATCH);
                    tracing::error!(event = "search.index.batch", error = %error);
                }
            }
        })
        .map_err(|e| anyhow!("search worker spawn failed: {e}"))?;

    Ok(SearchService { tx, state })
}

fn drain_search_batch(
    first: SearchCommand,
    rx: &mut mpsc::Receiver<SearchCommand>,
    max_batch: usize,
) -> Vec<SearchCommand> {
    let max_batch = max_batch.max(1);
    let mut batch = vec![first];
    while batch.len() < max_batch {
        let Ok(next) = rx.try_recv() else {
            break;
        };
        batch.push(next);
    }
    batch
}

/// Applies every operation in one writer commit, then answers all acks with
/// the shared outcome.
pub(crate) fn apply_search_batch(
    search: &Arc<SearchIndexState>,
    batch: Vec<SearchCommand>,
) -> anyhow::Result<()> {
    let mut ops = Vec::with_capacity(batch.len());
    let mut pending_acks = Vec::new();
    for command in batch {
        if let Some(ack) = command.ack {
            pending_acks.push(ack);
        }
        ops.push(command.op);
    }

    let apply_result = (|| -> anyhow::Result<()> {
        let mut writer = search.index.writer(SEARCH_WRITER_HEAP_BYTES)?;
        for op in ops {
            apply_search_operation(search, &mut writer, op);
        }
        writer.commit()?;
        search.reader.reload()?;
        Ok(())
    })();

    match apply_result {
        Ok(()) => {
            for ack in pending_acks {
                let _ = ack.send(Ok(()));
            }
            Ok(())
        }
        Err(error) => {
            for ack in pending_acks {
                let _ = ack.send(Err(AuthFailure::Internal));
            }
            Err(error)
        }
    }
}

pub(crate) fn apply_search_operation(
    search: &SearchIndexState,
    writer: &mut tantivy::IndexWriter,
    op: SearchOperation,
) {
    match op {
        SearchOperation::Upsert(doc) => upsert_doc(search, writer, doc),
        SearchOperation::Delete { update_id } => {
            writer.delete_term(Term::from_field_text(search.fields.update_id, &update_id));
        }
        SearchOperation::Rebuild { docs } => {
            let _ = writer.delete_all_documents();
            for doc in docs {
                upsert_doc(search, writer, doc);
            }
        }
    }
}

fn upsert_doc(search: &SearchIndexState, writer: &mut tantivy::IndexWriter, doc: IndexedUpdate) {
    writer.delete_term(Term::from_field_text(
        search.fields.update_id,
        &doc.update_id,
    ));
    let mut tantivy_doc = TantivyDocument::default();
    tantivy_doc.add_text(search.fields.update_id, doc.update_id);
    tantivy_doc.add_text(search.fields.author_id, doc.author_id);
    tantivy_doc.add_i64(search.fields.posted_at_unix, doc.posted_at_unix);
    tantivy_doc.add_text(search.fields.body, doc.body);
    let _ = writer.add_document(tantivy_doc);
}

pub(crate) async fn enqueue_search_operation(
    state: &AppState,
    op: SearchOperation,
    wait_for_apply: bool,
) -> Result<(), AuthFailure> {
    let result = enqueue_search_command(&state.search.tx, op, wait_for_apply).await;
    if result.is_err() {
        record_search_index_failure(SEARCH_INDEX_FAILURE_ENQUEUE);
    }
    result
}

async fn enqueue_search_command(
    tx: &mpsc::Sender<SearchCommand>,
    op: SearchOperation,
    wait_for_apply: bool,
) -> Result<(), AuthFailure> {
    if wait_for_apply {
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(SearchCommand {
            op,
            ack: Some(ack_tx),
        })
        .await
        .map_err(|_| AuthFailure::Internal)?;
        ack_rx.await.map_err(|_| AuthFailure::Internal)?
    } else {
        tx.send(SearchCommand { op, ack: None })
            .await
            .map_err(|_| AuthFailure::Internal)
    }
}

/// Loads every stored update into the index the first time search is used.
pub(crate) async fn ensure_search_bootstrapped(state: &AppState) -> Result<(), AuthFailure> {
    state
        .search_bootstrapped
        .get_or_try_init(|| async move {
            let repository = PostRepository::from_state(state);
            let docs = repository.all_updates_for_index().await?;
            let snapshot: HashSet<String> =
                docs.iter().map(|doc| doc.update_id.clone()).collect();
            tracing::info!(event = "search.bootstrap", docs = docs.len());
            enqueue_search_operation(state, SearchOperation::Rebuild { docs }, true).await?;

            // Writes queued ahead of the rebuild were wiped by it.
            let current = repository.all_updates_for_index().await?;
            let catch_up = bootstrap_catch_up(snapshot, current);
            if !catch_up.is_empty() {
                tracing::info!(event = "search.bootstrap", caught_up = catch_up.len());
            }
            for op in catch_up {
                enqueue_search_operation(state, op, true).await?;
            }
            Ok::<(), AuthFailure>(())
        })
        .await?;
    Ok(())
}

/// Operations that bring a freshly rebuilt index from `snapshot` up to `current`.
fn bootstrap_catch_up(
    mut snapshot: HashSet<String>,
    current: Vec<IndexedUpdate>,
) -> Vec<SearchOperation> {
    let mut ops: Vec<SearchOperation> = current
        .into_iter()
        .filter(|doc| !snapshot.remove(&doc.update_id))
        .map(SearchOperation::Upsert)
        .collect();
    ops.extend(
        snapshot
            .into_iter()
            .map(|update_id| SearchOperation::Delete { update_id }),
    );
    ops
}

pub(crate) fn normalize_search_query(raw_query: &str) -> String {
    raw_query.trim().to_owned()
}

pub(crate) fn effective_search_limit(query: &SearchQuery) -> usize {
    query.limit.unwrap_or(DEFAULT_SEARCH_RESULT_LIMIT)
}

pub(crate) fn validate_search_query(
    state: &AppState,
    query: &SearchQuery,
) -> Result<(), AuthFailure> {
    validate_search_query_limits(
        &normalize_search_query(&query.q),
        effective_search_limit(query),
        state.runtime.search_query_max_chars,
        state.runtime.search_result_limit_max,
    )
}

fn validate_search_query_limits(
    raw_query: &str,
    limit: usize,
    max_query_chars: usize,
    max_result_limit: usize,
) -> Result<(), AuthFailure> {
    if raw_query.is_empty() || raw_query.chars().count() > max_query_chars {
        return Err(AuthFailure::InvalidRequest);
    }
    if limit == 0 || limit > max_result_limit {
        return Err(AuthFailure::InvalidRequest);
    }
    if raw_query.split_whitespace().count() > MAX_SEARCH_TERMS {
        return Err(AuthFailure::InvalidRequest);
    }
    let wildcard_count = raw_query.matches('*').count() + raw_query.matches('?').count();
    if wildcard_count > MAX_SEARCH_WILDCARDS {
        return Err(AuthFailure::InvalidRequest);
    }
    if raw_query.matches('~').count() > MAX_SEARCH_FUZZY {
        return Err(AuthFailure::InvalidRequest);
    }
    if raw_query.contains(':') {
        return Err(AuthFailure::InvalidRequest);
    }
    Ok(())
}

async fn run_search_blocking_with_timeout<T, F>(
    timeout: Duration,
    task: F,
) -> Result<T, AuthFailure>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AuthFailure> + Send + 'static,
{
    tokio::time::timeout(timeout, async move {
        tokio::task::spawn_blocking(task)
            .await
            .map_err(|_| AuthFailure::Internal)?
    })
    .await
    .map_err(|_| AuthFailure::InvalidRequest)?
}

/// Best-ranked update ids for `raw_query`. Visibility is not applied here.
fn run_search_query_against_index(
    search_state: &SearchIndexState,
    raw_query: &str,
    limit: usize,
) -> Result<Vec<String>, AuthFailure> {
    let searcher = search_state.reader.searcher();
    let parser = QueryParser::for_index(&search_state.index, vec![search_state.fields.body]);
    let parsed = parser
        .parse_query(raw_query)
        .map_err(|_| AuthFailure::InvalidRequest)?;
    let top_docs = searcher
        .search(&parsed, &TopDocs::with_limit(limit))
        .map_err(|_| AuthFailure::Internal)?;

    let mut update_ids = Vec::with_capacity(top_docs.len());
    for (_score, address) in top_docs {
        let Ok(doc) = searcher.doc::<TantivyDocument>(address) else {
            continue;
        };
        let Some(value) = doc.get_first(search_state.fields.update_id) else {
            continue;
        };
        let Some(update_id) = value.as_str() else {
            continue;
        };
        update_ids.push(update_id.to_owned());
    }
    Ok(update_ids)
}

pub(crate) async fn run_search_query(
    state: &AppState,
    raw_query: &str,
    limit: usize,
) -> Result<Vec<String>, AuthFailure> {
    let query = normalize_search_query(raw_query);
    let search_state = state.search.state.clone();
    run_search_blocking_with_timeout(state.runtime.search_query_timeout, move || {
        run_search_query_against_index(&search_state, &query, limit)
    })
    .await
}
