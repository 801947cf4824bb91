//! Tantivy-based task search.
//!
//! Titles weigh most, then descriptions, rewards and the owner's name.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, QueryParser};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::Task;

const BOOST_TITLE: f32 = 10.0;
const BOOST_DESCRIPTION: f32 = 7.0;
const BOOST_REWARD: f32 = 4.0;
const BOOST_USERNAME: f32 = 2.5;

/// A matching task id and its relevance score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub task_id: String,
    pub score: f32,
}

struct SearchFields {
    task_id: Field,
    title: Field,
    description: Field,
    reward: Field,
    username: Field,
}

/// Full-text index over tasks.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let mut schema_builder = Schema::builder();
        let task_id = schema_builder.add_text_field("task_id", STRING | STORED);
        let title = schema_builder.add_text_field("title", TEXT | STORED);
        let description = schema_builder.add_text_field("description", TEXT);
        let reward = schema_builder.add_text_field("reward", TEXT);
        let username = schema_builder.add_text_field("username", TEXT);
        let schema = schema_builder.build();

        let fields = SearchFields {
            task_id,
            title,
            description,
            reward,
            username,
        };

        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema.clone()))
            .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Replace the index contents with `tasks`.
    pub async fn rebuild(&self, tasks: &[Task]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for task in tasks {
            writer.add_document(self.create_document(task))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        tracing::info!("Search index rebuilt with {} tasks", tasks.len());
        Ok(())
    }

    /// Index (or re-index) a single task.
    pub async fn index_task(&self, task: &Task) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.task_id, &task.id));
        writer.add_document(self.create_document(task))?;
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// Search for tasks matching the query.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchResult>, AppError> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let field_boosts = [
            (self.fields.title, BOOST_TITLE),
            (self.fields.description, BOOST_DESCRIPTION),
            (self.fields.reward, BOOST_REWARD),
            (self.fields.username, BOOST_USERNAME),
        ];

        let base_query = QueryParser::for_index(
            &self.index,
            field_boosts.iter().map(|(field, _)| *field).collect(),
        )
        .parse_query(query_str)
        .map_err(|e| AppError::Search(format!("Invalid search query: {}", e)))?;

        let subqueries: Vec<(Occur, Box<dyn Query>)> = field_boosts
            .iter()
            .filter_map(|(field, boost)| {
                let field_query = QueryParser::for_index(&self.index, vec![*field])
                    .parse_query(query_str)
                    .ok()?;
                Some((
                    Occur::Should,
                    Box::new(BoostQuery::new(field_query, *boost)) as Box<dyn Query>,
                ))
            })
            .collect();

        let combined_query = if subqueries.is_empty() {
            base_query
        } else {
            Box::new(BooleanQuery::new(subqueries))
        };

        let top_docs = searcher
            .search(&combined_query, &TopDocs::with_limit(limit + offset))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let results = top_docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(score, doc_address)| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                let task_id = doc.get_first(self.fields.task_id)?.as_str()?.to_string();
                Some(SearchResult { task_id, score })
            })
            .collect();

        Ok(results)
    }

    fn create_document(&self, task: &Task) -> TantivyDocument {
        doc!(
            self.fields.task_id => task.id.clone(),
            self.fields.title => task.title.clone(),
            self.fields.description => task.description.clone(),
            self.fields.reward => task.reward.clone(),
            self.fields.username => task.username.clone()
        )
    }
}
