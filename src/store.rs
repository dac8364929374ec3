//! Run persistence: the atomic commit of a finished run tree.
//!
//! Schema:
//! - ocr_runs: one row per committed run (summary included)
//! - ocr_images: source pages and derived variants; `source_image_id` links
//!   a variant to the page it was derived from
//! - ocr_text_results: one row per recognised variant; `image_id` is set to
//!   NULL (not cascaded) when its image is deleted
//!
//! A [`RunDraft`] refers to its images by position; [`RunStore::commit`]
//! assigns ids, rewrites the positional links into foreign keys and writes
//! all three tables inside one transaction. Either the whole tree becomes
//! visible or nothing does.

use crate::error::OcrRunError;
use crate::model::{ImageKind, PageImage, Run, RunDraft, TextResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS ocr_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    token TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    backend TEXT NOT NULL,
    language TEXT,
    original_path TEXT NOT NULL,
    converted_path TEXT,
    summary_text TEXT,
    summary_confidence REAL
);

CREATE TABLE IF NOT EXISTS ocr_images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL,
    path TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('source', 'derived')),
    label TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    source_image_id INTEGER,
    FOREIGN KEY (run_id) REFERENCES ocr_runs(id) ON DELETE CASCADE,
    FOREIGN KEY (source_image_id) REFERENCES ocr_images(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS ocr_text_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL,
    image_id INTEGER,
    variant_label TEXT NOT NULL,
    text TEXT NOT NULL,
    confidence REAL,
    FOREIGN KEY (run_id) REFERENCES ocr_runs(id) ON DELETE CASCADE,
    FOREIGN KEY (image_id) REFERENCES ocr_images(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_images_run_id ON ocr_images(run_id);
CREATE INDEX IF NOT EXISTS idx_results_run_id ON ocr_text_results(run_id);
CREATE INDEX IF NOT EXISTS idx_results_image_id ON ocr_text_results(image_id);
";

/// Durable storage for completed runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist the whole run tree atomically and return it with ids assigned.
    async fn commit(&self, draft: RunDraft) -> Result<Run, OcrRunError>;

    /// Fetch one run with its images and results.
    async fn get(&self, run_id: i64) -> Result<Option<Run>, OcrRunError>;

    /// All runs, newest first, with images and results loaded.
    async fn list(&self) -> Result<Vec<Run>, OcrRunError>;

    /// Delete a run and everything it owns. Returns whether it existed.
    async fn delete_run(&self, run_id: i64) -> Result<bool, OcrRunError>;

    /// Delete one image; its text results survive with no image.
    async fn delete_image(&self, image_id: i64) -> Result<bool, OcrRunError>;
}

/// SQLite-backed [`RunStore`].
///
/// The connection is shared behind a mutex and every call runs on the
/// blocking pool, so the store can be cloned freely into async tasks.
#[derive(Clone)]
pub struct SqliteRunStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteRunStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRunStore").finish_non_exhaustive()
    }
}

impl SqliteRunStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self, OcrRunError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    OcrRunError::storage(format!(
                        "cannot create directory '{}': {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            OcrRunError::storage(format!("cannot open database '{}': {e}", path.display()))
        })?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(OcrRunError::storage)?;
        Self::init(conn)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn in_memory() -> Result<Self, OcrRunError> {
        let conn = Connection::open_in_memory().map_err(OcrRunError::storage)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, OcrRunError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(OcrRunError::storage)?;
        conn.execute_batch(SCHEMA).map_err(OcrRunError::storage)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, OcrRunError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, OcrRunError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| OcrRunError::storage("connection lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| OcrRunError::Internal(format!("Store task panicked: {}", e)))?
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn commit(&self, draft: RunDraft) -> Result<Run, OcrRunError> {
        validate_draft(&draft)?;
        let run = self.with_conn(move |conn| commit_blocking(conn, draft)).await?;
        info!(
            "Committed run {} ({} images, {} results)",
            run.id,
            run.images.len(),
            run.text_results.len()
        );
        Ok(run)
    }

    async fn get(&self, run_id: i64) -> Result<Option<Run>, OcrRunError> {
        self.with_conn(move |conn| load_run(conn, run_id)).await
    }

    async fn list(&self) -> Result<Vec<Run>, OcrRunError> {
        self.with_conn(|conn| {
            let ids: Vec<i64> = {
                let mut stmt = conn
                    .prepare("SELECT id FROM ocr_runs ORDER BY created_at DESC, id DESC")
                    .map_err(OcrRunError::storage)?;
                let rows = stmt
                    .query_map([], |row| row.get(0))
                    .map_err(OcrRunError::storage)?;
                rows.collect::<Result<_, _>>().map_err(OcrRunError::storage)?
            };
            let mut runs = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(run) = load_run(conn, id)? {
                    runs.push(run);
                }
            }
            Ok(runs)
        })
        .await
    }

    async fn delete_run(&self, run_id: i64) -> Result<bool, OcrRunError> {
        self.with_conn(move |conn| {
            let n = conn
                .execute("DELETE FROM ocr_runs WHERE id = ?1", params![run_id])
                .map_err(OcrRunError::storage)?;
            debug!("delete_run({}) removed {} row(s)", run_id, n);
            Ok(n > 0)
        })
        .await
    }

    async fn delete_image(&self, image_id: i64) -> Result<bool, OcrRunError> {
        self.with_conn(move |conn| {
            let n = conn
                .execute("DELETE FROM ocr_images WHERE id = ?1", params![image_id])
                .map_err(OcrRunError::storage)?;
            Ok(n > 0)
        })
        .await
    }
}

/// Reject drafts whose positional links do not form a valid tree.
fn validate_draft(draft: &RunDraft) -> Result<(), OcrRunError> {
    for (idx, image) in draft.images.iter().enumerate() {
        match (image.kind, image.source) {
            (ImageKind::Source, None) => {}
            (ImageKind::Source, Some(_)) => {
                return Err(OcrRunError::storage(format!(
                    "source image '{}' cannot have a source",
                    image.label
                )))
            }
            (ImageKind::Derived, Some(src)) if src < idx => {
                if draft.images[src].kind != ImageKind::Source {
                    return Err(OcrRunError::storage(format!(
                        "derived image '{}' must point at a source image",
                        image.label
                    )));
                }
            }
            (ImageKind::Derived, _) => {
                return Err(OcrRunError::storage(format!(
                    "derived image '{}' has no preceding source image",
                    image.label
                )))
            }
        }
    }
    if let Some(bad) = draft.results.iter().find(|r| r.image >= draft.images.len()) {
        return Err(OcrRunError::storage(format!(
            "result '{}' refers to missing image #{}",
            bad.variant_label, bad.image
        )));
    }
    Ok(())
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn commit_blocking(conn: &mut Connection, draft: RunDraft) -> Result<Run, OcrRunError> {
    let tx = conn.transaction().map_err(OcrRunError::storage)?;

    tx.execute(
        "INSERT INTO ocr_runs (token, created_at, backend, language, original_path,
                               converted_path, summary_text, summary_confidence)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            draft.token,
            draft.created_at.to_rfc3339(),
            draft.backend,
            draft.language,
            path_str(&draft.original_path),
            draft.converted_path.as_deref().map(path_str),
            draft.summary_text,
            draft.summary_confidence,
        ],
    )
    .map_err(OcrRunError::storage)?;
    let run_id = tx.last_insert_rowid();

    let mut images: Vec<PageImage> = Vec::with_capacity(draft.images.len());
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO ocr_images (run_id, path, kind, label, sequence, source_image_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(OcrRunError::storage)?;
        for image in draft.images {
            let source_image_id = image.source.map(|idx| images[idx].id);
            stmt.execute(params![
                run_id,
                path_str(&image.path),
                image.kind.as_str(),
                image.label,
                image.sequence,
                source_image_id,
            ])
            .map_err(OcrRunError::storage)?;
            images.push(PageImage {
                id: tx.last_insert_rowid(),
                run_id,
                path: image.path,
                kind: image.kind,
                label: image.label,
                sequence: image.sequence,
                source_image_id,
            });
        }
    }

    let mut text_results = Vec::with_capacity(draft.results.len());
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO ocr_text_results (run_id, image_id, variant_label, text, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(OcrRunError::storage)?;
        for result in draft.results {
            let image_id = images[result.image].id;
            stmt.execute(params![
                run_id,
                image_id,
                result.variant_label,
                result.text,
                result.confidence,
            ])
            .map_err(OcrRunError::storage)?;
            text_results.push(TextResult {
                id: tx.last_insert_rowid(),
                run_id,
                image_id: Some(image_id),
                variant_label: result.variant_label,
                text: result.text,
                confidence: result.confidence,
            });
        }
    }

    tx.commit().map_err(OcrRunError::storage)?;

    Ok(Run {
        id: run_id,
        token: draft.token,
        created_at: draft.created_at,
        backend: draft.backend,
        language: draft.language,
        original_path: draft.original_path,
        converted_path: draft.converted_path,
        summary_text: draft.summary_text,
        summary_confidence: draft.summary_confidence,
        images,
        text_results,
    })
}

struct RunRow {
    token: String,
    created_at: String,
    backend: String,
    language: Option<String>,
    original_path: String,
    converted_path: Option<String>,
    summary_text: Option<String>,
    summary_confidence: Option<f64>,
}

fn load_run(conn: &Connection, run_id: i64) -> Result<Option<Run>, OcrRunError> {
    let row = conn
        .query_row(
            "SELECT token, created_at, backend, language, original_path, converted_path,
                    summary_text, summary_confidence
             FROM ocr_runs WHERE id = ?1",
            params![run_id],
            |row| {
                Ok(RunRow {
                    token: row.get(0)?,
                    created_at: row.get(1)?,
                    backend: row.get(2)?,
                    language: row.get(3)?,
                    original_path: row.get(4)?,
                    converted_path: row.get(5)?,
                    summary_text: row.get(6)?,
                    summary_confidence: row.get(7)?,
                })
            },
        )
        .optional()
        .map_err(OcrRunError::storage)?;

    let Some(row) = row else {
        return Ok(None);
    };

    let created_at = DateTime::parse_from_rfc3339(&row.created_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| OcrRunError::storage(format!("run {run_id}: bad timestamp: {e}")))?;

    let images = load_images(conn, run_id)?;
    let text_results = load_results(conn, run_id)?;

    Ok(Some(Run {
        id: run_id,
        token: row.token,
        created_at,
        backend: row.backend,
        language: row.language,
        original_path: PathBuf::from(row.original_path),
        converted_path: row.converted_path.map(PathBuf::from),
        summary_text: row.summary_text,
        summary_confidence: row.summary_confidence,
        images,
        text_results,
    }))
}

fn load_images(conn: &Connection, run_id: i64) -> Result<Vec<PageImage>, OcrRunError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, path, kind, label, sequence, source_image_id
             FROM ocr_images WHERE run_id = ?1 ORDER BY id",
        )
        .map_err(OcrRunError::storage)?;
    let rows = stmt
        .query_map(params![run_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        })
        .map_err(OcrRunError::storage)?;

    let mut images = Vec::new();
    for row in rows {
        let (id, path, kind, label, sequence, source_image_id) = row.map_err(OcrRunError::storage)?;
        let kind = ImageKind::parse(&kind)
            .ok_or_else(|| OcrRunError::storage(format!("image {id}: unknown kind '{kind}'")))?;
        images.push(PageImage {
            id,
            run_id,
            path: PathBuf::from(path),
            kind,
            label,
            sequence,
            source_image_id,
        });
    }
    Ok(images)
}

fn load_results(conn: &Connection, run_id: i64) -> Result<Vec<TextResult>, OcrRunError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, image_id, variant_label, text, confidence
             FROM ocr_text_results WHERE run_id = ?1 ORDER BY id",
        )
        .map_err(OcrRunError::storage)?;
    let rows = stmt
        .query_map(params![run_id], |row| {
            Ok(TextResult {
                id: row.get(0)?,
                run_id,
                image_id: row.get(1)?,
                variant_label: row.get(2)?,
                text: row.get(3)?,
                confidence: row.get(4)?,
            })
        })
        .map_err(OcrRunError::storage)?;
    rows.collect::<Result<_, _>>().map_err(OcrRunError::storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImageDraft, ResultDraft};

    fn draft(token: &str) -> RunDraft {
        RunDraft {
            token: token.to_string(),
            created_at: Utc::now(),
            backend: "tesseract".into(),
            language: Some("vie+eng".into()),
            original_path: PathBuf::from(format!("storage/{token}/original/scan.png")),
            converted_path: None,
            summary_text: Some("Xin chào".into()),
            summary_confidence: Some(91.0),
            images: vec![
                ImageDraft {
                    path: PathBuf::from("scan.png"),
                    kind: ImageKind::Source,
                    label: "page_1".into(),
                    sequence: 1,
                    source: None,
                },
                ImageDraft {
                    path: PathBuf::from("page_1_original.png"),
                    kind: ImageKind::Derived,
                    label: "page_1_original".into(),
                    sequence: 1,
                    source: Some(0),
                },
                ImageDraft {
                    path: PathBuf::from("page_1_grayscale.png"),
                    kind: ImageKind::Derived,
                    label: "page_1_grayscale".into(),
                    sequence: 2,
                    source: Some(0),
                },
            ],
            results: vec![
                ResultDraft {
                    image: 1,
                    variant_label: "page_1_original".into(),
                    text: "Xin chao".into(),
                    confidence: Some(80.0),
                },
                ResultDraft {
                    image: 2,
                    variant_label: "page_1_grayscale".into(),
                    text: "Xin chào".into(),
                    confidence: Some(91.0),
                },
            ],
        }
    }

    #[tokio::test]
    async fn commit_assigns_ids_and_lineage() {
        let store = SqliteRunStore::in_memory().unwrap();
        let run = store.commit(draft("a")).await.unwrap();

        assert_eq!(run.images.len(), 3);
        let source = &run.images[0];
        assert_eq!(source.source_image_id, None);
        assert!(run.images[1..]
            .iter()
            .all(|img| img.source_image_id == Some(source.id)));
        assert_eq!(run.text_results[1].image_id, Some(run.images[2].id));

        let loaded = store.get(run.id).await.unwrap().unwrap();
        assert_eq!(loaded, run);
    }

    #[tokio::test]
    async fn invalid_draft_commits_nothing() {
        let store = SqliteRunStore::in_memory().unwrap();
        let mut bad = draft("bad");
        bad.results[0].image = 42;
        let err = store.commit(bad).await.unwrap_err();
        assert!(matches!(err, OcrRunError::StorageFailed { .. }));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_token_rolls_back() {
        let store = SqliteRunStore::in_memory().unwrap();
        store.commit(draft("same")).await.unwrap();
        let err = store.commit(draft("same")).await.unwrap_err();
        assert!(matches!(err, OcrRunError::StorageFailed { .. }));

        let runs = store.list().await.unwrap();
        assert_eq!(runs.len(), 1);
        let images: i64 = store
            .with_conn(|c| {
                c.query_row("SELECT COUNT(*) FROM ocr_images", [], |r| r.get(0))
                    .map_err(OcrRunError::storage)
            })
            .await
            .unwrap();
        assert_eq!(images, 3);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = SqliteRunStore::in_memory().unwrap();
        let mut older = draft("older");
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        store.commit(older).await.unwrap();
        store.commit(draft("newer")).await.unwrap();

        let tokens: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.token)
            .collect();
        assert_eq!(tokens, vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn deleting_an_image_keeps_its_results() {
        let store = SqliteRunStore::in_memory().unwrap();
        let run = store.commit(draft("a")).await.unwrap();
        let target = run.images[1].id;

        assert!(store.delete_image(target).await.unwrap());
        let loaded = store.get(run.id).await.unwrap().unwrap();
        assert_eq!(loaded.images.len(), 2);
        assert_eq!(loaded.text_results.len(), 2);
        assert_eq!(loaded.text_results[0].image_id, None);
        assert_eq!(loaded.text_results[1].image_id, Some(run.images[2].id));
    }

    #[tokio::test]
    async fn deleting_a_run_cascades() {
        let store = SqliteRunStore::in_memory().unwrap();
        let run = store.commit(draft("a")).await.unwrap();
        assert!(store.delete_run(run.id).await.unwrap());
        assert!(!store.delete_run(run.id).await.unwrap());
        assert!(store.get(run.id).await.unwrap().is_none());

        let orphans: i64 = store
            .with_conn(|c| {
                c.query_row("SELECT COUNT(*) FROM ocr_text_results", [], |r| r.get(0))
                    .map_err(OcrRunError::storage)
            })
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn reopening_a_file_database_keeps_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("ocr.sqlite");
        let id = {
            let store = SqliteRunStore::open(&path).unwrap();
            store.commit(draft("persisted")).await.unwrap().id
        };
        let store = SqliteRunStore::open(&path).unwrap();
        let run = store.get(id).await.unwrap().unwrap();
        assert_eq!(run.token, "persisted");
        assert_eq!(run.summary_confidence_display().as_deref(), Some("91.00%"));
    }
}
