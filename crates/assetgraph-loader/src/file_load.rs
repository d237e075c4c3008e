//! Version loaders that turn one CSV file of one version directory into
//! batches on the pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::convert::equipment::EquipmentMapping;
use crate::convert::{ConvertContext, RowQuads, StaticKind};
use crate::csv_file::CsvRows;
use crate::dirty::{is_dirty, should_import, CREATED_COLUMN, UPDATED_COLUMN};
use crate::equipment_type::EquipmentType;
use crate::error::{LoaderError, Result};
use crate::pipeline::BatchSender;
use crate::quad::{scope_quad, Mutation};
use crate::state::{LoadCursor, VersionLoader};

/// Where a file lives and where its batches go.
#[derive(Clone)]
pub struct FileSource {
    pub master_dir: PathBuf,
    pub scope: String,
    pub file: String,
    pub batch_size: usize,
    pub sender: BatchSender,
}

impl FileSource {
    pub fn path(&self, version: &str) -> PathBuf {
        self.master_dir.join(&self.scope).join(version).join(&self.file)
    }
}

/// Rows that passed the dirty gate, grouped into batches.
struct Batcher<'a> {
    source: &'a FileSource,
    mutation: Mutation,
    newest: Option<DateTime<Utc>>,
    rows: usize,
}

impl<'a> Batcher<'a> {
    fn new(source: &'a FileSource) -> Self {
        Self {
            source,
            mutation: Mutation::with_capacity(source.batch_size),
            newest: None,
            rows: 0,
        }
    }

    async fn push(&mut self, rq: RowQuads, stamp: Option<DateTime<Utc>>) -> Result<()> {
        self.mutation.set.extend(rq.quads);
        self.mutation.set.push(scope_quad(&self.source.scope, &rq.uid));
        self.rows += 1;
        if let Some(t) = stamp {
            if self.newest.map_or(true, |n| t > n) {
                self.newest = Some(t);
            }
        }
        if self.mutation.len() >= self.source.batch_size {
            let full = std::mem::replace(
                &mut self.mutation,
                Mutation::with_capacity(self.source.batch_size),
            );
            self.source.sender.send(full).await?;
        }
        Ok(())
    }

    async fn finish(self) -> Result<Option<DateTime<Utc>>> {
        self.source.sender.send(self.mutation).await?;
        Ok(self.newest)
    }
}

/// Read the file of `version`, gate rows on their timestamps and feed the
/// converted rows to the pipeline. `prepare` inspects the header and returns
/// the row converter, or fails the file.
async fn drive<P, F>(
    source: &FileSource,
    version: &str,
    cursor: LoadCursor,
    prepare: P,
) -> Result<Option<DateTime<Utc>>>
where
    P: FnOnce(&CsvRows) -> Result<F>,
    F: Fn(&[String], &[String]) -> Option<RowQuads>,
{
    let path = source.path(version);
    tracing::info!(file = %path.display(), state = %cursor.state, "started loading");
    let mut rows = CsvRows::open(&path).await?;
    let convert = prepare(&rows)?;
    let columns = rows.columns().to_vec();
    let updated_idx = rows.column_index(UPDATED_COLUMN);
    let created_idx = rows.column_index(CREATED_COLUMN);

    let mut batcher = Batcher::new(source);
    let mut skipped = 0usize;
    while let Some(row) = rows.next_row().await {
        let row = row?;
        let stamp = match is_dirty(&row, updated_idx, created_idx) {
            Ok(stamp) => stamp,
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "cannot read row timestamp, importing row");
                None
            }
        };
        if !should_import(cursor.state, cursor.watermark, stamp) {
            skipped += 1;
            continue;
        }
        if let Some(rq) = convert(&columns, &row) {
            batcher.push(rq, stamp).await?;
        }
    }

    let imported = batcher.rows;
    let newest = batcher.finish().await?;
    tracing::info!(file = %path.display(), imported, skipped, "end loading");
    Ok(newest)
}

/// Products, applications, instances, acquired rights or users.
pub struct StaticFileLoader {
    source: FileSource,
    kind: StaticKind,
    ctx: ConvertContext,
}

impl StaticFileLoader {
    pub fn new(source: FileSource, kind: StaticKind, ctx: ConvertContext) -> Self {
        Self { source, kind, ctx }
    }
}

#[async_trait]
impl VersionLoader for StaticFileLoader {
    async fn load_version(&self, version: &str, cursor: LoadCursor) -> Result<Option<DateTime<Utc>>> {
        let kind = self.kind;
        let ctx = &self.ctx;
        let scope = self.source.scope.as_str();
        drive(&self.source, version, cursor, |rows| {
            let column = kind.xid_column();
            let pk_idx = rows.column_index(column).ok_or_else(|| LoaderError::MissingColumn {
                path: rows.path().to_path_buf(),
                column: column.to_string(),
            })?;
            let convert = kind.converter();
            // The users key column is only a presence check.
            let needs_key = kind != StaticKind::Users;
            Ok(move |columns: &[String], row: &[String]| {
                if needs_key && row.get(pk_idx).map_or(true, String::is_empty) {
                    tracing::warn!(kind = %kind, cells = row.len(), "row without primary key skipped");
                    return None;
                }
                convert(ctx, columns, scope, row, pk_idx)
            })
        })
        .await
    }
}

/// Equipment file described by an [`EquipmentType`].
pub struct EquipmentFileLoader {
    source: FileSource,
    eq_type: EquipmentType,
    ctx: ConvertContext,
}

impl EquipmentFileLoader {
    pub fn new(source: FileSource, eq_type: EquipmentType, ctx: ConvertContext) -> Self {
        Self {
            source,
            eq_type,
            ctx,
        }
    }
}

#[async_trait]
impl VersionLoader for EquipmentFileLoader {
    async fn load_version(&self, version: &str, cursor: LoadCursor) -> Result<Option<DateTime<Utc>>> {
        let ctx = &self.ctx;
        let eq_type = &self.eq_type;
        drive(&self.source, version, cursor, |rows| {
            let mapping = EquipmentMapping::new(eq_type, rows.columns(), rows.path())?;
            Ok(move |_columns: &[String], row: &[String]| mapping.convert_row(ctx, row))
        })
        .await
    }
}
