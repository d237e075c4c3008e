//! `;`-delimited CSV input, read on the blocking pool and streamed to async
//! consumers through a bounded channel.

use std::fs::File;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use crate::error::{LoaderError, Result};

pub const DELIMITER: u8 = b';';

/// Rows buffered between the blocking reader and the converter.
const ROW_BUFFER: usize = 256;

/// Position of `column` in the header, compared exactly.
pub fn find_column_index(column: &str, columns: &[String]) -> Option<usize> {
    columns.iter().position(|c| c == column)
}

fn reader_for(path: &Path) -> Result<csv::Reader<File>> {
    let file = File::open(path).map_err(|e| LoaderError::io(path, e))?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file))
}

fn record_cells(record: &csv::StringRecord) -> Vec<String> {
    record.iter().map(str::to_string).collect()
}

fn read_header(path: &Path, reader: &mut csv::Reader<File>) -> Result<Vec<String>> {
    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Ok(record_cells(&record)),
        Ok(false) => Err(LoaderError::EmptyFile(path.to_path_buf())),
        Err(e) => Err(LoaderError::csv(path, e)),
    }
}

/// A CSV file whose header has been read; rows arrive through [`next_row`].
///
/// [`next_row`]: CsvRows::next_row
pub struct CsvRows {
    path: PathBuf,
    columns: Vec<String>,
    rows: mpsc::Receiver<Result<Vec<String>>>,
}

impl CsvRows {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (columns, mut reader) = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || {
                let mut reader = reader_for(&path)?;
                let columns = read_header(&path, &mut reader)?;
                Ok::<_, LoaderError>((columns, reader))
            })
            .await??
        };

        let (tx, rows) = mpsc::channel(ROW_BUFFER);
        let reader_path = path.clone();
        tokio::task::spawn_blocking(move || {
            let mut record = csv::StringRecord::new();
            loop {
                let item = match reader.read_record(&mut record) {
                    Ok(true) => Ok(record_cells(&record)),
                    Ok(false) => return,
                    Err(e) => Err(LoaderError::csv(&reader_path, e)),
                };
                let failed = item.is_err();
                // The consumer went away; stop reading.
                if tx.blocking_send(item).is_err() || failed {
                    return;
                }
            }
        });

        Ok(Self {
            path,
            columns,
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        find_column_index(column, &self.columns)
    }

    /// Next row, `None` at end of file. A read error ends the stream.
    pub async fn next_row(&mut self) -> Option<Result<Vec<String>>> {
        self.rows.recv().await
    }
}

/// Header row only.
pub async fn read_columns(path: impl Into<PathBuf>) -> Result<Vec<String>> {
    let path = path.into();
    tokio::task::spawn_blocking(move || {
        let mut reader = reader_for(&path)?;
        read_header(&path, &mut reader)
    })
    .await?
}
