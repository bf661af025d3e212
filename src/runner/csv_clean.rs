//! Cleaning of raw CSV extracts before they are loaded

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const BOM: &[u8] = b"\xEF\xBB\xBF";
const CLEANED_SUFFIX: &str = "_cleaned.csv";

#[derive(Debug, Error)]
pub enum CsvCleanError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One input file and the cleaned copy written for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedFile {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Data rows written, not counting the header
    pub rows: usize,
    /// False when the input had no non-blank row to use as a header
    pub has_header: bool,
}

/// Where the cleaned copy of `input` is written: `<stem>_cleaned.csv` beside it
pub fn cleaned_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{}{}", stem, CLEANED_SUFFIX))
}

/// Raw extracts in `dir`: `*.csv` files that are not themselves cleaned copies
pub fn raw_inputs(dir: &Path) -> Result<Vec<PathBuf>, CsvCleanError> {
    let io = |source: std::io::Error| CsvCleanError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut inputs = Vec::new();
    for entry in fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_file() && name.ends_with(".csv") && !name.ends_with(CLEANED_SUFFIX) {
            inputs.push(path);
        }
    }
    inputs.sort();
    Ok(inputs)
}

/// Clean every raw extract in `dir`, in file name order
pub fn clean_directory(dir: &Path) -> Result<Vec<CleanedFile>, CsvCleanError> {
    let inputs = raw_inputs(dir)?;
    debug!("Cleaning {} CSV files in {}", inputs.len(), dir.display());

    inputs
        .into_iter()
        .map(|input| {
            let output = cleaned_path(&input);
            clean_file(&input, &output)
        })
        .collect()
}

/// Write a cleaned copy of `input` to `output`, replacing it if present
///
/// A leading UTF-8 byte order mark is dropped. The first row with a non-blank
/// field becomes the header; rows before it are discarded. Rows whose fields
/// are all blank are dropped and every field is trimmed. An input with no
/// header still produces an empty output file.
pub fn clean_file(input: &Path, output: &Path) -> Result<CleanedFile, CsvCleanError> {
    let bytes = fs::read(input).map_err(|source| CsvCleanError::Io {
        path: input.to_path_buf(),
        source,
    })?;
    let content = bytes.strip_prefix(BOM).unwrap_or(&bytes[..]);

    let malformed = |path: &Path| {
        let path = path.to_path_buf();
        move |source: csv::Error| CsvCleanError::Csv { path, source }
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content);
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(output)
        .map_err(malformed(output))?;

    let mut has_header = false;
    let mut rows = 0;
    for record in reader.records() {
        let record = record.map_err(malformed(input))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        writer.write_record(&record).map_err(malformed(output))?;
        if has_header {
            rows += 1;
        } else {
            has_header = true;
        }
    }
    writer.flush().map_err(|source| CsvCleanError::Io {
        path: output.to_path_buf(),
        source,
    })?;

    info!("Cleaned {} -> {} ({} rows)", input.display(), output.display(), rows);
    Ok(CleanedFile {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        rows,
        has_header,
    })
}
