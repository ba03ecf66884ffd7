//! Persisted dataset format.
//!
//! A dataset is a zstd-compressed, tab-separated table with one row per [`Operation`]. The first
//! line is a `#` comment holding the command line that produced the run, followed by a header
//! row:
//!
//! ```text
//! # S3STRESS__CONCURRENCY=64 S3STRESS__DURATION=1m s3stress put
//! op	thread	client_id	n_objects	bytes	endpoint	file	error	start	end
//! PUT	0	Xa3k	1	10485760	node1:9000	aXk2/1.obj		2024-05-01T10:00:00.000123Z	2024-05-01T10:00:00.402511Z
//! ```
//!
//! Fields containing tabs, quotes or newlines are quoted, timestamps are RFC 3339 with full
//! nanosecond precision, and an empty `error` column means the operation succeeded.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::operation::{Operation, Operations};

/// Column names, in serialization order of [`Operation`]'s fields.
pub const HEADER: [&str; 10] = [
    "op",
    "thread",
    "client_id",
    "n_objects",
    "bytes",
    "endpoint",
    "file",
    "error",
    "start",
    "end",
];

/// Compression level for written datasets.
const ZSTD_LEVEL: i32 = 9;

/// A decoded dataset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dataset {
    /// The command line recorded for reproducibility.
    pub command_line: String,
    /// All operations, in stored order.
    pub operations: Operations,
}

/// Writes the uncompressed table for `ops`, preceded by `command_line`.
pub fn write_table<W: Write>(ops: &Operations, mut writer: W, command_line: &str) -> Result<()> {
    let command_line = command_line.replace(['\r', '\n'], " ");
    writeln!(writer, "# {command_line}")?;

    let mut table = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer);
    table.write_record(HEADER)?;
    for op in ops {
        table.serialize(op)?;
    }
    table.flush()?;
    Ok(())
}

/// Reads a table written by [`write_table`].
pub fn read_table<R: Read>(reader: R) -> Result<Dataset> {
    let mut reader = BufReader::new(reader);
    let mut first_line = String::new();
    reader.read_line(&mut first_line)?;
    let command_line = first_line
        .strip_prefix("# ")
        .ok_or_else(|| Error::Decode("missing command line comment".into()))?
        .trim_end_matches(['\r', '\n'])
        .to_owned();

    let mut table = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(reader);
    let header = table.headers()?;
    if !header.iter().eq(HEADER) {
        return Err(Error::Decode(format!(
            "unexpected header `{}`",
            header.iter().collect::<Vec<_>>().join(",")
        )));
    }

    let operations = table
        .deserialize::<Operation>()
        .collect::<Result<Operations, _>>()?;

    Ok(Dataset {
        command_line,
        operations,
    })
}

/// Writes `ops` as a compressed dataset to `path`.
pub fn write_dataset(ops: &Operations, path: &Path, command_line: &str) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    let mut encoder = zstd::stream::Encoder::new(file, ZSTD_LEVEL)?;
    write_table(ops, &mut encoder, command_line)?;
    encoder.finish()?.flush()?;
    Ok(())
}

/// Reads a compressed dataset from `path`.
pub fn read_dataset(path: &Path) -> Result<Dataset> {
    let decoder = zstd::stream::Decoder::new(File::open(path)?)?;
    read_table(decoder)
}
