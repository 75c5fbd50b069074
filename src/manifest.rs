//! `mappings.csv`: one row per individual crop.

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::Writer;

use crate::decompose::CropRecord;
use crate::error::Result;

pub const MANIFEST_FILENAME: &str = "mappings.csv";
pub const MANIFEST_HEADER: [&str; 6] =
    ["individual", "title", "montage", "subplot", "row", "col"];

/// Append-only CSV writer mapping each crop back to its montage slot.
pub struct ManifestWriter {
    path: PathBuf,
    writer: Writer<File>,
    rows: usize,
}

impl ManifestWriter {
    /// Creates (or truncates) the manifest and writes the header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = Writer::from_path(&path)?;
        writer.write_record(MANIFEST_HEADER)?;
        writer.flush()?;
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written so far, excluding the header.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Records every crop of one montage, then flushes.
    ///
    /// `titles[i]` is the identifier issued with slot `i`.
    pub fn write_page(
        &mut self,
        montage: &str,
        titles: &[String],
        crops: &[CropRecord],
    ) -> Result<()> {
        for crop in crops {
            let title = titles.get(crop.index).map(String::as_str).unwrap_or_default();
            let title = escape_identifier(title);
            let (index, row, col) = (
                crop.index.to_string(),
                crop.row.to_string(),
                crop.col.to_string(),
            );
            self.writer.write_record([
                crop.filename.as_str(),
                title.as_str(),
                montage,
                index.as_str(),
                row.as_str(),
                col.as_str(),
            ])?;
            self.rows += 1;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Escapes an identifier so the title column is plain printable ASCII.
///
/// Backslash and the common control characters get their short forms; other
/// non-printable or non-ASCII characters become `\xNN`, `\uNNNN` or `\UNNNNNNNN`.
pub fn escape_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let code = ch as u32;
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ' '..='~' => out.push(ch),
            _ if code < 0x100 => out.push_str(&format!("\\x{code:02x}")),
            _ if code < 0x10000 => out.push_str(&format!("\\u{code:04x}")),
            _ => out.push_str(&format!("\\U{code:08x}")),
        }
    }
    out
}
