//! Artifact header codec.
//!
//! Every artifact starts with exactly [`HEADER_LINES`] lines:
//!
//! ```text
//! <recipe>
//! 00000000000000002000      content line count
//! 00000000000000000080      width at generation time
//! ```
//!
//! The numeric fields are zero-padded to a fixed width so the count can be
//! patched in place once the recipe has finished writing content behind it.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};

pub const HEADER_LINES: usize = 3;

const FIELD_DIGITS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub recipe: String,
    pub line_count: u64,
    pub width: u16,
}

/// Write the three header lines. Fails for recipes that would not survive a
/// round trip (embedded newlines).
pub fn write_header<W: Write>(w: &mut W, recipe: &str, line_count: u64, width: u16) -> Result<()> {
    if recipe.contains(['\n', '\r']) {
        return Err(Error::generation("recipe must be a single line"));
    }
    write!(
        w,
        "{recipe}\n{line_count:0digits$}\n{width:0digits$}\n",
        digits = FIELD_DIGITS
    )
    .map_err(|e| Error::generation(format!("failed to write header: {e}")))
}

/// Byte offset of the line-count field for an artifact produced by `recipe`.
fn count_offset(recipe: &str) -> u64 {
    recipe.len() as u64 + 1
}

/// Overwrite the line-count field of a header previously written by
/// [`write_header`] with the same recipe.
pub fn patch_line_count(file: &mut File, recipe: &str, line_count: u64) -> io::Result<()> {
    file.seek(SeekFrom::Start(count_offset(recipe)))?;
    write!(file, "{line_count:0digits$}", digits = FIELD_DIGITS)?;
    file.seek(SeekFrom::End(0))?;
    Ok(())
}

pub fn read_header(path: &Path) -> Result<Header> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    parse_header(&mut BufReader::new(file), path)
}

/// Parse a header from the start of `reader`, leaving it positioned at the
/// first content byte.
pub fn parse_header<R: BufRead>(reader: &mut R, path: &Path) -> Result<Header> {
    let mut lines: Vec<String> = Vec::with_capacity(HEADER_LINES);
    for idx in 0..HEADER_LINES {
        let mut buf = Vec::new();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| Error::io(path, e))?;
        if n == 0 || buf.last() != Some(&b'\n') {
            return Err(Error::corrupt_header(
                path,
                format!("expected {HEADER_LINES} header lines, found {idx}"),
            ));
        }
        buf.pop();
        let line = String::from_utf8(buf).map_err(|_| {
            Error::corrupt_header(path, format!("header line {} is not UTF-8", idx + 1))
        })?;
        lines.push(line);
    }

    let [recipe, count, width]: [String; HEADER_LINES] = lines
        .try_into()
        .map_err(|_| Error::corrupt_header(path, "header line count mismatch"))?;

    if recipe.is_empty() {
        return Err(Error::corrupt_header(path, "empty recipe field"));
    }
    let line_count = count
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::corrupt_header(path, format!("non-numeric line count {count:?}")))?;
    let width = width
        .trim()
        .parse::<u16>()
        .map_err(|_| Error::corrupt_header(path, format!("non-numeric width {width:?}")))?;

    Ok(Header {
        recipe,
        line_count,
        width,
    })
}

/// Count content lines. Every `\n` ends a line, and a non-empty tail without
/// a trailing newline counts as one more line.
pub fn count_lines<R: Read>(mut reader: R) -> io::Result<u64> {
    let mut buf = [0u8; 64 * 1024];
    let mut count = 0u64;
    let mut last = None;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        count += buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
        last = Some(buf[n - 1]);
    }
    if matches!(last, Some(b) if b != b'\n') {
        count += 1;
    }
    Ok(count)
}
