//! Pure validation rules: sheet names, table names, range references, and
//! the workbook format table.
//!
//! Everything here runs before any boundary crossing, so a bad name or range
//! never reaches the host.

use std::path::Path;

use lazy_regex::{regex, regex_is_match};

use crate::error::{Error, Result};

/// Characters the host forbids in sheet names.
pub const FORBIDDEN_SHEET_CHARS: &[char] = &['\\', '/', '*', '?', ':', '[', ']'];

/// Maximum sheet name length.
pub const MAX_SHEET_NAME_LEN: usize = 31;

/// Maximum table name length.
pub const MAX_TABLE_NAME_LEN: usize = 255;

/// Sheet name rule: non-empty, at most 31 characters, none of `\ / * ? : [ ]`.
pub fn validate_sheet_name(name: &str) -> Result<()> {
    let invalid = |reason: String| Error::SheetNameInvalid {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty".to_string()));
    }
    if name.chars().count() > MAX_SHEET_NAME_LEN {
        return Err(invalid(format!(
            "name is longer than {MAX_SHEET_NAME_LEN} characters"
        )));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_SHEET_CHARS.contains(c)) {
        return Err(invalid(format!("name contains forbidden character '{c}'")));
    }
    Ok(())
}

/// Table name rule: non-empty, at most 255 characters, leading letter or
/// underscore, then alphanumerics and underscores, and never a grid-cell
/// label like `A1` or `R1C1`.
pub fn validate_table_name(name: &str) -> Result<()> {
    let invalid = |reason: String| Error::TableNameInvalid {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty".to_string()));
    }
    if name.chars().count() > MAX_TABLE_NAME_LEN {
        return Err(invalid(format!(
            "name is longer than {MAX_TABLE_NAME_LEN} characters"
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or_default();
    if !(first.is_alphabetic() || first == '_') {
        return Err(invalid(
            "name must start with a letter or underscore".to_string(),
        ));
    }
    if let Some(c) = chars.find(|c| !(c.is_alphanumeric() || *c == '_')) {
        return Err(invalid(format!("name contains forbidden character '{c}'")));
    }
    if regex_is_match!(r"^[A-Z]+\d+$", name) || regex_is_match!(r"^[rR]\d+[cC]\d+$", name) {
        return Err(invalid("name looks like a cell reference".to_string()));
    }
    Ok(())
}

/// A normalized rectangular range, 1-based and inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub row1: u32,
    pub col1: u32,
    pub row2: u32,
    pub col2: u32,
}

impl Rect {
    pub fn new(row1: u32, col1: u32, row2: u32, col2: u32) -> Self {
        Self {
            row1: row1.min(row2),
            col1: col1.min(col2),
            row2: row1.max(row2),
            col2: col1.max(col2),
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.row1 <= other.row2
            && other.row1 <= self.row2
            && self.col1 <= other.col2
            && other.col1 <= self.col2
    }

    pub fn rows(&self) -> u32 {
        self.row2 - self.row1 + 1
    }

    pub fn cols(&self) -> u32 {
        self.col2 - self.col1 + 1
    }

    /// Render in A1 form, e.g. `A1:D10`.
    pub fn to_a1(&self) -> String {
        format!(
            "{}{}:{}{}",
            col_letters(self.col1),
            self.row1,
            col_letters(self.col2),
            self.row2
        )
    }
}

/// A parsed range reference: optional sheet qualifier plus the rectangle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRef {
    pub sheet: Option<String>,
    pub rect: Rect,
}

/// Parse a range reference per the table range rule.
///
/// Accepts an optional `<sheet>!` or `'<sheet name>'!` prefix; `$` absolute
/// markers are stripped; the remainder must be an `A1:A1` pair or its
/// `R1C1:R1C1` equivalent.
pub fn parse_range(reference: &str) -> Result<RangeRef> {
    let invalid = |reason: &str| Error::TableRangeInvalid {
        reference: reference.to_string(),
        reason: reason.to_string(),
    };

    if reference.trim().is_empty() {
        return Err(invalid("reference is empty"));
    }

    let (sheet, body) = match reference.rsplit_once('!') {
        Some((prefix, body)) => {
            let prefix = prefix.trim();
            let name = if prefix.len() >= 2 && prefix.starts_with('\'') && prefix.ends_with('\'') {
                &prefix[1..prefix.len() - 1]
            } else {
                prefix
            };
            if name.is_empty() {
                return Err(invalid("sheet qualifier is empty"));
            }
            (Some(name.to_string()), body)
        }
        None => (None, reference),
    };

    let body: String = body.chars().filter(|c| *c != '$').collect();

    let a1 = regex!(r"^([A-Z]+)(\d+):([A-Z]+)(\d+)$");
    if let Some(caps) = a1.captures(&body) {
        let col1 = letters_to_col(&caps[1]).ok_or_else(|| invalid("column out of range"))?;
        let col2 = letters_to_col(&caps[3]).ok_or_else(|| invalid("column out of range"))?;
        let row1: u32 = caps[2].parse().map_err(|_| invalid("row out of range"))?;
        let row2: u32 = caps[4].parse().map_err(|_| invalid("row out of range"))?;
        if row1 == 0 || row2 == 0 {
            return Err(invalid("rows are 1-based"));
        }
        return Ok(RangeRef {
            sheet,
            rect: Rect::new(row1, col1, row2, col2),
        });
    }

    let r1c1 = regex!(r"^[rR](\d+)[cC](\d+):[rR](\d+)[cC](\d+)$");
    if let Some(caps) = r1c1.captures(&body) {
        let row1: u32 = caps[1].parse().map_err(|_| invalid("row out of range"))?;
        let col1: u32 = caps[2].parse().map_err(|_| invalid("column out of range"))?;
        let row2: u32 = caps[3].parse().map_err(|_| invalid("row out of range"))?;
        let col2: u32 = caps[4].parse().map_err(|_| invalid("column out of range"))?;
        if row1 == 0 || col1 == 0 || row2 == 0 || col2 == 0 {
            return Err(invalid("rows and columns are 1-based"));
        }
        return Ok(RangeRef {
            sheet,
            rect: Rect::new(row1, col1, row2, col2),
        });
    }

    Err(invalid(
        "expected a rectangular reference such as A1:D10 or R1C1:R10C4",
    ))
}

/// Convert column letters to a 1-based index (`A` = 1, `AA` = 27).
pub fn letters_to_col(letters: &str) -> Option<u32> {
    let mut col: u32 = 0;
    for c in letters.chars() {
        let digit = (c.to_ascii_uppercase() as u32).checked_sub('A' as u32)? + 1;
        if digit > 26 {
            return None;
        }
        col = col.checked_mul(26)?.checked_add(digit)?;
    }
    if col == 0 || col > 16_384 {
        return None;
    }
    Some(col)
}

/// Convert a 1-based column index to letters.
pub fn col_letters(mut col: u32) -> String {
    let mut out = Vec::new();
    while col > 0 {
        let rem = ((col - 1) % 26) as u8;
        out.push(b'A' + rem);
        col = (col - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// The host's numeric file format identifier for a workbook path.
///
/// These codes must match the host's `XlFileFormat` values exactly.
pub fn file_format(path: &Path) -> Result<i32> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "xlsx" => Ok(51),
        "xlsm" => Ok(52),
        "xls" => Ok(56),
        "xlsb" => Ok(50),
        "xltx" => Ok(54),
        _ => Err(Error::WorkbookFormatUnknown {
            path: path.to_path_buf(),
        }),
    }
}

/// Whether a workbook at this path can hold VBA code. Only `.xlsx` denies it.
pub fn supports_vba(path: &Path) -> bool {
    !matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(ext) if ext.eq_ignore_ascii_case("xlsx")
    )
}
