//! Text table output for `list` and `find`.

use std::fmt;

/// A table of rendered cells with one header per requested column.
#[derive(Debug, Clone, Default)]
pub struct TextTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TextTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, cells: Vec<String>) {
        debug_assert_eq!(cells.len(), self.columns.len());
        self.rows.push(cells);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }
}

impl fmt::Display for TextTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.len()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.len());
            }
        }
        let write_row = |f: &mut fmt::Formatter, cells: &[String]| -> fmt::Result {
            let mut line = String::new();
            for (i, cell) in cells.iter().enumerate() {
                if i > 0 {
                    line.push_str("  ");
                }
                line.push_str(cell);
                let pad = widths[i].saturating_sub(cell.len());
                if i + 1 < cells.len() {
                    line.extend(std::iter::repeat(' ').take(pad));
                }
            }
            writeln!(f, "{}", line.trim_end())
        };
        write_row(f, &self.columns)?;
        let dashes: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        write_row(f, &dashes)?;
        for row in &self.rows {
            write_row(f, row)?;
        }
        Ok(())
    }
}
