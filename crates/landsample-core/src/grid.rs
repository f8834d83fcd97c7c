//! Grid Partitioner: cut an extent into equal rectangular cells.
//!
//! Cells are emitted row-major, rows counted upward from `ymin`. The last row
//! and column are clamped to the extent so the cells tile it exactly.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::extent::Extent;

/// One cell of a partition. `row` and `col` are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub row: usize,
    pub col: usize,
    pub extent: Extent,
    /// Area of the cell covered by the region. Equals the cell area until the
    /// coverage filter replaces it with the true intersection area.
    pub coverage_area: f64,
}

impl GridCell {
    /// Grid position such as `R1C3`.
    pub fn label(&self) -> String {
        format!("R{}C{}", self.row, self.col)
    }

    pub fn coverage_ratio(&self) -> f64 {
        self.coverage_area / self.extent.area()
    }
}

/// Column/row layout chosen for a requested number of sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    pub cols: usize,
    pub rows: usize,
    /// Cells actually emitted; trailing cells beyond this are trimmed.
    pub cells: usize,
}

impl GridLayout {
    /// Near-square layout for `n` sections: 2×2 up to 4, 3×2 up to 6, 3×3 up
    /// to 9, otherwise 4×3 (capped at 12 cells).
    pub fn for_section_count(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(Error::invalid_extent("section count must be at least 1"));
        }
        let (cols, rows) = match n {
            0..=4 => (2, 2),
            5..=6 => (3, 2),
            7..=9 => (3, 3),
            _ => (4, 3),
        };
        Ok(Self { cols, rows, cells: n.min(cols * rows) })
    }
}

/// Boundary `i` of `n` equal divisions of `[lo, hi]`; the last one is `hi`
/// exactly so accumulated rounding never overshoots the extent.
#[inline]
fn edge(lo: f64, hi: f64, step: f64, i: usize, n: usize) -> f64 {
    if i >= n {
        hi
    } else {
        lo + i as f64 * step
    }
}

/// Split `extent` into `rows × cols` equal cells.
pub fn partition(extent: &Extent, rows: usize, cols: usize) -> Result<Vec<GridCell>> {
    if rows == 0 || cols == 0 {
        return Err(Error::invalid_extent(format!(
            "grid must have at least one row and column (rows {rows}, cols {cols})"
        )));
    }
    extent.validate()?;

    let cw = extent.width() / cols as f64;
    let ch = extent.height() / rows as f64;
    debug!(rows, cols, cell_width = cw, cell_height = ch, "partitioning extent");

    let mut cells = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        let y0 = edge(extent.ymin, extent.ymax, ch, r, rows);
        let y1 = edge(extent.ymin, extent.ymax, ch, r + 1, rows);
        for c in 0..cols {
            let x0 = edge(extent.xmin, extent.xmax, cw, c, cols);
            let x1 = edge(extent.xmin, extent.xmax, cw, c + 1, cols);
            let cell_extent = Extent { xmin: x0, ymin: y0, xmax: x1, ymax: y1 };
            cells.push(GridCell {
                row: r + 1,
                col: c + 1,
                extent: cell_extent,
                coverage_area: cell_extent.area(),
            });
        }
    }
    Ok(cells)
}

/// Partition into `n` sections using [`GridLayout::for_section_count`],
/// dropping trailing cells when the layout holds more than `n`.
pub fn partition_sections(extent: &Extent, n: usize) -> Result<(GridLayout, Vec<GridCell>)> {
    let layout = GridLayout::for_section_count(n)?;
    let mut cells = partition(extent, layout.rows, layout.cols)?;
    cells.truncate(layout.cells);
    debug!(
        cols = layout.cols,
        rows = layout.rows,
        sections = cells.len(),
        "section layout chosen"
    );
    Ok((layout, cells))
}

/// Tiles of `step` needed to span `span`. A quotient a rounding error above
/// an integer must not add an empty trailing tile.
fn tile_count(span: f64, step: f64) -> usize {
    let q = span / step;
    let n = q.round();
    if (q - n).abs() <= n * 1e-9 {
        (n as usize).max(1)
    } else {
        (q.ceil() as usize).max(1)
    }
}

/// Tile `extent` with cells of a fixed nominal size. The last row and column
/// are shortened to end at the extent.
pub fn partition_by_tile_size(extent: &Extent, tile_width: f64, tile_height: f64) -> Result<Vec<GridCell>> {
    if !(tile_width > 0.0 && tile_height > 0.0) || !tile_width.is_finite() || !tile_height.is_finite() {
        return Err(Error::invalid_extent(format!(
            "tile size must be positive (got {tile_width} x {tile_height})"
        )));
    }
    extent.validate()?;

    let cols = tile_count(extent.width(), tile_width);
    let rows = tile_count(extent.height(), tile_height);
    debug!(rows, cols, tile_width, tile_height, "tiling extent");

    let mut cells = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        let y0 = extent.ymin + r as f64 * tile_height;
        let y1 = if r + 1 == rows { extent.ymax } else { extent.ymin + (r + 1) as f64 * tile_height };
        for c in 0..cols {
            let x0 = extent.xmin + c as f64 * tile_width;
            let x1 = if c + 1 == cols { extent.xmax } else { extent.xmin + (c + 1) as f64 * tile_width };
            let cell_extent = Extent { xmin: x0, ymin: y0, xmax: x1.min(extent.xmax), ymax: y1.min(extent.ymax) };
            cells.push(GridCell {
                row: r + 1,
                col: c + 1,
                extent: cell_extent,
                coverage_area: cell_extent.area(),
            });
        }
    }
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn layout_heuristic() {
        let cases = [(1, (2, 2, 1)), (4, (2, 2, 4)), (5, (3, 2, 5)), (6, (3, 2, 6)), (8, (3, 3, 8)), (9, (3, 3, 9)), (10, (4, 3, 10)), (20, (4, 3, 12))];
        for (n, (cols, rows, cells)) in cases {
            let layout = GridLayout::for_section_count(n).unwrap();
            assert_eq!((layout.cols, layout.rows, layout.cells), (cols, rows, cells), "n = {n}");
        }
        assert!(GridLayout::for_section_count(0).is_err());
    }

    #[test]
    fn zero_rows_or_cols_rejected() {
        let e = Extent::new(0.0, 0.0, 10.0, 10.0).unwrap();
        assert!(matches!(partition(&e, 0, 3), Err(Error::InvalidExtent { .. })));
        assert!(matches!(partition(&e, 3, 0), Err(Error::InvalidExtent { .. })));
    }

    #[test]
    fn degenerate_extent_rejected() {
        let flat = Extent { xmin: 0.0, ymin: 5.0, xmax: 10.0, ymax: 5.0 };
        assert!(matches!(partition(&flat, 2, 2), Err(Error::InvalidExtent { .. })));
    }

    #[test]
    fn last_cells_clamped_to_extent() {
        let e = Extent::new(0.1, 0.2, 1000.3, 777.7).unwrap();
        let cells = partition(&e, 7, 13).unwrap();
        assert_eq!(cells.len(), 91);
        for cell in &cells {
            if cell.col == 13 {
                assert_eq!(cell.extent.xmax, e.xmax);
            }
            if cell.row == 7 {
                assert_eq!(cell.extent.ymax, e.ymax);
            }
        }
    }

    #[test]
    fn neighbours_share_edges_exactly() {
        let e = Extent::new(-123.456, 42.0, 987.654, 1234.5).unwrap();
        let cells = partition(&e, 5, 6).unwrap();
        for pair in cells.windows(2) {
            if pair[0].row == pair[1].row {
                assert_eq!(pair[0].extent.xmax, pair[1].extent.xmin);
            }
        }
        for cell in cells.iter().filter(|c| c.row > 1) {
            let below = &cells[(cell.row - 2) * 6 + (cell.col - 1)];
            assert_eq!(below.extent.ymax, cell.extent.ymin);
        }
    }

    #[test]
    fn partition_sections_trims_trailing_cells() {
        let e = Extent::new(0.0, 0.0, 300.0, 200.0).unwrap();
        let (layout, cells) = partition_sections(&e, 5).unwrap();
        assert_eq!((layout.cols, layout.rows), (3, 2));
        assert_eq!(cells.len(), 5);
        assert_eq!(cells.last().unwrap().label(), "R2C2");
    }

    #[test]
    fn tile_size_partition_clamps_remainder() {
        let e = Extent::new(0.0, 0.0, 5200.0, 3000.0).unwrap();
        let cells = partition_by_tile_size(&e, 2000.0, 2000.0).unwrap();
        assert_eq!(cells.len(), 3 * 2);
        let last = cells.last().unwrap();
        assert_eq!((last.row, last.col), (2, 3));
        assert_eq!(last.extent.xmax, 5200.0);
        assert_eq!(last.extent.ymax, 3000.0);
        assert_relative_eq!(last.extent.width(), 1200.0);
        let total: f64 = cells.iter().map(|c| c.extent.area()).sum();
        assert_relative_eq!(total, e.area(), max_relative = 1e-12);
    }

    #[test]
    fn tile_size_rounding_adds_no_empty_cell() {
        // 0.1 * 3.0 / 0.1 lands just above 3.
        let e = Extent::new(0.0, 0.0, 0.1 * 3.0, 1.0).unwrap();
        let cells = partition_by_tile_size(&e, 0.1, 1.0).unwrap();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells.last().unwrap().label(), "R1C3");
        for c in &cells {
            assert!(c.extent.validate().is_ok(), "{} is degenerate", c.label());
        }
        assert_eq!(tile_count(10.0, 4.0), 3);
        assert_eq!(tile_count(0.5, 4.0), 1);
    }

    #[test]
    fn tile_size_must_be_positive() {
        let e = Extent::new(0.0, 0.0, 10.0, 10.0).unwrap();
        assert!(partition_by_tile_size(&e, 0.0, 5.0).is_err());
        assert!(partition_by_tile_size(&e, 5.0, -1.0).is_err());
    }
}
