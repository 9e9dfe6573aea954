use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::Position;

/// Represents errors that can occur within the grid operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("Coordinates ({x}, {y}) are out of bounds for grid size ({width}, {height})")]
    OutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    },
}

/// The eight compass offsets around a cell, in a fixed order.
pub const NEIGHBOR_OFFSETS_8: [(isize, isize); 8] = [
    (0, 1),
    (0, -1),
    (-1, 0),
    (1, 0),
    (1, 1),
    (-1, 1),
    (1, -1),
    (-1, -1),
];

/// A generic 2D grid structure.
///
/// Stores elements of type `T` in a flat vector using row-major order and
/// addresses them by `(x, y)` or [`Position`]. The dungeon layout is a square
/// `Grid<Cell>`, but nothing here assumes the grid is square.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    cells: Vec<T>,
}

impl<T> Grid<T> {
    /// Creates a new grid with the specified dimensions, filled with default values.
    ///
    /// # Panics
    ///
    /// Panics if `width * height` overflows `usize`.
    pub fn new(width: usize, height: usize) -> Self
    where
        T: Default + Clone,
    {
        let size = width.checked_mul(height).expect("Grid size overflow");
        Grid {
            width,
            height,
            cells: vec![T::default(); size],
        }
    }

    /// Creates a `size` x `size` grid filled with default values.
    pub fn square(size: usize) -> Self
    where
        T: Default + Clone,
    {
        Self::new(size, size)
    }

    /// Returns the width of the grid.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the height of the grid.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn coords_to_index(&self, x: usize, y: usize) -> Option<usize> {
        if self.is_valid(x, y) {
            Some(y * self.width + x)
        } else {
            None
        }
    }

    /// Checks if the given coordinates are within the grid boundaries.
    #[inline]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height
    }

    /// Gets an immutable reference to the cell at the given coordinates.
    ///
    /// Returns `None` if the coordinates are out of bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        let index = self.coords_to_index(x, y)?;
        self.cells.get(index)
    }

    /// Resolves a signed offset from `origin` to an in-bounds position.
    pub fn offset(&self, origin: Position, dx: isize, dy: isize) -> Option<Position> {
        let x = origin.x.checked_add_signed(dx)?;
        let y = origin.y.checked_add_signed(dy)?;
        self.is_valid(x, y).then_some(Position { x, y })
    }

    /// Sets the value of the cell at the given coordinates.
    ///
    /// Returns `Err(GridError::OutOfBounds)` if the coordinates are invalid.
    pub fn set(&mut self, x: usize, y: usize, value: T) -> Result<(), GridError> {
        let index = self.coords_to_index(x, y).ok_or(GridError::OutOfBounds {
            x,
            y,
            width: self.width,
            height: self.height,
        })?;
        self.cells[index] = value;
        Ok(())
    }

    /// Returns an iterator over the cells of the grid in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.cells.iter()
    }

    /// Returns an iterator that yields `(Position, &T)` for each cell.
    pub fn enumerate(&self) -> impl Iterator<Item = (Position, &T)> {
        let width = self.width;
        self.cells.iter().enumerate().map(move |(index, cell)| {
            (
                Position {
                    x: index % width,
                    y: index / width,
                },
                cell,
            )
        })
    }

    /// Positions of every cell matching `predicate`, in row-major order.
    pub fn positions_where<F>(&self, mut predicate: F) -> Vec<Position>
    where
        F: FnMut(&T) -> bool,
    {
        self.enumerate()
            .filter_map(|(pos, cell)| predicate(cell).then_some(pos))
            .collect()
    }
}

impl<T> Index<(usize, usize)> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: (usize, usize)) -> &Self::Output {
        let (x, y) = index;
        match self.coords_to_index(x, y) {
            Some(idx) => &self.cells[idx],
            None => panic!(
                "Grid index ({}, {}) out of bounds for grid size ({}, {})",
                x, y, self.width, self.height
            ),
        }
    }
}

impl<T> IndexMut<(usize, usize)> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, index: (usize, usize)) -> &mut Self::Output {
        let (x, y) = index;
        let (width, height) = (self.width, self.height);
        match self.coords_to_index(x, y) {
            Some(idx) => &mut self.cells[idx],
            None => panic!(
                "Grid index ({}, {}) out of bounds for grid size ({}, {})",
                x, y, width, height
            ),
        }
    }
}

/// Indexing using Position coordinates for access
impl<T> Index<Position> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Position) -> &Self::Output {
        &self[(index.x, index.y)]
    }
}

/// Indexing using Position coordinates for mutable access
impl<T> IndexMut<Position> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, index: Position) -> &mut Self::Output {
        &mut self[(index.x, index.y)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_out_of_bounds_reports_dimensions() {
        let mut grid: Grid<u8> = Grid::new(3, 2);
        assert_eq!(
            grid.set(3, 0, 1),
            Err(GridError::OutOfBounds {
                x: 3,
                y: 0,
                width: 3,
                height: 2
            })
        );
        assert!(grid.set(2, 1, 7).is_ok());
        assert_eq!(grid[(2, 1)], 7);
    }

    #[test]
    fn offset_rejects_negative_and_far_coordinates() {
        let grid: Grid<u8> = Grid::square(4);
        let origin = Position { x: 0, y: 3 };
        assert_eq!(grid.offset(origin, -1, 0), None);
        assert_eq!(grid.offset(origin, 0, 1), None);
        assert_eq!(grid.offset(origin, 1, -1), Some(Position { x: 1, y: 2 }));
    }

    #[test]
    fn enumerate_is_row_major() {
        let mut grid: Grid<u8> = Grid::new(2, 2);
        grid[Position { x: 1, y: 0 }] = 5;
        let found = grid.positions_where(|v| *v == 5);
        assert_eq!(found, vec![Position { x: 1, y: 0 }]);
        let order: Vec<Position> = grid.enumerate().map(|(p, _)| p).collect();
        assert_eq!(order[1], Position { x: 1, y: 0 });
        assert_eq!(order[2], Position { x: 0, y: 1 });
    }
}
