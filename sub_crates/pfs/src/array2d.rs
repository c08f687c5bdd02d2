use std::ops::{Index, IndexMut};

/// A rectangular region of an image, in pixels.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Rect {
        Rect {
            x: x,
            y: y,
            width: width,
            height: height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A dense, row-major 2D array.
///
/// Indexing with `(x, y)` addresses column `x` of row `y`.  Indexing
/// with a single `usize` addresses the flat buffer directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Array2D<T> {
    cols: usize,
    rows: usize,
    data: Vec<T>,
}

pub type Array2Df = Array2D<f32>;

impl<T: Copy + Default> Array2D<T> {
    /// Creates a `cols` x `rows` array filled with `T::default()`.
    pub fn new(cols: usize, rows: usize) -> Array2D<T> {
        Array2D {
            cols: cols,
            rows: rows,
            data: vec![T::default(); cols * rows],
        }
    }

    pub fn filled(cols: usize, rows: usize, value: T) -> Array2D<T> {
        Array2D {
            cols: cols,
            rows: rows,
            data: vec![value; cols * rows],
        }
    }

    /// Wraps an existing row-major buffer.
    ///
    /// Panics if `data.len() != cols * rows`.
    pub fn from_vec(cols: usize, rows: usize, data: Vec<T>) -> Array2D<T> {
        assert_eq!(data.len(), cols * rows);
        Array2D {
            cols: cols,
            rows: rows,
            data: data,
        }
    }

    pub fn fill(&mut self, value: T) {
        for v in self.data.iter_mut() {
            *v = value;
        }
    }

    /// Returns a copy moved by `(dx, dy)` pixels.
    ///
    /// `out(x, y) = self(x - dx, y - dy)`.  Pixels uncovered by the
    /// move are set to `T::default()`.
    pub fn shifted(&self, dx: i32, dy: i32) -> Array2D<T> {
        let mut out = Array2D::new(self.cols, self.rows);
        let (w, h) = (self.cols as i64, self.rows as i64);
        for y in 0..h {
            let sy = y - dy as i64;
            if sy < 0 || sy >= h {
                continue;
            }
            for x in 0..w {
                let sx = x - dx as i64;
                if sx < 0 || sx >= w {
                    continue;
                }
                out.data[(y * w + x) as usize] = self.data[(sy * w + sx) as usize];
            }
        }
        out
    }

    /// Returns the sub-array covered by `rect`.
    ///
    /// Panics if `rect` doesn't lie within the array.
    pub fn cropped(&self, rect: Rect) -> Array2D<T> {
        assert!(rect.x + rect.width <= self.cols && rect.y + rect.height <= self.rows);
        let mut data = Vec::with_capacity(rect.width * rect.height);
        for y in rect.y..(rect.y + rect.height) {
            let start = y * self.cols + rect.x;
            data.extend_from_slice(&self.data[start..(start + rect.width)]);
        }
        Array2D {
            cols: rect.width,
            rows: rect.height,
            data: data,
        }
    }
}

impl<T> Array2D<T> {
    #[inline(always)]
    pub fn width(&self) -> usize {
        self.cols
    }

    #[inline(always)]
    pub fn height(&self) -> usize {
        self.rows
    }

    #[inline(always)]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn row(&self, y: usize) -> &[T] {
        &self.data[(y * self.cols)..((y + 1) * self.cols)]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        &mut self.data[(y * self.cols)..((y + 1) * self.cols)]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.data.iter_mut()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

impl<T> Index<(usize, usize)> for Array2D<T> {
    type Output = T;

    #[inline(always)]
    fn index(&self, (x, y): (usize, usize)) -> &T {
        debug_assert!(x < self.cols && y < self.rows);
        &self.data[y * self.cols + x]
    }
}

impl<T> IndexMut<(usize, usize)> for Array2D<T> {
    #[inline(always)]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut T {
        debug_assert!(x < self.cols && y < self.rows);
        &mut self.data[y * self.cols + x]
    }
}

impl<T> Index<usize> for Array2D<T> {
    type Output = T;

    #[inline(always)]
    fn index(&self, i: usize) -> &T {
        &self.data[i]
    }
}

impl<T> IndexMut<usize> for Array2D<T> {
    #[inline(always)]
    fn index_mut(&mut self, i: usize) -> &mut T {
        &mut self.data[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(w: usize, h: usize) -> Array2Df {
        Array2D::from_vec(w, h, (0..(w * h)).map(|i| i as f32).collect())
    }

    #[test]
    fn index_is_row_major() {
        let a = ramp(4, 3);
        assert_eq!(a[(0, 0)], 0.0);
        assert_eq!(a[(3, 0)], 3.0);
        assert_eq!(a[(0, 1)], 4.0);
        assert_eq!(a[(2, 2)], 10.0);
        assert_eq!(a.row(1), &[4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn shift_positive() {
        let a = ramp(3, 3);
        let s = a.shifted(1, 1);
        assert_eq!(s.row(0), &[0.0, 0.0, 0.0]);
        assert_eq!(s.row(1), &[0.0, 0.0, 1.0]);
        assert_eq!(s.row(2), &[0.0, 3.0, 4.0]);
    }

    #[test]
    fn shift_negative() {
        let a = ramp(3, 2);
        let s = a.shifted(-1, 0);
        assert_eq!(s.row(0), &[1.0, 2.0, 0.0]);
        assert_eq!(s.row(1), &[4.0, 5.0, 0.0]);
    }

    #[test]
    fn crop() {
        let a = ramp(4, 4);
        let c = a.cropped(Rect::new(1, 2, 2, 2));
        assert_eq!(c.dimensions(), (2, 2));
        assert_eq!(c.as_slice(), &[9.0, 10.0, 13.0, 14.0]);
    }
}
