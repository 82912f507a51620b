//! Dense row-major matrix used for factor tables.

/// A 2D matrix stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    data: Vec<T>,
    rows: usize,
    cols: usize,
}

impl<T: Copy> Matrix<T> {
    /// Returns `None` when `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Option<Self> {
        (rows.checked_mul(cols)? == data.len()).then_some(Matrix { data, rows, cols })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn n_rows(&self) -> usize {
        self.rows
    }

    pub fn n_cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, idx: usize) -> &[T] {
        let start = idx * self.cols;
        &self.data[start..start + self.cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[T]> + '_ {
        // chunks_exact(0) would panic on zero-width matrices
        (0..self.rows).map(move |r| self.row(r))
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn transpose(&self) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for c in 0..self.cols {
            for r in 0..self.rows {
                data.push(self.data[r * self.cols + c]);
            }
        }
        Matrix {
            data,
            rows: self.cols,
            cols: self.rows,
        }
    }

    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> Matrix<U> {
        Matrix {
            data: self.data.iter().map(|&x| f(x)).collect(),
            rows: self.rows,
            cols: self.cols,
        }
    }
}

impl Matrix<f64> {
    pub fn to_f32(&self) -> Matrix<f32> {
        self.map(|x| x as f32)
    }
}

impl Matrix<f32> {
    /// Copy with every row scaled to unit length; `eps` is added to each norm.
    pub fn normalize_rows(&self, eps: f32) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for row in self.rows() {
            let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt() + eps;
            data.extend(row.iter().map(|x| x / norm));
        }
        Matrix {
            data,
            rows: self.rows,
            cols: self.cols,
        }
    }
}
