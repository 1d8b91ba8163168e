//! Convergence predicate shared by the EM loop and the SEM rows.
use ndarray::Array1;

/// `true` iff both vectors have the same length and every coordinate differs
/// by strictly less than `tol`.
///
/// Symmetric in `a` and `b`. A NaN coordinate never compares close.
pub fn close_enough(a: &Array1<f64>, b: &Array1<f64>, tol: f64) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < tol)
}

/// Progress of one SEM sensitivity row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Active,
    Done,
}

impl RowStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, RowStatus::Done)
    }
}
