use std::cmp::Ordering;
use std::error::Error;
use std::fmt;

/// InputValueError is used if some simulation option or parameter does not fulfill the posed
/// requirements, e.g., a track without any checkpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct InputValueError {
    pub msg: String,
}

impl InputValueError {
    pub fn new(msg: impl Into<String>) -> InputValueError {
        InputValueError { msg: msg.into() }
    }
}

impl fmt::Display for InputValueError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Invalid input value: {}", self.msg)
    }
}

impl Error for InputValueError {}

#[derive(Debug, Clone, Copy)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// argsort returns the indices that would sort an array. Incomparable values (NaN) are treated
/// as equal.
pub fn argsort<T: PartialOrd>(x: &[T], order: SortOrder) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..x.len()).collect();
    match order {
        SortOrder::Ascending => {
            indices.sort_by(|&a, &b| x[a].partial_cmp(&x[b]).unwrap_or(Ordering::Equal))
        }
        SortOrder::Descending => {
            indices.sort_by(|&a, &b| x[b].partial_cmp(&x[a]).unwrap_or(Ordering::Equal))
        }
    }
    indices
}
