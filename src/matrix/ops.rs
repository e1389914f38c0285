//! # Matrix Operations
//!
//! `ndarray` implementation of [`MatrixOps`] plus the scalar helpers shared by
//! the solver and the updater.

use super::{MatrixOps, Scalar};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix2};

/// Proximal operator of `lambda·|v|`: `sign(v)·max(|v| − lambda, 0)`.
///
/// A negative `lambda` is treated as zero; shrinking by a negative amount would
/// inflate the value instead.
#[inline]
pub fn soft_threshold(value: Scalar, lambda: Scalar) -> Scalar {
    let shrunk = value.abs() - lambda.max(0.0);
    if shrunk > 0.0 {
        shrunk.copysign(value)
    } else {
        0.0
    }
}

/// L2 norm of a vector view.
#[inline]
pub fn l2_norm(v: ArrayView1<'_, Scalar>) -> Scalar {
    v.dot(&v).sqrt()
}

/// L2 distance between two equally sized vectors.
pub fn l2_distance(a: ArrayView1<'_, Scalar>, b: ArrayView1<'_, Scalar>) -> Scalar {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<Scalar>()
        .sqrt()
}

impl<S> MatrixOps for ArrayBase<S, Ix2>
where
    S: Data<Elem = Scalar>,
{
    fn multiply(&self, rhs: &Array2<Scalar>) -> Array2<Scalar> {
        self.dot(rhs)
    }

    fn transposed(&self) -> Array2<Scalar> {
        self.t().to_owned()
    }

    fn frobenius_norm(&self) -> Scalar {
        self.iter().map(|v| v * v).sum::<Scalar>().sqrt()
    }

    fn column_norms(&self) -> Array1<Scalar> {
        self.axis_iter(Axis(1)).map(l2_norm).collect()
    }

    fn soft_threshold(&self, lambda: Scalar) -> Array2<Scalar> {
        self.mapv(|v| soft_threshold(v, lambda))
    }
}
