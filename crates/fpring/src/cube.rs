//! Validated spectral cube.

use ndarray::{stack, Array2, Array3, ArrayD, ArrayView2, Axis, Ix3};

use crate::error::{FpError, FpResult};

/// Stack of interferogram planes, shape `(planes, rows, cols)`, every axis
/// non-empty and every sample finite.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Cube {
    data: Array3<f64>,
}

impl Cube {
    pub fn new(data: Array3<f64>) -> FpResult<Self> {
        if data.shape().iter().any(|&n| n == 0) {
            return Err(FpError::Shape {
                expected: 3,
                got: data.shape().to_vec(),
            });
        }
        if let Some(((p, r, c), v)) = data.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(FpError::InvalidInput(format!(
                "sample at plane {p}, row {r}, col {c} is {v}"
            )));
        }
        Ok(Self { data })
    }

    /// Accept a dynamically shaped array only when it is 3-D.
    pub fn from_dyn(data: ArrayD<f64>) -> FpResult<Self> {
        let shape = data.shape().to_vec();
        let data = data
            .into_dimensionality::<Ix3>()
            .map_err(|_| FpError::Shape {
                expected: 3,
                got: shape,
            })?;
        Self::new(data)
    }

    /// Stack equally shaped planes in order.
    pub fn from_planes(planes: &[Array2<f64>]) -> FpResult<Self> {
        let Some(first) = planes.first() else {
            return Err(FpError::Shape {
                expected: 3,
                got: vec![0],
            });
        };
        if let Some(bad) = planes.iter().find(|p| p.dim() != first.dim()) {
            return Err(FpError::InvalidInput(format!(
                "plane shape {:?} differs from first plane {:?}",
                bad.shape(),
                first.shape()
            )));
        }
        let views: Vec<ArrayView2<f64>> = planes.iter().map(Array2::view).collect();
        let data = stack(Axis(0), &views).map_err(|e| FpError::InvalidInput(e.to_string()))?;
        Self::new(data)
    }

    pub fn planes(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// `(rows, cols)` of every plane.
    pub fn plane_dim(&self) -> (usize, usize) {
        let (_, rows, cols) = self.data.dim();
        (rows, cols)
    }

    pub fn plane(&self, index: usize) -> FpResult<ArrayView2<'_, f64>> {
        if index >= self.planes() {
            return Err(FpError::PlaneOutOfRange {
                index,
                planes: self.planes(),
            });
        }
        Ok(self.data.index_axis(Axis(0), index))
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }
}

impl TryFrom<Array3<f64>> for Cube {
    type Error = FpError;

    fn try_from(data: Array3<f64>) -> FpResult<Self> {
        Cube::new(data)
    }
}
