//! Row-major n-dimensional array of profiles.
//!
//! Propagated profiles move between a flat `(Nphi, Z·Y)` layout, a structured
//! `(Nphi, Z, Y)` layout and reduced `(Nphi, Y)` readouts. Every such change goes
//! through a checked, named operation here instead of an implicit view change.
//! The last axis is contiguous: the element at index `[i0, …, ik]` lives at
//! `Σ i_a·stride_a` with `stride_last = 1`.

use super::propagator_error::PropagatorError;
use nalgebra::DVector;

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileTensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

fn volume(shape: &[usize]) -> usize {
    shape.iter().product()
}

impl ProfileTensor {
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; volume(shape)],
        }
    }

    pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Result<Self, PropagatorError> {
        if volume(shape) != data.len() {
            return Err(PropagatorError::ShapeMismatch(format!(
                "{} values can't fill shape {:?}",
                data.len(),
                shape
            )));
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// Stacks equally long vectors as the rows of a `(n, len)` tensor
    pub fn from_rows(rows: &[DVector<f64>]) -> Result<Self, PropagatorError> {
        let len = rows.first().map_or(0, |row| row.len());
        let mut data = Vec::with_capacity(rows.len() * len);
        for row in rows {
            if row.len() != len {
                return Err(PropagatorError::ShapeMismatch(format!(
                    "row of length {} among rows of length {}",
                    row.len(),
                    len
                )));
            }
            data.extend(row.iter());
        }
        Self::from_vec(&[rows.len(), len], data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.shape.len()];
        for a in (0..self.shape.len().saturating_sub(1)).rev() {
            strides[a] = strides[a + 1] * self.shape[a + 1];
        }
        strides
    }

    fn offset(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for ((i, n), s) in index.iter().zip(&self.shape).zip(self.strides()) {
            if i >= n {
                return None;
            }
            offset += i * s;
        }
        Some(offset)
    }

    pub fn get(&self, index: &[usize]) -> Option<f64> {
        self.offset(index).map(|o| self.data[o])
    }

    pub fn get_mut(&mut self, index: &[usize]) -> Option<&mut f64> {
        self.offset(index).map(move |o| &mut self.data[o])
    }

    /// Same data, new shape of equal volume
    pub fn reshape(self, shape: &[usize]) -> Result<Self, PropagatorError> {
        if volume(shape) != self.data.len() {
            return Err(PropagatorError::ShapeMismatch(format!(
                "can't reshape {:?} into {:?}",
                self.shape, shape
            )));
        }
        Ok(Self {
            shape: shape.to_vec(),
            data: self.data,
        })
    }

    /// Splits the array into `(outer, axis, inner)` extents around `axis`
    fn around(&self, axis: usize) -> (usize, usize, usize) {
        let outer = volume(&self.shape[..axis]);
        let inner = volume(&self.shape[axis + 1..]);
        (outer, self.shape[axis], inner)
    }

    fn check_axis(&self, axis: usize) -> Result<(), PropagatorError> {
        if axis >= self.shape.len() {
            return Err(PropagatorError::ShapeMismatch(format!(
                "axis {} out of range for shape {:?}",
                axis, self.shape
            )));
        }
        Ok(())
    }

    /// Picks index `idx` along `axis`, dropping that axis
    pub fn select(&self, axis: usize, idx: usize) -> Result<Self, PropagatorError> {
        self.check_axis(axis)?;
        let (outer, n, inner) = self.around(axis);
        if idx >= n {
            return Err(PropagatorError::ShapeMismatch(format!(
                "index {} out of range for axis {} of {:?}",
                idx, axis, self.shape
            )));
        }
        let mut data = Vec::with_capacity(outer * inner);
        for o in 0..outer {
            let start = (o * n + idx) * inner;
            data.extend_from_slice(&self.data[start..start + inner]);
        }
        let mut shape = self.shape.clone();
        shape.remove(axis);
        Ok(Self { shape, data })
    }

    /// Sums along `axis`, dropping that axis
    pub fn sum_axis(&self, axis: usize) -> Result<Self, PropagatorError> {
        self.check_axis(axis)?;
        let (outer, n, inner) = self.around(axis);
        let mut data = vec![0.0; outer * inner];
        for o in 0..outer {
            for k in 0..n {
                let start = (o * n + k) * inner;
                for (acc, v) in data[o * inner..(o + 1) * inner]
                    .iter_mut()
                    .zip(&self.data[start..start + inner])
                {
                    *acc += v;
                }
            }
        }
        let mut shape = self.shape.clone();
        shape.remove(axis);
        Ok(Self { shape, data })
    }

    /// Gathers `indices` along `axis`, in that order (repetitions allowed)
    pub fn take(&self, axis: usize, indices: &[usize]) -> Result<Self, PropagatorError> {
        self.check_axis(axis)?;
        let (outer, n, inner) = self.around(axis);
        if let Some(bad) = indices.iter().find(|i| **i >= n) {
            return Err(PropagatorError::ShapeMismatch(format!(
                "index {} out of range for axis {} of {:?}",
                bad, axis, self.shape
            )));
        }
        let mut data = Vec::with_capacity(outer * indices.len() * inner);
        for o in 0..outer {
            for idx in indices {
                let start = (o * n + idx) * inner;
                data.extend_from_slice(&self.data[start..start + inner]);
            }
        }
        let mut shape = self.shape.clone();
        shape[axis] = indices.len();
        Ok(Self { shape, data })
    }

    /// Joins tensors along `axis`; every other extent must agree
    pub fn concat(parts: &[&ProfileTensor], axis: usize) -> Result<Self, PropagatorError> {
        let first = parts
            .first()
            .ok_or_else(|| PropagatorError::ShapeMismatch("nothing to concatenate".to_string()))?;
        first.check_axis(axis)?;
        for part in parts {
            let compatible = part.ndim() == first.ndim()
                && part
                    .shape
                    .iter()
                    .zip(&first.shape)
                    .enumerate()
                    .all(|(a, (x, y))| a == axis || x == y);
            if !compatible {
                return Err(PropagatorError::ShapeMismatch(format!(
                    "can't concatenate {:?} with {:?} along axis {}",
                    part.shape, first.shape, axis
                )));
            }
        }
        let outer = volume(&first.shape[..axis]);
        let inner = volume(&first.shape[axis + 1..]);
        let mut data = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
        for o in 0..outer {
            for part in parts {
                let chunk = part.shape[axis] * inner;
                data.extend_from_slice(&part.data[o * chunk..(o + 1) * chunk]);
            }
        }
        let mut shape = first.shape.clone();
        shape[axis] = parts.iter().map(|p| p.shape[axis]).sum();
        Ok(Self { shape, data })
    }

    /// Stacks equally shaped tensors along a new leading axis
    pub fn stack(parts: &[ProfileTensor]) -> Result<Self, PropagatorError> {
        let first = parts
            .first()
            .ok_or_else(|| PropagatorError::ShapeMismatch("nothing to stack".to_string()))?;
        if let Some(bad) = parts.iter().find(|p| p.shape != first.shape) {
            return Err(PropagatorError::ShapeMismatch(format!(
                "can't stack {:?} with {:?}",
                bad.shape, first.shape
            )));
        }
        let mut shape = vec![parts.len()];
        shape.extend_from_slice(&first.shape);
        let data = parts.iter().flat_map(|p| p.data.iter().copied()).collect();
        Ok(Self { shape, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arange(shape: &[usize]) -> ProfileTensor {
        let n = shape.iter().product::<usize>();
        ProfileTensor::from_vec(shape, (0..n).map(|i| i as f64).collect()).unwrap()
    }

    #[test]
    fn test_row_major_layout() {
        let t = arange(&[2, 3, 4]);
        assert_eq!(t.strides(), vec![12, 4, 1]);
        assert_eq!(t.get(&[1, 2, 3]), Some(23.0));
        assert_eq!(t.get(&[1, 3, 0]), None);
        assert_eq!(t.get(&[1, 2]), None);
    }

    #[test]
    fn test_checked_reshape() {
        let t = arange(&[2, 6]);
        let r = t.clone().reshape(&[2, 2, 3]).unwrap();
        assert_eq!(r.get(&[1, 1, 0]), Some(9.0));
        assert!(t.reshape(&[5, 2]).is_err());
        assert!(ProfileTensor::from_vec(&[2, 2], vec![1.0; 3]).is_err());
    }

    #[test]
    fn test_select_and_sum() {
        let t = arange(&[2, 3, 4]);
        let s = t.select(1, 2).unwrap();
        assert_eq!(s.shape(), &[2, 4]);
        assert_eq!(s.as_slice(), &[8.0, 9.0, 10.0, 11.0, 20.0, 21.0, 22.0, 23.0]);
        let sum = t.sum_axis(1).unwrap();
        assert_eq!(sum.shape(), &[2, 4]);
        assert_eq!(sum.get(&[0, 0]), Some(0.0 + 4.0 + 8.0));
        assert_eq!(sum.get(&[1, 3]), Some(15.0 + 19.0 + 23.0));
        assert!(t.select(3, 0).is_err());
        assert!(t.select(1, 3).is_err());
    }

    #[test]
    fn test_take_and_concat() {
        let t = arange(&[2, 3, 2]);
        let reversed = t.take(1, &[1, 0]).unwrap();
        assert_eq!(reversed.shape(), &[2, 2, 2]);
        assert_eq!(reversed.get(&[0, 0, 1]), Some(3.0));
        let joined = ProfileTensor::concat(&[&t, &reversed], 1).unwrap();
        assert_eq!(joined.shape(), &[2, 5, 2]);
        assert_eq!(joined.get(&[1, 2, 0]), Some(10.0));
        assert_eq!(joined.get(&[1, 3, 0]), Some(8.0));
        assert_eq!(joined.get(&[1, 4, 1]), Some(7.0));
        let other = arange(&[3, 3, 2]);
        assert!(ProfileTensor::concat(&[&t, &other], 1).is_err());
    }

    #[test]
    fn test_stack_and_rows() {
        let rows = vec![DVector::from_vec(vec![1.0, 2.0]), DVector::from_vec(vec![3.0, 4.0])];
        let t = ProfileTensor::from_rows(&rows).unwrap();
        assert_eq!(t.shape(), &[2, 2]);
        let s = ProfileTensor::stack(&[t.clone(), t]).unwrap();
        assert_eq!(s.shape(), &[2, 2, 2]);
        assert_eq!(s.get(&[1, 1, 0]), Some(3.0));
        let ragged = vec![DVector::from_vec(vec![1.0]), DVector::from_vec(vec![3.0, 4.0])];
        assert!(ProfileTensor::from_rows(&ragged).is_err());
    }
}
