use crate::common::BitDepth;
use aligned_vec::{AVec, ConstAlign};
use std::ops::Index;

pub(crate) const ALIGN: usize = 64;

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("indices ({0}, {1}, {2}) out of bounds")]
    IndicesOutOfBounds(usize, usize, usize),
    #[error("dimension mismatch: expected {expected} elements, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("stride ({sx}, {sy}) is smaller than dimensions ({nx}, {ny})")]
    StrideTooSmall {
        nx: usize,
        ny: usize,
        sx: usize,
        sy: usize,
    },
    #[error("brick has no voxels")]
    EmptyBrick,
    #[error("planes of brick {0} have different dimensions or strides")]
    PlaneMismatch(u32),
    #[error("bit depth of brick {0} differs from the rest of the volume")]
    BitDepthMismatch(u32),
}

/// Dense 3D array with row (`sx`) and plane (`sy`) strides.
///
/// The logical extent is `nx * ny * nz`, anything between the logical extent and the strides is
/// padding which is never read by the analysis.
#[derive(Debug, Clone)]
pub struct Array3D<T> {
    pub data: AVec<T, ConstAlign<ALIGN>>,
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Elements per row in memory.
    pub sx: usize,
    /// Rows per plane in memory.
    pub sy: usize,
}

impl<T> Array3D<T> {
    pub fn from_slice(data: &[T], nx: usize, ny: usize, nz: usize) -> Result<Self, Error>
    where
        T: Clone,
    {
        Self::from_slice_strided(data, nx, ny, nz, nx, ny)
    }

    pub fn from_slice_strided(
        data: &[T],
        nx: usize,
        ny: usize,
        nz: usize,
        sx: usize,
        sy: usize,
    ) -> Result<Self, Error>
    where
        T: Clone,
    {
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(Error::EmptyBrick);
        }
        if sx < nx || sy < ny {
            return Err(Error::StrideTooSmall { nx, ny, sx, sy });
        }
        if data.len() != sx * sy * nz {
            return Err(Error::DimensionMismatch {
                expected: sx * sy * nz,
                found: data.len(),
            });
        }
        Ok(Self {
            data: AVec::from_slice(ALIGN, data),
            nx,
            ny,
            nz,
            sx,
            sy,
        })
    }

    pub fn from_fill(value: T, nx: usize, ny: usize, nz: usize) -> Self
    where
        T: Clone + Copy,
    {
        let data: AVec<T, ConstAlign<ALIGN>> =
            AVec::from_iter(ALIGN, (0..nx * ny * nz).map(|_| value));
        Self {
            data,
            nx,
            ny,
            nz,
            sx: nx,
            sy: ny,
        }
    }

    /// Number of voxels in the logical extent.
    pub fn len(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn get_index(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(
            i < self.nx && j < self.ny && k < self.nz,
            "Index ({i}, {j}, {k}) is out of bounds ({}, {}, {})",
            self.nx,
            self.ny,
            self.nz
        );
        self.sx * self.sy * k + self.sx * j + i
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> Result<&T, Error> {
        if i >= self.nx || j >= self.ny || k >= self.nz {
            return Err(Error::IndicesOutOfBounds(i, j, k));
        }
        Ok(&self.data[self.get_index(i, j, k)])
    }

    /// Logical part of row `j` in plane `k`.
    #[inline(always)]
    pub fn get_row(&self, j: usize, k: usize) -> &[T] {
        let start = self.get_index(0, j, k);
        &self.data[start..start + self.nx]
    }

    /// Same extent and memory layout.
    pub fn same_layout<U>(&self, other: &Array3D<U>) -> bool {
        self.nx == other.nx
            && self.ny == other.ny
            && self.nz == other.nz
            && self.sx == other.sx
            && self.sy == other.sy
    }

}

impl<T> Index<(usize, usize, usize)> for Array3D<T> {
    type Output = T;
    fn index(&self, (i, j, k): (usize, usize, usize)) -> &Self::Output {
        &self.data[self.get_index(i, j, k)]
    }
}

/// Intensity plane of a brick.
#[derive(Debug, Clone)]
pub enum Intensity {
    U8(Array3D<u8>),
    U16(Array3D<u16>),
}

impl Intensity {
    pub fn bit_depth(&self) -> BitDepth {
        match self {
            Intensity::U8(_) => BitDepth::U8,
            Intensity::U16(_) => BitDepth::U16,
        }
    }

    /// Sample at memory index `index` normalized to [0, 1].
    #[inline(always)]
    pub fn normalized_at(&self, index: usize) -> f64 {
        match self {
            Intensity::U8(a) => a.data[index] as f64 / u8::MAX as f64,
            Intensity::U16(a) => a.data[index] as f64 / u16::MAX as f64,
        }
    }

    pub fn same_layout<U>(&self, other: &Array3D<U>) -> bool {
        match self {
            Intensity::U8(a) => a.same_layout(other),
            Intensity::U16(a) => a.same_layout(other),
        }
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        match self {
            Intensity::U8(a) => (a.nx, a.ny, a.nz),
            Intensity::U16(a) => (a.nx, a.ny, a.nz),
        }
    }
}
