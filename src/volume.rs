use crate::arrays::{Array3D, Error, Intensity, ALIGN};
use crate::common::BitDepth;
use aligned_vec::AVec;
use std::collections::{HashMap, HashSet};

/// Axis of a brick face.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Lookup of the brick which shares the positive face of a brick.
///
/// Returning the same id that was passed in means there is no neighbor across that face.
pub trait BrickAdjacency: Send + Sync {
    fn neighbor(&self, brick_id: u32, axis: Axis) -> u32;
}

impl<F> BrickAdjacency for F
where
    F: Fn(u32, Axis) -> u32 + Send + Sync,
{
    fn neighbor(&self, brick_id: u32, axis: Axis) -> u32 {
        self(brick_id, axis)
    }
}

/// Regular grid of bricks numbered x-fastest: `id = bx + nbx * (by + nby * bz)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrickGrid {
    pub nbx: u32,
    pub nby: u32,
    pub nbz: u32,
}

impl BrickGrid {
    pub fn new(nbx: u32, nby: u32, nbz: u32) -> Self {
        Self { nbx, nby, nbz }
    }

    pub fn len(&self) -> usize {
        self.nbx as usize * self.nby as usize * self.nbz as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn coords(&self, id: u32) -> (u32, u32, u32) {
        let bx = id % self.nbx;
        let rest = id / self.nbx;
        (bx, rest % self.nby, rest / self.nby)
    }
}

impl BrickAdjacency for BrickGrid {
    fn neighbor(&self, brick_id: u32, axis: Axis) -> u32 {
        if brick_id as usize >= self.len() {
            return brick_id;
        }
        let (bx, by, bz) = self.coords(brick_id);
        match axis {
            Axis::X if bx + 1 < self.nbx => brick_id + 1,
            Axis::Y if by + 1 < self.nby => brick_id + self.nbx,
            Axis::Z if bz + 1 < self.nbz => brick_id + self.nbx * self.nby,
            _ => brick_id,
        }
    }
}

/// One tile of the volume with its intensity, optional mask and label planes.
///
/// All planes share the same logical extent and strides.
#[derive(Debug, Clone)]
pub struct Brick {
    pub id: u32,
    /// Position of the brick's first voxel in the whole volume.
    pub origin: [usize; 3],
    pub intensity: Intensity,
    pub mask: Option<Array3D<u8>>,
    pub label: Array3D<u32>,
}

impl Brick {
    pub fn new(
        id: u32,
        origin: [usize; 3],
        intensity: Intensity,
        label: Array3D<u32>,
        mask: Option<Array3D<u8>>,
    ) -> Result<Self, Error> {
        if label.is_empty() {
            return Err(Error::EmptyBrick);
        }
        if !intensity.same_layout(&label) {
            return Err(Error::PlaneMismatch(id));
        }
        if let Some(mask) = &mask {
            if !mask.same_layout(&label) {
                return Err(Error::PlaneMismatch(id));
            }
        }
        Ok(Self {
            id,
            origin,
            intensity,
            mask,
            label,
        })
    }

    #[inline(always)]
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.label.nx, self.label.ny, self.label.nz)
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.intensity.bit_depth()
    }

    /// Distinct ids in the logical extent of the label plane, background included.
    pub fn label_set(&self) -> HashSet<u32> {
        let (_, ny, nz) = self.dims();
        (0..nz)
            .flat_map(|k| (0..ny).map(move |j| (j, k)))
            .flat_map(|(j, k)| self.label.get_row(j, k).iter().copied())
            .collect()
    }
}

/// Co-registered channel sampled for colocalization. Bricks are in the same order as the bricks
/// of the volume it belongs to.
#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub bricks: Vec<Option<Intensity>>,
}

/// Bricked volume as handed over by the segmentation engine.
pub struct Volume {
    bricks: Vec<Brick>,
    channels: Vec<Channel>,
    adjacency: Box<dyn BrickAdjacency>,
    positions: HashMap<u32, usize>,
}

impl Volume {
    pub fn new<A: BrickAdjacency + 'static>(
        bricks: Vec<Brick>,
        adjacency: A,
    ) -> Result<Self, Error> {
        if let Some(first) = bricks.first() {
            let bit_depth = first.bit_depth();
            if let Some(b) = bricks.iter().find(|b| b.bit_depth() != bit_depth) {
                return Err(Error::BitDepthMismatch(b.id));
            }
        }
        let positions = bricks.iter().enumerate().map(|(p, b)| (b.id, p)).collect();
        Ok(Self {
            bricks,
            channels: vec![],
            adjacency: Box::new(adjacency),
            positions,
        })
    }

    pub fn single(brick: Brick) -> Self {
        let positions = HashMap::from([(brick.id, 0)]);
        Self {
            bricks: vec![brick],
            channels: vec![],
            adjacency: Box::new(BrickGrid::new(1, 1, 1)),
            positions,
        }
    }

    /// Cuts a whole volume into a grid of bricks of at most `brick_size` voxels per axis.
    pub fn from_flat(
        intensity: &Intensity,
        label: &Array3D<u32>,
        mask: Option<&Array3D<u8>>,
        brick_size: [usize; 3],
    ) -> Result<Self, Error> {
        if label.is_empty() || brick_size.contains(&0) {
            return Err(Error::EmptyBrick);
        }
        if intensity.dims() != (label.nx, label.ny, label.nz) {
            return Err(Error::PlaneMismatch(0));
        }
        if let Some(mask) = mask {
            if (mask.nx, mask.ny, mask.nz) != (label.nx, label.ny, label.nz) {
                return Err(Error::PlaneMismatch(0));
            }
        }
        let sizes = [label.nx, label.ny, label.nz];
        let splits: Vec<Vec<(usize, usize)>> = sizes
            .iter()
            .zip(brick_size)
            .map(|(len, step)| {
                (0..*len)
                    .step_by(step)
                    .map(|start| (start, step.min(len - start)))
                    .collect()
            })
            .collect();
        let grid = BrickGrid::new(
            splits[0].len() as u32,
            splits[1].len() as u32,
            splits[2].len() as u32,
        );
        let mut bricks = Vec::with_capacity(grid.len());
        for &(oz, nz) in &splits[2] {
            for &(oy, ny) in &splits[1] {
                for &(ox, nx) in &splits[0] {
                    let origin = [ox, oy, oz];
                    let extent = [nx, ny, nz];
                    let brick_intensity = match intensity {
                        Intensity::U8(a) => Intensity::U8(extract(a, origin, extent)),
                        Intensity::U16(a) => Intensity::U16(extract(a, origin, extent)),
                    };
                    bricks.push(Brick::new(
                        bricks.len() as u32,
                        origin,
                        brick_intensity,
                        extract(label, origin, extent),
                        mask.map(|m| extract(m, origin, extent)),
                    )?);
                }
            }
        }
        Self::new(bricks, grid)
    }

    pub fn add_channel(&mut self, channel: Channel) -> Result<(), Error> {
        if channel.bricks.len() != self.bricks.len() {
            return Err(Error::DimensionMismatch {
                expected: self.bricks.len(),
                found: channel.bricks.len(),
            });
        }
        for (brick, data) in self.bricks.iter().zip(&channel.bricks) {
            if let Some(data) = data {
                if !data.same_layout(&brick.label) {
                    return Err(Error::PlaneMismatch(brick.id));
                }
            }
        }
        self.channels.push(channel);
        Ok(())
    }

    pub fn bricks(&self) -> &[Brick] {
        &self.bricks
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn num_bricks(&self) -> usize {
        self.bricks.len()
    }

    pub fn bit_depth(&self) -> Option<BitDepth> {
        self.bricks.first().map(Brick::bit_depth)
    }

    pub fn position(&self, brick_id: u32) -> Option<usize> {
        self.positions.get(&brick_id).copied()
    }

    pub fn brick(&self, brick_id: u32) -> Option<&Brick> {
        self.position(brick_id).map(|p| &self.bricks[p])
    }

    pub fn brick_mut(&mut self, brick_id: u32) -> Option<&mut Brick> {
        self.position(brick_id).map(|p| &mut self.bricks[p])
    }

    /// Id of the brick across the positive face of `brick_id`, `None` when there is none.
    pub fn neighbor(&self, brick_id: u32, axis: Axis) -> Option<u32> {
        let id = self.adjacency.neighbor(brick_id, axis);
        if id == brick_id || !self.positions.contains_key(&id) {
            None
        } else {
            Some(id)
        }
    }
}

fn extract<T: Copy>(src: &Array3D<T>, origin: [usize; 3], extent: [usize; 3]) -> Array3D<T> {
    let [ox, oy, oz] = origin;
    let [nx, ny, nz] = extent;
    let data = AVec::from_iter(
        ALIGN,
        (oz..oz + nz).flat_map(|k| {
            (oy..oy + ny).flat_map(move |j| src.get_row(j, k)[ox..ox + nx].iter().copied())
        }),
    );
    Array3D {
        data,
        nx,
        ny,
        nz,
        sx: nx,
        sy: ny,
    }
}
