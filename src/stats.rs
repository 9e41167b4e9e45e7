//! Running statistics of one object.
//!
//! Intensities are accumulated in the normalized [0, 1] domain. Conversion back to the data range
//! happens only in [`Stats::finalize`].

/// How a voxel relates to its 6-connected neighbors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VoxelClass {
    /// Voxel is on the border of its brick or touches background.
    pub surface: bool,
    /// Voxel touches a voxel of a different object.
    pub contact: bool,
}

/// Statistics accumulator of one object (or one fragment of it).
#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    /// Number of voxels.
    pub count: u32,
    /// Sum of normalized intensities.
    pub sum: f64,
    pub surface_count: u32,
    pub surface_sum: f64,
    pub contact_count: u32,
    pub mean: f64,
    /// Sum of squared differences from the mean (Welford accumulator).
    pub m2: f64,
    pub min: f64,
    pub max: f64,
    /// Average voxel position in volume coordinates.
    pub centroid: [f64; 3],
    /// Per channel number of voxels where the channel is non-zero.
    pub coloc_counts: Vec<u32>,
    /// Per channel sum of normalized intensities.
    pub coloc_sums: Vec<f64>,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            surface_count: 0,
            surface_sum: 0.0,
            contact_count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            centroid: [0.0; 3],
            coloc_counts: vec![],
            coloc_sums: vec![],
        }
    }
}

/// Statistics scaled back to the data range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Summary {
    pub mean: f64,
    /// Standard deviation.
    pub sigma: f64,
    pub min: f64,
    pub max: f64,
}

impl Stats {
    /// Adds one sample at `position`.
    #[inline(always)]
    pub fn add(&mut self, value: f64, position: [f64; 3]) {
        let old_count = self.count as f64;
        self.count += 1;
        let count = self.count as f64;
        self.sum += value;
        let delta = value - self.mean;
        self.mean += delta / count;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        for (c, p) in self.centroid.iter_mut().zip(position) {
            *c = (*c * old_count + p) / count;
        }
    }

    /// Adds one voxel and updates the surface and contact counters.
    #[inline(always)]
    pub fn add_voxel(&mut self, value: f64, position: [f64; 3], class: VoxelClass) {
        self.add(value, position);
        if class.surface {
            self.surface_count += 1;
            self.surface_sum += value;
        }
        if class.contact {
            self.contact_count += 1;
        }
    }

    /// Adds normalized samples of the co-registered channels at the voxel just added.
    pub fn add_colocalization(&mut self, samples: &[f64]) {
        if self.coloc_sums.len() < samples.len() {
            self.coloc_counts.resize(samples.len(), 0);
            self.coloc_sums.resize(samples.len(), 0.0);
        }
        for (i, value) in samples.iter().enumerate() {
            if *value > 0.0 {
                self.coloc_counts[i] += 1;
            }
            self.coloc_sums[i] += value;
        }
    }

    /// Population variance of the samples.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.m2 / self.count as f64).max(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Combines statistics of two disjoint sets of voxels.
    pub fn pool(a: &Stats, b: &Stats) -> Stats {
        if a.count == 0 {
            return b.clone();
        }
        if b.count == 0 {
            return a.clone();
        }
        let n_a = a.count as f64;
        let n_b = b.count as f64;
        let n = n_a + n_b;
        let mean = (a.mean * n_a + b.mean * n_b) / n;
        let variance = (((a.variance() + a.mean * a.mean) * n_a
            + (b.variance() + b.mean * b.mean) * n_b)
            / n
            - mean * mean)
            .max(0.0);
        let mut centroid = [0.0; 3];
        for (c, (ca, cb)) in centroid.iter_mut().zip(a.centroid.iter().zip(b.centroid)) {
            *c = (ca * n_a + cb * n_b) / n;
        }
        let channels = a.coloc_sums.len().max(b.coloc_sums.len());
        let coloc_counts = (0..channels)
            .map(|i| a.coloc_counts.get(i).unwrap_or(&0) + b.coloc_counts.get(i).unwrap_or(&0))
            .collect();
        let coloc_sums = (0..channels)
            .map(|i| a.coloc_sums.get(i).unwrap_or(&0.0) + b.coloc_sums.get(i).unwrap_or(&0.0))
            .collect();
        Stats {
            count: a.count + b.count,
            sum: a.sum + b.sum,
            surface_count: a.surface_count + b.surface_count,
            surface_sum: a.surface_sum + b.surface_sum,
            contact_count: a.contact_count + b.contact_count,
            mean,
            m2: variance * n,
            min: a.min.min(b.min),
            max: a.max.max(b.max),
            centroid,
            coloc_counts,
            coloc_sums,
        }
    }

    /// Standard deviation and intensity range scaled by `scale` (255 or 65535 for the raw data
    /// range, 1 for the normalized one).
    pub fn finalize(&self, scale: f64) -> Summary {
        if self.count == 0 {
            return Summary {
                mean: 0.0,
                sigma: 0.0,
                min: 0.0,
                max: 0.0,
            };
        }
        Summary {
            mean: self.mean * scale,
            sigma: self.std_dev() * scale,
            min: self.min * scale,
            max: self.max * scale,
        }
    }
}
