use crate::arrays::{Array3D, Intensity};
use crate::common::{BitDepth, Config};
use crate::component::{combine_key, ComponentRecord, ComponentTable};
use crate::conectivity::LinkGraph;
use crate::stats::{Stats, VoxelClass};
use crate::volume::{Axis, Brick, Volume};
use assume::assume;
use log::{debug, trace, warn};
use multiversion::multiversion;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};

/// Receives a notification after each brick is processed.
///
/// Called from worker threads during the scan, so it must return promptly.
pub trait Progress: Sync {
    fn brick_processed(&self, brick_id: u32);
}

impl<F> Progress for F
where
    F: Fn(u32) + Sync,
{
    fn brick_processed(&self, brick_id: u32) {
        self(brick_id)
    }
}

/// Progress sink which ignores all notifications.
pub struct NoProgress;

impl Progress for NoProgress {
    fn brick_processed(&self, _brick_id: u32) {}
}

/// Result of making colors consistent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsistencyOutcome {
    /// Number of fragments which got a new id.
    pub rewritten: usize,
    /// Number of table entries removed because their key went stale.
    pub removed: usize,
    /// Keys of fragments for which no free id was found. They keep their id.
    pub failed: Vec<u64>,
}

/// Per-object statistics of a bricked label volume.
///
/// The analysis runs in four phases, each a public method:
/// 1. [`ComponentAnalyzer::build_tables`] scans every brick (in parallel) and records one
///    [`ComponentRecord`] per label and brick,
/// 2. [`ComponentAnalyzer::match_bricks`] links fragments touching across brick faces,
/// 3. [`ComponentAnalyzer::update_max_comp_size`] pools statistics of linked fragments,
/// 4. [`ComponentAnalyzer::make_color_consistent`] rewrites label ids so that all fragments of an
///    object share one id.
///
/// [`ComponentAnalyzer::analyze`] runs all of them.
pub struct ComponentAnalyzer {
    pub config: Config,
    table: ComponentTable,
    graph: LinkGraph,
    num_bricks: usize,
    bit_depth: Option<BitDepth>,
    channel_names: Vec<String>,
    analyzed: bool,
}

impl ComponentAnalyzer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            table: ComponentTable::new(),
            graph: LinkGraph::new(),
            num_bricks: 0,
            bit_depth: None,
            channel_names: vec![],
            analyzed: false,
        }
    }

    pub fn table(&self) -> &ComponentTable {
        &self.table
    }

    pub fn graph(&self) -> &LinkGraph {
        &self.graph
    }

    /// Number of bricks of the last analyzed volume.
    pub fn num_bricks(&self) -> usize {
        self.num_bricks
    }

    pub fn bit_depth(&self) -> Option<BitDepth> {
        self.bit_depth
    }

    /// Names of the colocalization channels, empty when colocalization was not done.
    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    /// Whether the whole volume (not a mask selection) was analyzed.
    pub fn is_analyzed(&self) -> bool {
        self.analyzed
    }

    /// Runs all phases. Returns the outcome of the id rewrite if it was enabled.
    pub fn analyze<P: Progress>(
        &mut self,
        volume: &mut Volume,
        progress: &P,
    ) -> Option<ConsistencyOutcome> {
        if !self.build_tables(volume, progress) {
            return None;
        }
        self.match_bricks(volume, progress);
        self.update_max_comp_size();
        let outcome = if self.config.consistent {
            Some(self.make_color_consistent(volume))
        } else {
            None
        };
        self.analyzed = !self.config.use_mask;
        outcome
    }

    /// Phase 1. Scans all bricks and rebuilds the component table.
    ///
    /// Returns false and leaves the previous results untouched when there is nothing to analyze.
    pub fn build_tables<P: Progress>(&mut self, volume: &Volume, progress: &P) -> bool {
        let num_bricks = volume.num_bricks();
        if num_bricks == 0 {
            warn!("Volume has no bricks, nothing to analyze");
            return false;
        }
        if self.config.use_mask && num_bricks == 1 && volume.bricks()[0].mask.is_none() {
            warn!("Mask requested but the volume has no mask");
            return false;
        }
        let size_limit = self.config.size_limit(num_bricks);
        let colocalize = self.config.colocalize && !volume.channels().is_empty();
        let config = &self.config;

        let per_brick: Vec<Vec<ComponentRecord>> = volume
            .bricks()
            .par_iter()
            .enumerate()
            .map(|(position, brick)| {
                let records = if config.use_mask && brick.mask.is_none() {
                    trace!("Brick {} skipped, no mask", brick.id);
                    vec![]
                } else {
                    let channels: Vec<Option<&Intensity>> = if colocalize {
                        volume
                            .channels()
                            .iter()
                            .map(|c| c.bricks[position].as_ref())
                            .collect()
                    } else {
                        vec![]
                    };
                    let mask = if config.use_mask {
                        brick.mask.as_ref()
                    } else {
                        None
                    };
                    let comps = scan_brick(brick, mask, &channels);
                    let mut records: Vec<ComponentRecord> = comps
                        .into_iter()
                        .filter(|(_, stats)| stats.count >= size_limit)
                        .map(|(id, stats)| ComponentRecord::new(id, brick.id, stats))
                        .collect();
                    records.sort_by_key(ComponentRecord::key);
                    trace!("Brick {}: {} components retained", brick.id, records.len());
                    records
                };
                progress.brick_processed(brick.id);
                records
            })
            .collect();

        self.table.clear();
        self.graph.clear();
        self.analyzed = false;
        self.num_bricks = num_bricks;
        self.bit_depth = volume.bit_depth();
        self.channel_names = if colocalize {
            volume.channels().iter().map(|c| c.name.clone()).collect()
        } else {
            vec![]
        };
        let mut records: Vec<ComponentRecord> = per_brick.into_iter().flatten().collect();
        records.sort_by_key(ComponentRecord::key);
        for record in records {
            self.table.insert(record);
        }
        debug!(
            "Component tables built: {} components in {} bricks (size limit {})",
            self.table.len(),
            num_bricks,
            size_limit
        );
        true
    }

    /// Phase 2. Links fragments that touch across the positive faces of bricks.
    pub fn match_bricks<P: Progress>(&mut self, volume: &Volume, progress: &P) {
        if volume.num_bricks() <= 1 {
            return;
        }
        let mut links = 0usize;
        for brick in volume.bricks() {
            if self.config.use_mask && brick.mask.is_none() {
                progress.brick_processed(brick.id);
                continue;
            }
            for axis in [Axis::Z, Axis::Y, Axis::X] {
                let Some(neighbor) = volume
                    .neighbor(brick.id, axis)
                    .and_then(|id| volume.brick(id))
                else {
                    continue;
                };
                links += self.link_face(brick, neighbor, axis);
            }
            progress.brick_processed(brick.id);
        }
        debug!(
            "Bricks matched: {} links, {} linked fragments",
            links,
            self.graph.num_vertices()
        );
    }

    /// Compares the positive `axis` face of `brick` with the first layer of `neighbor`.
    fn link_face(&mut self, brick: &Brick, neighbor: &Brick, axis: Axis) -> usize {
        let (nx, ny, nz) = brick.dims();
        let (mx, my, mz) = neighbor.dims();
        // brick-local coordinates of `brick` mapped into `neighbor`
        let offset = |a: usize, d: usize| (brick.origin[d] + a).checked_sub(neighbor.origin[d]);
        let mut links = 0;
        let mut link = |table: &ComponentTable, graph: &mut LinkGraph, l1: u32, l2: u32| {
            if l1 == 0 || l2 == 0 {
                return;
            }
            let a = table.index_of(combine_key(l1, brick.id));
            let b = table.index_of(combine_key(l2, neighbor.id));
            if let (Some(a), Some(b)) = (a, b) {
                graph.link_comps(a, b);
                links += 1;
            }
        };
        match axis {
            Axis::X => {
                for k in 0..nz {
                    for j in 0..ny {
                        let (Some(kn), Some(jn)) = (offset(k, 2), offset(j, 1)) else {
                            continue;
                        };
                        if kn >= mz || jn >= my {
                            continue;
                        }
                        let l1 = brick.label[(nx - 1, j, k)];
                        let l2 = neighbor.label[(0, jn, kn)];
                        link(&self.table, &mut self.graph, l1, l2);
                    }
                }
            }
            Axis::Y => {
                for k in 0..nz {
                    for i in 0..nx {
                        let (Some(kn), Some(in_)) = (offset(k, 2), offset(i, 0)) else {
                            continue;
                        };
                        if kn >= mz || in_ >= mx {
                            continue;
                        }
                        let l1 = brick.label[(i, ny - 1, k)];
                        let l2 = neighbor.label[(in_, 0, kn)];
                        link(&self.table, &mut self.graph, l1, l2);
                    }
                }
            }
            Axis::Z => {
                for j in 0..ny {
                    for i in 0..nx {
                        let (Some(jn), Some(in_)) = (offset(j, 1), offset(i, 0)) else {
                            continue;
                        };
                        if jn >= my || in_ >= mx {
                            continue;
                        }
                        let l1 = brick.label[(i, j, nz - 1)];
                        let l2 = neighbor.label[(in_, jn, 0)];
                        link(&self.table, &mut self.graph, l1, l2);
                    }
                }
            }
        }
        links
    }

    /// Phase 3. Pools the statistics of every linked set of fragments and writes the result to
    /// all of them.
    ///
    /// Pooling always starts from the per-brick statistics, so running it again changes nothing.
    pub fn update_max_comp_size(&mut self) {
        self.graph.clear_visited();
        let vertices: Vec<u32> = self.graph.vertices().collect();
        let mut members = vec![];
        let mut pooled_sets = 0usize;
        for vertex in vertices {
            if self.graph.visited(vertex) {
                continue;
            }
            members.clear();
            if !self.graph.linked_comps(vertex, &mut members) {
                continue;
            }
            let pooled = members.iter().fold(Stats::default(), |acc, m| {
                Stats::pool(&acc, &self.table.record(*m).local)
            });
            self.table.update_max_size(pooled.count);
            for m in &members {
                self.table.record_mut(*m).stats = pooled.clone();
            }
            pooled_sets += 1;
        }
        debug!("Statistics pooled for {} objects", pooled_sets);
    }

    /// Phase 4. Gives all fragments of an object the id of its first fragment (in key order),
    /// rewriting the label planes of the bricks.
    ///
    /// Ids are only rewritten when they map to a different color. A new id is searched from the
    /// base id in steps of the hue wheel size, so the color is kept, until an id not present in
    /// the brick is found. Fragments for which the search wraps around keep their id.
    pub fn make_color_consistent(&mut self, volume: &mut Volume) -> ConsistencyOutcome {
        let mut outcome = ConsistencyOutcome::default();
        if volume.num_bricks() <= 1 {
            return outcome;
        }
        let step = self.config.hue_wheel.max(1);
        self.graph.clear_visited();
        let mut members = vec![];
        for (_, index) in self.table.entries() {
            if self.graph.visited(index) {
                continue;
            }
            members.clear();
            if !self.graph.linked_comps(index, &mut members) {
                continue;
            }
            members.sort_by_key(|m| self.table.record(*m).key());
            let base_id = self.table.record(members[0]).object_id;
            for &member in &members[1..] {
                let record = self.table.record(member);
                let (link_id, brick_id, key) = (record.object_id, record.brick_id, record.key());
                if link_id.abs_diff(base_id) % step == 0 {
                    continue;
                }
                let Some(brick) = volume.brick_mut(brick_id) else {
                    warn!("Brick {} of component {:#x} not found", brick_id, key);
                    outcome.failed.push(key);
                    continue;
                };
                match nonconflict_id(brick, base_id, step) {
                    Some(new_id) => {
                        replace_id(&mut brick.label, link_id, new_id);
                        self.table.rekey(member, new_id);
                        outcome.rewritten += 1;
                    }
                    None => {
                        warn!(
                            "No free id for component {} in brick {}, keeping it",
                            link_id, brick_id
                        );
                        outcome.failed.push(key);
                    }
                }
            }
        }
        outcome.removed = self.table.remove_stale();
        debug!(
            "Colors made consistent: {} ids rewritten, {} stale keys removed, {} failed",
            outcome.rewritten,
            outcome.removed,
            outcome.failed.len()
        );
        outcome
    }

    /// Groups of record indices, one per object, in the order of their first key. Members of a
    /// group are in key order.
    pub fn object_groups(&mut self) -> Vec<Vec<u32>> {
        self.graph.clear_visited();
        let mut groups = vec![];
        for (_, index) in self.table.entries() {
            if self.graph.visited(index) {
                continue;
            }
            let mut members = vec![];
            if self.num_bricks > 1 && self.graph.linked_comps(index, &mut members) {
                members.sort_by_key(|m| self.table.record(*m).key());
            } else {
                members = vec![index];
            }
            groups.push(members);
        }
        groups
    }

    /// Number of objects, fragments of one object counted once.
    pub fn comp_count(&mut self) -> usize {
        self.table.len() - self.graph.num_vertices() + self.graph.num_sets()
    }

    /// Keys of all fragments of the object at brick-local voxel `(i, j, k)`.
    pub fn comps_at(
        &mut self,
        volume: &Volume,
        brick_id: u32,
        i: usize,
        j: usize,
        k: usize,
    ) -> BTreeSet<u64> {
        let mut keys = BTreeSet::new();
        let Some(id) = volume
            .brick(brick_id)
            .and_then(|b| b.label.get(i, j, k).ok().copied())
        else {
            return keys;
        };
        if id == 0 {
            return keys;
        }
        let key = combine_key(id, brick_id);
        keys.insert(key);
        if let Some(index) = self.table.index_of(key) {
            self.graph.clear_visited();
            let mut members = vec![];
            self.graph.linked_comps(index, &mut members);
            keys.extend(members.iter().map(|m| self.table.record(*m).key()));
        }
        keys
    }

    /// Position of the object size between the smallest and the largest object, for coloring by
    /// size.
    pub fn size_fraction(&self, key: u64) -> Option<f64> {
        let size = self.table.get(key)?.stats.count;
        let (min, max) = (self.table.min_size, self.table.max_size);
        if min >= max {
            return Some(1.0);
        }
        Some((size.saturating_sub(min)) as f64 / (max - min) as f64)
    }

    /// Position of the object on the hue wheel.
    pub fn color_id(&self, key: u64) -> Option<u32> {
        let record = self.table.get(key)?;
        Some(record.object_id % self.config.hue_wheel.max(1))
    }
}

/// Scans one brick and accumulates statistics per label.
#[multiversion(targets = "simd")]
fn scan_brick(
    brick: &Brick,
    mask: Option<&Array3D<u8>>,
    channels: &[Option<&Intensity>],
) -> HashMap<u32, Stats> {
    let (nx, ny, nz) = brick.dims();
    let label = &brick.label;
    let [ox, oy, oz] = brick.origin;
    let mut comps: HashMap<u32, Stats> = HashMap::new();
    let mut samples = vec![0.0; channels.len()];
    for k in 0..nz {
        for j in 0..ny {
            let row_start = label.get_index(0, j, k);
            for i in 0..nx {
                let index = row_start + i;
                if let Some(mask) = mask {
                    if mask.data[index] == 0 {
                        continue;
                    }
                }
                let id = label.data[index];
                if id == 0 {
                    continue;
                }
                let value = brick.intensity.normalized_at(index);
                if value <= 0.0 {
                    continue;
                }
                let class = classify_voxel(label, index, id, (i, j, k));
                let stats = comps.entry(id).or_default();
                stats.add_voxel(
                    value,
                    [(i + ox) as f64, (j + oy) as f64, (k + oz) as f64],
                    class,
                );
                if !channels.is_empty() {
                    for (sample, channel) in samples.iter_mut().zip(channels) {
                        *sample = channel.map_or(0.0, |c| c.normalized_at(index));
                    }
                    stats.add_colocalization(&samples);
                }
            }
        }
    }
    comps
}

/// Surface and contact flags of the voxel at memory `index` with label `id`.
///
/// Voxels on the border of the brick are always surface. Only neighbors inside the brick are
/// checked for contact, contact across bricks is found by linking.
#[inline(always)]
pub(crate) fn classify_voxel(
    label: &Array3D<u32>,
    index: usize,
    id: u32,
    (i, j, k): (usize, usize, usize),
) -> VoxelClass {
    let (nx, ny, nz) = (label.nx, label.ny, label.nz);
    let dy = label.sx;
    let dz = label.sx * label.sy;
    let mut class = VoxelClass {
        surface: i == 0 || i == nx - 1 || j == 0 || j == ny - 1 || k == 0 || k == nz - 1,
        contact: false,
    };
    let neighbors = [
        (i > 0, index.wrapping_sub(1)),
        (i + 1 < nx, index + 1),
        (j > 0, index.wrapping_sub(dy)),
        (j + 1 < ny, index + dy),
        (k > 0, index.wrapping_sub(dz)),
        (k + 1 < nz, index + dz),
    ];
    for (inside, n) in neighbors {
        if class.surface && class.contact {
            break;
        }
        if !inside {
            continue;
        }
        assume!(unsafe: n < label.data.len());
        let neighbor_id = label.data[n];
        if neighbor_id == 0 {
            class.surface = true;
        } else if neighbor_id != id {
            class.contact = true;
        }
    }
    class
}

/// First id `base_id + n * step` (wrapping) which is not zero and not present in the label plane of
/// `brick`. `None` when the search comes back to `base_id`.
fn nonconflict_id(brick: &Brick, base_id: u32, step: u32) -> Option<u32> {
    let present = brick.label_set();
    let mut id = base_id;
    loop {
        if id != 0 && !present.contains(&id) {
            return Some(id);
        }
        id = id.wrapping_add(step);
        if id == base_id {
            return None;
        }
    }
}

/// Replaces `old_id` by `new_id` in the logical extent of `label`, plane by plane in parallel.
fn replace_id(label: &mut Array3D<u32>, old_id: u32, new_id: u32) {
    let (nx, ny, sx) = (label.nx, label.ny, label.sx);
    let plane = label.sx * label.sy;
    let nz = label.nz;
    label
        .data
        .par_chunks_mut(plane)
        .take(nz)
        .for_each(|plane_data| {
            for row in plane_data.chunks_mut(sx).take(ny) {
                for value in &mut row[..nx] {
                    if *value == old_id {
                        *value = new_id;
                    }
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::{classify_voxel, ComponentAnalyzer, ConsistencyOutcome, NoProgress};
    use crate::arrays::{Array3D, Intensity};
    use crate::common::Config;
    use crate::component::combine_key;
    use crate::volume::{Axis, Brick, BrickGrid, Channel, Volume};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn brick(id: u32, origin: [usize; 3], dims: [usize; 3], labels: &[u32], values: &[u8]) -> Brick {
        let [nx, ny, nz] = dims;
        Brick::new(
            id,
            origin,
            Intensity::U8(Array3D::from_slice(values, nx, ny, nz).unwrap()),
            Array3D::from_slice(labels, nx, ny, nz).unwrap(),
            None,
        )
        .unwrap()
    }

    fn multi_config() -> Config {
        Config {
            size_limit_multi: 1,
            ..Config::default()
        }
    }

    /// Two 2x1x1 bricks side by side, the object is split over the shared face.
    fn split_pair() -> Volume {
        Volume::new(
            vec![
                brick(0, [0, 0, 0], [2, 1, 1], &[0, 5], &[0, 204]),
                brick(1, [2, 0, 0], [2, 1, 1], &[7, 0], &[153, 0]),
            ],
            BrickGrid::new(2, 1, 1),
        )
        .unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn split_object_is_pooled_and_renamed() {
        let mut volume = split_pair();
        let mut analyzer = ComponentAnalyzer::new(multi_config());
        assert!(analyzer.build_tables(&volume, &NoProgress));
        analyzer.match_bricks(&volume, &NoProgress);
        analyzer.update_max_comp_size();

        let a = analyzer.table().get(combine_key(5, 0)).unwrap().clone();
        let b = analyzer.table().get(combine_key(7, 1)).unwrap().clone();
        assert_eq!(a.stats, b.stats);
        assert_eq!(a.stats.count, 2);
        assert!(close(a.stats.mean, 0.7));
        assert!(close(a.stats.min, 0.6));
        assert!(close(a.stats.max, 0.8));
        assert_eq!(a.local.count, 1);
        assert_eq!(analyzer.table().max_size, 2);

        let outcome = analyzer.make_color_consistent(&mut volume);
        assert_eq!(
            outcome,
            ConsistencyOutcome {
                rewritten: 1,
                removed: 1,
                failed: vec![]
            }
        );
        assert_eq!(analyzer.table().len(), 2);
        let ids: Vec<u32> = analyzer.table().iter().map(|(_, r)| r.object_id).collect();
        assert_eq!(ids, vec![5, 5]);
        assert!(analyzer.table().iter().all(|(k, r)| k == r.key()));
        assert_eq!(&volume.brick(1).unwrap().label.data[..], &[5, 0]);
        assert_eq!(analyzer.comp_count(), 1);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let volume = split_pair();
        let mut analyzer = ComponentAnalyzer::new(multi_config());
        analyzer.build_tables(&volume, &NoProgress);
        analyzer.match_bricks(&volume, &NoProgress);
        analyzer.update_max_comp_size();
        let first: Vec<_> = analyzer.table().iter().map(|(_, r)| r.stats.clone()).collect();
        analyzer.update_max_comp_size();
        let second: Vec<_> = analyzer.table().iter().map(|(_, r)| r.stats.clone()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn analyze_runs_all_phases_and_reports_progress() {
        let mut volume = split_pair();
        let mut analyzer = ComponentAnalyzer::new(multi_config());
        let calls = AtomicUsize::new(0);
        let progress = |_id: u32| {
            calls.fetch_add(1, Ordering::Relaxed);
        };
        let outcome = analyzer.analyze(&mut volume, &progress).unwrap();
        assert_eq!(outcome.rewritten, 1);
        // scan and matching notify once per brick each
        assert_eq!(calls.load(Ordering::Relaxed), 4);
        assert!(analyzer.is_analyzed());
    }

    #[test]
    fn single_brick_conservation() {
        // 4x3x2 volume with two objects, some zero intensities and a one-voxel object
        #[rustfmt::skip]
        let labels = [
            1, 1, 0, 2,
            1, 0, 0, 2,
            0, 0, 3, 2,

            1, 1, 0, 0,
            0, 0, 0, 2,
            0, 0, 0, 2,
        ];
        #[rustfmt::skip]
        let values = [
            10, 20, 0, 30,
            40, 0, 9, 0,
            7, 0, 50, 60,

            70, 80, 0, 0,
            90, 0, 0, 100,
            0, 0, 0, 110,
        ];
        let volume = Volume::single(brick(0, [0, 0, 0], [4, 3, 2], &labels, &values));
        let mut analyzer = ComponentAnalyzer::new(Config::default());
        assert!(analyzer.build_tables(&volume, &NoProgress));
        let table = analyzer.table();
        // label 3 has one voxel and is below the size limit of 2
        assert_eq!(table.len(), 2);
        let one = &table.get(combine_key(1, 0)).unwrap().stats;
        let two = &table.get(combine_key(2, 0)).unwrap().stats;
        assert_eq!(one.count, 5);
        // one voxel of label 2 has zero intensity
        assert_eq!(two.count, 4);
        assert_eq!(table.min_size, 4);
        assert_eq!(table.max_size, 5);
        // every voxel of a one-brick volume this thin is on the border
        assert_eq!(one.surface_count, one.count);
        assert!(close(one.sum * 255.0, 220.0));
        assert!(close(one.centroid[0], 2.0 / 5.0));
        assert!(close(one.centroid[2], 2.0 / 5.0));
        assert_eq!(analyzer.comp_count(), 2);
    }

    #[test]
    fn interior_voxels_classified_by_neighbors() {
        // 3x3x3 block of label 1 with a label 2 voxel on the face
        let plane = |labels: &[u32]| Array3D::from_slice(labels, 3, 3, 3).unwrap();
        let mut labels = vec![1u32; 27];
        let center = 13;
        let class = classify_voxel(&plane(&labels), center, 1, (1, 1, 1));
        assert_eq!(class, Default::default());
        labels[center + 1] = 2;
        let class = classify_voxel(&plane(&labels), center, 1, (1, 1, 1));
        assert!(class.contact);
        assert!(!class.surface);
        labels[center - 3] = 0;
        let class = classify_voxel(&plane(&labels), center, 1, (1, 1, 1));
        assert!(class.contact && class.surface);
        // border voxel: surface, contact only inside the brick
        let class = classify_voxel(&plane(&labels), 0, 1, (0, 0, 0));
        assert!(class.surface);
        assert!(!class.contact);
    }

    #[test]
    fn padded_brick_ignores_padding() {
        // 2x2x1 logical extent with a row stride of 3, padding carries a label
        let labels = [4u32, 4, 9, 4, 4, 9];
        let values = [10u8, 10, 200, 10, 10, 200];
        let b = Brick::new(
            0,
            [0, 0, 0],
            Intensity::U8(Array3D::from_slice_strided(&values, 2, 2, 1, 3, 2).unwrap()),
            Array3D::from_slice_strided(&labels, 2, 2, 1, 3, 2).unwrap(),
            None,
        )
        .unwrap();
        let volume = Volume::single(b);
        let mut analyzer = ComponentAnalyzer::new(Config::default());
        analyzer.build_tables(&volume, &NoProgress);
        assert_eq!(analyzer.table().len(), 1);
        assert_eq!(analyzer.table().get(combine_key(4, 0)).unwrap().stats.count, 4);
    }

    #[test]
    fn mask_restricts_the_scan() {
        let labels = [1u32, 1, 1, 1];
        let values = [10u8, 20, 30, 40];
        let mask = Array3D::from_slice(&[1u8, 0, 1, 1], 4, 1, 1).unwrap();
        let b = Brick::new(
            0,
            [0, 0, 0],
            Intensity::U8(Array3D::from_slice(&values, 4, 1, 1).unwrap()),
            Array3D::from_slice(&labels, 4, 1, 1).unwrap(),
            Some(mask),
        )
        .unwrap();
        let mut volume = Volume::single(b);
        let config = Config {
            use_mask: true,
            ..Config::default()
        };
        let mut analyzer = ComponentAnalyzer::new(config);
        analyzer.analyze(&mut volume, &NoProgress);
        assert_eq!(analyzer.table().get(combine_key(1, 0)).unwrap().stats.count, 3);
        assert!(!analyzer.is_analyzed());
    }

    #[test]
    fn bricks_without_mask_are_skipped_in_mask_mode() {
        let masked = Brick::new(
            0,
            [0, 0, 0],
            Intensity::U8(Array3D::from_slice(&[0, 204], 2, 1, 1).unwrap()),
            Array3D::from_slice(&[0, 5], 2, 1, 1).unwrap(),
            Some(Array3D::from_fill(1u8, 2, 1, 1)),
        )
        .unwrap();
        let mut volume = Volume::new(
            vec![masked, brick(1, [2, 0, 0], [2, 1, 1], &[7, 0], &[153, 0])],
            BrickGrid::new(2, 1, 1),
        )
        .unwrap();
        let mut analyzer = ComponentAnalyzer::new(Config {
            use_mask: true,
            ..multi_config()
        });
        let calls = AtomicUsize::new(0);
        let progress = |_id: u32| {
            calls.fetch_add(1, Ordering::Relaxed);
        };
        let outcome = analyzer.analyze(&mut volume, &progress).unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 4);
        assert_eq!(analyzer.table().len(), 1);
        assert!(analyzer.table().iter().all(|(_, r)| r.brick_id == 0));
        assert_eq!(analyzer.graph().num_vertices(), 0);
        assert_eq!(outcome, ConsistencyOutcome::default());
        assert_eq!(volume.brick(1).unwrap().label.data[0], 7);
    }

    #[test]
    fn missing_input_keeps_previous_results() {
        let volume = split_pair();
        let mut analyzer = ComponentAnalyzer::new(multi_config());
        analyzer.build_tables(&volume, &NoProgress);
        let empty = Volume::new(vec![], BrickGrid::new(0, 0, 0)).unwrap();
        assert!(!analyzer.build_tables(&empty, &NoProgress));
        assert_eq!(analyzer.table().len(), 2);

        // single brick without mask while a mask is requested
        let single = Volume::single(brick(0, [0, 0, 0], [2, 1, 1], &[1, 1], &[5, 5]));
        analyzer.config.use_mask = true;
        assert!(!analyzer.build_tables(&single, &NoProgress));
        assert_eq!(analyzer.table().len(), 2);
    }

    #[test]
    fn filtered_fragment_is_not_linked() {
        let volume = Volume::new(
            vec![
                brick(0, [0, 0, 0], [2, 1, 1], &[5, 5], &[100, 100]),
                brick(1, [2, 0, 0], [2, 1, 1], &[7, 0], &[100, 0]),
            ],
            BrickGrid::new(2, 1, 1),
        )
        .unwrap();
        let mut analyzer = ComponentAnalyzer::new(Config {
            size_limit_multi: 2,
            ..Config::default()
        });
        analyzer.build_tables(&volume, &NoProgress);
        analyzer.match_bricks(&volume, &NoProgress);
        assert_eq!(analyzer.table().len(), 1);
        assert_eq!(analyzer.graph().num_vertices(), 0);
    }

    #[test]
    fn links_along_all_axes() {
        // 2x2x2 bricks of 1x1x1 voxels, all label 1 in brick 0 and 2 elsewhere
        let grid = BrickGrid::new(2, 2, 2);
        let bricks = (0..8u32)
            .map(|id| {
                let (bx, by, bz) = grid.coords(id);
                let label = if id == 0 { 1 } else { 2 };
                brick(id, [bx as usize, by as usize, bz as usize], [1, 1, 1], &[label], &[50])
            })
            .collect();
        let mut volume = Volume::new(bricks, grid).unwrap();
        assert_eq!(volume.neighbor(0, Axis::Z), Some(4));
        let mut analyzer = ComponentAnalyzer::new(multi_config());
        let outcome = analyzer.analyze(&mut volume, &NoProgress).unwrap();
        assert_eq!(analyzer.graph().num_vertices(), 8);
        assert_eq!(analyzer.comp_count(), 1);
        // label 2 differs from base id 1 by 1, every other brick gets id 1
        assert_eq!(outcome.rewritten, 7);
        assert!(analyzer.table().iter().all(|(_, r)| r.object_id == 1));
        assert!(analyzer.table().iter().all(|(_, r)| r.stats.count == 8));
        assert!(volume.bricks().iter().all(|b| b.label.data[0] == 1));
    }

    #[test]
    fn uneven_flat_volume_links_wide_faces() {
        // 3x3x2 cut into 2x2x1 bricks: 2x2x2 grid with 2x2, 1x2, 2x1 and 1x1 faces
        let labels = vec![1u32; 18];
        let values = vec![100u8; 18];
        let label = Array3D::from_slice(&labels, 3, 3, 2).unwrap();
        let intensity = Intensity::U8(Array3D::from_slice(&values, 3, 3, 2).unwrap());
        let mut volume = Volume::from_flat(&intensity, &label, None, [2, 2, 1]).unwrap();
        assert_eq!(volume.num_bricks(), 8);
        assert_eq!(volume.brick(3).unwrap().dims(), (1, 1, 1));
        let mut analyzer = ComponentAnalyzer::new(multi_config());
        let outcome = analyzer.analyze(&mut volume, &NoProgress).unwrap();
        assert_eq!(outcome.rewritten, 0);
        assert_eq!(analyzer.graph().num_vertices(), 8);
        assert_eq!(analyzer.comp_count(), 1);
        assert!(analyzer.table().iter().all(|(_, r)| r.stats.count == 18));
    }

    #[test]
    fn offset_neighbor_links_only_overlapping_voxels() {
        // brick 1 covers only the second row of the +x face of brick 0
        let mut volume = Volume::new(
            vec![
                brick(0, [0, 0, 0], [2, 2, 1], &[0, 3, 0, 4], &[0, 90, 0, 90]),
                brick(1, [2, 1, 0], [1, 1, 1], &[9], &[90]),
            ],
            BrickGrid::new(2, 1, 1),
        )
        .unwrap();
        let mut analyzer = ComponentAnalyzer::new(Config {
            consistent: false,
            ..multi_config()
        });
        analyzer.analyze(&mut volume, &NoProgress);
        let keys = analyzer.comps_at(&volume, 1, 0, 0, 0);
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec![combine_key(4, 0), combine_key(9, 1)]
        );
        assert_eq!(analyzer.comps_at(&volume, 0, 1, 0, 0).len(), 1);
        assert_eq!(analyzer.comp_count(), 2);
    }

    #[test]
    fn same_color_is_not_rewritten() {
        let mut volume = Volume::new(
            vec![
                brick(0, [0, 0, 0], [1, 1, 1], &[5], &[100]),
                brick(1, [1, 0, 0], [1, 1, 1], &[365], &[100]),
            ],
            BrickGrid::new(2, 1, 1),
        )
        .unwrap();
        let mut analyzer = ComponentAnalyzer::new(multi_config());
        let outcome = analyzer.analyze(&mut volume, &NoProgress).unwrap();
        assert_eq!(outcome, ConsistencyOutcome::default());
        assert_eq!(analyzer.color_id(combine_key(5, 0)), analyzer.color_id(combine_key(365, 1)));
    }

    #[test]
    fn rewrite_skips_ids_present_in_brick() {
        // brick 1 already uses the base id 5 for another object
        let mut volume = Volume::new(
            vec![
                brick(0, [0, 0, 0], [2, 1, 1], &[0, 5], &[0, 100]),
                brick(1, [2, 0, 0], [3, 1, 1], &[7, 0, 5], &[100, 0, 100]),
            ],
            BrickGrid::new(2, 1, 1),
        )
        .unwrap();
        let mut analyzer = ComponentAnalyzer::new(multi_config());
        let outcome = analyzer.analyze(&mut volume, &NoProgress).unwrap();
        assert_eq!(outcome.rewritten, 1);
        assert!(analyzer.table().get(combine_key(365, 1)).is_some());
        assert!(analyzer.table().get(combine_key(5, 1)).is_some());
        assert_eq!(&volume.brick(1).unwrap().label.data[..], &[365, 0, 5]);
    }

    #[test]
    fn exhausted_id_search_keeps_fragment() {
        let half = 1u32 << 31;
        let mut volume = Volume::new(
            vec![
                brick(0, [0, 0, 0], [2, 1, 1], &[0, 5], &[0, 100]),
                brick(1, [2, 0, 0], [3, 1, 1], &[7, 5, 5 + half], &[100, 100, 100]),
            ],
            BrickGrid::new(2, 1, 1),
        )
        .unwrap();
        let mut analyzer = ComponentAnalyzer::new(Config {
            hue_wheel: half,
            ..multi_config()
        });
        let outcome = analyzer.analyze(&mut volume, &NoProgress).unwrap();
        assert_eq!(outcome.rewritten, 0);
        assert_eq!(outcome.removed, 0);
        assert_eq!(outcome.failed, vec![combine_key(7, 1)]);
        assert!(analyzer.table().get(combine_key(7, 1)).is_some());
        assert_eq!(volume.brick(1).unwrap().label.data[0], 7);
    }

    #[test]
    fn colocalization_sums_per_channel() {
        let b = brick(0, [0, 0, 0], [2, 1, 1], &[3, 3], &[10, 20]);
        let mut volume = Volume::single(b);
        volume
            .add_channel(Channel {
                name: "GFP".to_string(),
                bricks: vec![Some(Intensity::U8(
                    Array3D::from_slice(&[0, 51], 2, 1, 1).unwrap(),
                ))],
            })
            .unwrap();
        volume
            .add_channel(Channel {
                name: "missing".to_string(),
                bricks: vec![None],
            })
            .unwrap();
        let mut analyzer = ComponentAnalyzer::new(Config {
            colocalize: true,
            ..Config::default()
        });
        analyzer.analyze(&mut volume, &NoProgress);
        let stats = &analyzer.table().get(combine_key(3, 0)).unwrap().stats;
        assert_eq!(stats.coloc_counts, vec![1, 0]);
        assert!(close(stats.coloc_sums[0], 0.2));
        assert_eq!(analyzer.channel_names(), &["GFP".to_string(), "missing".to_string()]);
    }

    #[test]
    fn point_query_expands_to_linked_fragments() {
        let mut volume = split_pair();
        let mut analyzer = ComponentAnalyzer::new(Config {
            consistent: false,
            ..multi_config()
        });
        analyzer.analyze(&mut volume, &NoProgress);
        let keys = analyzer.comps_at(&volume, 1, 0, 0, 0);
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec![combine_key(5, 0), combine_key(7, 1)]
        );
        assert!(analyzer.comps_at(&volume, 1, 1, 0, 0).is_empty());
        assert!(analyzer.comps_at(&volume, 9, 0, 0, 0).is_empty());
        assert_eq!(analyzer.object_groups().len(), 1);
    }

    #[test]
    fn size_fraction_uses_table_range() {
        let labels = [1u32, 1, 0, 2, 2, 2, 2];
        let values = [9u8; 7];
        let volume = Volume::single(brick(0, [0, 0, 0], [7, 1, 1], &labels, &values));
        let mut analyzer = ComponentAnalyzer::new(Config::default());
        analyzer.build_tables(&volume, &NoProgress);
        assert_eq!(analyzer.size_fraction(combine_key(1, 0)), Some(0.0));
        assert_eq!(analyzer.size_fraction(combine_key(2, 0)), Some(1.0));
        assert_eq!(analyzer.size_fraction(combine_key(3, 0)), None);
    }

    #[test]
    fn flat_volume_round_trip_through_analysis() {
        // one object crossing all bricks of a 4x4x1 volume cut into 2x2x1 bricks
        let labels = vec![8u32; 16];
        let values: Vec<u16> = (1..=16).collect();
        let label = Array3D::from_slice(&labels, 4, 4, 1).unwrap();
        let intensity = Intensity::U16(Array3D::from_slice(&values, 4, 4, 1).unwrap());
        let mut volume = Volume::from_flat(&intensity, &label, None, [2, 2, 1]).unwrap();
        let mut analyzer = ComponentAnalyzer::new(multi_config());
        let outcome = analyzer.analyze(&mut volume, &NoProgress).unwrap();
        assert_eq!(outcome.rewritten, 0);
        assert_eq!(analyzer.comp_count(), 1);
        let stats = &analyzer.table().get(combine_key(8, 3)).unwrap().stats;
        assert_eq!(stats.count, 16);
        assert!(close(stats.mean * 65535.0, 8.5));
        assert!(close(stats.centroid[0], 1.5));
        assert!(close(stats.centroid[1], 1.5));
    }
}
