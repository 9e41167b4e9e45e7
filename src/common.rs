use serde::{Deserialize, Serialize};

/// Size limit used for volumes made of a single brick.
pub const SIZE_LIMIT_SINGLE: u32 = 2;
/// Size limit used for bricked volumes. Fragments of a split object are expected to be smaller
/// than whole objects, but anything below this is treated as noise before the merge.
pub const SIZE_LIMIT_MULTI: u32 = 5;
/// Number of distinct colors on the hue wheel that maps object ids to colors.
pub const HUE_WHEEL: u32 = 360;

/// Bit depth of intensity samples.
///
/// Samples are normalized to [0, 1] by dividing by [`BitDepth::scale`] during the scan and scaled
/// back only when statistics are reported.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum BitDepth {
    /// 8bit unsigned samples.
    U8,
    /// 16bit unsigned samples.
    U16,
}

impl BitDepth {
    #[inline(always)]
    pub fn scale(&self) -> f64 {
        match self {
            BitDepth::U8 => u8::MAX as f64,
            BitDepth::U16 => u16::MAX as f64,
        }
    }
}

/// Main config for the analysis.
///
/// The defaults reproduce the usual interactive setup: whole volume, consistent colors, no
/// colocalization.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum number of voxels an object must have to be kept when the volume is one brick.
    pub size_limit_single: u32,
    /// Minimum number of voxels an object fragment must have inside one brick to be kept when the
    /// volume has more than one brick. Applied before fragments are merged across bricks.
    pub size_limit_multi: u32,
    /// Restrict the analysis to the voxels selected by the mask plane.
    ///
    /// Bricks without a mask plane are skipped in this mode.
    pub use_mask: bool,
    /// Rewrite the ids of object fragments so that all fragments of one object share an id
    /// (and therefore a color). This mutates the label buffers.
    pub consistent: bool,
    /// Sample the co-registered channels of the volume for every counted voxel.
    pub colocalize: bool,
    /// Physical size of a voxel. Only used for reporting positions.
    pub spacing: [f64; 3],
    /// Modulus of the id to color mapping. Two ids with the same remainder share a color.
    pub hue_wheel: u32,
    /// Scale used when intensities are reported. `None` means the bit depth scale of the data.
    pub intensity_scale: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size_limit_single: SIZE_LIMIT_SINGLE,
            size_limit_multi: SIZE_LIMIT_MULTI,
            use_mask: false,
            consistent: true,
            colocalize: false,
            spacing: [1.0, 1.0, 1.0],
            hue_wheel: HUE_WHEEL,
            intensity_scale: None,
        }
    }
}

impl Config {
    /// Size limit which applies to a volume with `num_bricks` bricks.
    pub fn size_limit(&self, num_bricks: usize) -> u32 {
        if num_bricks > 1 {
            self.size_limit_multi
        } else {
            self.size_limit_single
        }
    }
}
