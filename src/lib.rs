//! Per-object statistics for bricked 3D label volumes.
//!
//! Large segmented volumes are stored as a grid of bricks, each with its own intensity, label and
//! optional mask plane. An object can be cut by brick faces into several fragments carrying
//! different label ids. This crate measures every object (voxel count, intensity sum, mean,
//! standard deviation, range, surface and contact voxels, centroid, colocalization with other
//! channels), joins the fragments of an object across bricks, pools their statistics and optionally
//! rewrites the label planes so that all fragments share one id and therefore one color.
//!
//! The following example cuts a flat 8bit volume into bricks and prints the report:
//!
//! ```rust
//! use comp_analyzer_rust::analyze::{ComponentAnalyzer, NoProgress};
//! use comp_analyzer_rust::arrays::{Array3D, Intensity};
//! use comp_analyzer_rust::common::Config;
//! use comp_analyzer_rust::report::{report_string, ReportOptions};
//! use comp_analyzer_rust::volume::Volume;
//!
//! fn main() {
//!     // one object spanning the whole 4x4x2 volume
//!     let labels = vec![1u32; 32];
//!     let values: Vec<u8> = (1..=32).collect();
//!     let label = Array3D::from_slice(&labels, 4, 4, 2).unwrap();
//!     let intensity = Intensity::U8(Array3D::from_slice(&values, 4, 4, 2).unwrap());
//!     // cut it into 2x2x2 bricks
//!     let mut volume = Volume::from_flat(&intensity, &label, None, [2, 2, 2]).unwrap();
//!     // create config with defaults and keep small fragments
//!     let mut config = Config::default();
//!     config.size_limit_multi = 1;
//!     let mut analyzer = ComponentAnalyzer::new(config);
//!     analyzer.analyze(&mut volume, &NoProgress);
//!     assert_eq!(analyzer.comp_count(), 1);
//!     print!("{}", report_string(&mut analyzer, &ReportOptions::default()));
//! }
//! ```
//!
//! The phases can also be called one by one, e.g. to skip the rewrite of label ids or to pool
//! statistics again after the table was edited.
//!
//! It's strongly recommended to use this in release build. The voxel scan uses `assume!` macro to
//! avoid boundary checks in release builds.
//!

pub mod analyze;
pub mod arrays;
pub mod common;
pub mod component;
pub mod conectivity;
pub mod report;
pub mod stats;
pub mod volume;
