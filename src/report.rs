//! Tab separated table of object statistics.
//!
//! One row per object. Objects split over several bricks are reported once, with the pooled
//! statistics and the brick and id of their first fragment.

use crate::analyze::ComponentAnalyzer;
use crate::component::ComponentRecord;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

#[derive(Clone, Debug, Default)]
pub struct ReportOptions {
    /// Write a short summary before the table.
    pub verbose: bool,
    /// Extra first column as `(name, value)`, the value is repeated on every row.
    pub prefix: Option<(String, String)>,
}

/// Header line of the table, including the trailing newline.
pub fn header(analyzer: &ComponentAnalyzer, options: &ReportOptions) -> String {
    let mut line = String::new();
    if let Some((name, _)) = &options.prefix {
        line.push_str(name);
        line.push('\t');
    }
    if analyzer.num_bricks() > 1 {
        line.push_str("BRICK_ID\t");
    }
    line.push_str(
        "ID\tPosX\tPosY\tPosZ\tSumN\tSumI\tSurfaceN\tSurfaceI\tMean\tSigma\tMin\tMax\tDist",
    );
    for name in analyzer.channel_names() {
        line.push('\t');
        line.push_str(name);
        line.push('\t');
        line.push_str(name);
    }
    line.push('\n');
    line
}

pub fn write_report<W: Write>(
    analyzer: &mut ComponentAnalyzer,
    options: &ReportOptions,
    out: &mut W,
) -> io::Result<()> {
    let groups = analyzer.object_groups();
    if options.verbose {
        writeln!(out, "Statistics on the selection:")?;
        writeln!(out, "A total of {} component(s) selected", groups.len())?;
    }
    out.write_all(header(analyzer, options).as_bytes())?;

    let scale = analyzer
        .config
        .intensity_scale
        .or_else(|| analyzer.bit_depth().map(|b| b.scale()))
        .unwrap_or(1.0);
    let spacing = analyzer.config.spacing;
    let multi = analyzer.num_bricks() > 1;
    for group in groups {
        let record = analyzer.table().record(group[0]);
        if let Some((_, value)) = &options.prefix {
            write!(out, "{}\t", value)?;
        }
        if multi {
            write!(out, "{}\t", record.brick_id)?;
        }
        write_row(out, record, spacing, scale)?;
    }
    Ok(())
}

fn write_row<W: Write>(
    out: &mut W,
    record: &ComponentRecord,
    spacing: [f64; 3],
    scale: f64,
) -> io::Result<()> {
    let stats = &record.stats;
    let summary = stats.finalize(scale);
    write!(out, "{}", record.object_id)?;
    for (c, s) in stats.centroid.iter().zip(spacing) {
        write!(out, "\t{}", c * s)?;
    }
    write!(
        out,
        "\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        stats.count,
        stats.sum * scale,
        stats.surface_count,
        stats.surface_sum * scale,
        summary.mean,
        summary.sigma,
        summary.min,
        summary.max,
        record.distance
    )?;
    for (count, sum) in stats.coloc_counts.iter().zip(&stats.coloc_sums) {
        write!(out, "\t{}\t{}", count, sum * scale)?;
    }
    out.write_all(b"\n")
}

pub fn report_string(analyzer: &mut ComponentAnalyzer, options: &ReportOptions) -> String {
    let mut buffer = vec![];
    // writing into a Vec never fails
    write_report(analyzer, options, &mut buffer).ok();
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn write_report_file<P: AsRef<Path>>(
    analyzer: &mut ComponentAnalyzer,
    options: &ReportOptions,
    path: P,
) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_report(analyzer, options, &mut out)?;
    out.flush()
}
