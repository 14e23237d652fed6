use crate::{flds::diag::DiagBuffer, prtls::BeamData, Config, Float};
use anyhow::{Context, Result};
use log::info;

/// Output directory of a dump.
pub fn output_prefix(cfg: &Config, step: usize) -> String {
    format!("{}/dat_{:05}", cfg.output.dir, step / cfg.output.output_interval)
}

pub(crate) fn save_diag(diag: &DiagBuffer, outdir: &str, rank: usize) -> Result<()> {
    for (comp, data) in diag.comps.iter().zip(diag.data.iter()) {
        npy::to_file(
            format!("{}/flds/{}_rank{}.npy", outdir, comp.name(), rank),
            data.iter().copied(),
        )
        .with_context(|| format!("Could not save {} data to file", comp.name()))?;
    }
    Ok(())
}

fn strided<'a, T: Copy + 'a>(
    vals: &'a [T],
    ids: &'a [i64],
    stride: usize,
) -> impl Iterator<Item = T> + 'a {
    vals.iter()
        .zip(ids.iter())
        .filter(|(_, id)| **id >= 0)
        .step_by(stride)
        .map(|(&v, _)| v)
}

pub(crate) fn save_beam(beam: &BeamData, outdir: &str, rank: usize, stride: usize) -> Result<()> {
    let attrs: [(&str, &[Float]); 7] = [
        ("x", &beam.x),
        ("y", &beam.y),
        ("z", &beam.z),
        ("ux", &beam.ux),
        ("uy", &beam.uy),
        ("uz", &beam.uz),
        ("w", &beam.w),
    ];
    for (attr, vals) in attrs.iter() {
        npy::to_file(
            format!("{}/beams/{}_{}_rank{}.npy", outdir, beam.name, attr, rank),
            strided(vals, &beam.id, stride),
        )
        .with_context(|| format!("Could not save {} {} data to file", beam.name, attr))?;
    }
    npy::to_file(
        format!("{}/beams/{}_id_rank{}.npy", outdir, beam.name, rank),
        strided(&beam.id, &beam.id, stride),
    )
    .with_context(|| format!("Could not save {} id data to file", beam.name))?;
    Ok(())
}

fn beam_selected(cfg: &Config, name: &str) -> bool {
    let sel = &cfg.output.beam_data;
    sel.iter().any(|n| n == "all" || n == name) && !sel.iter().any(|n| n == "none")
}

/// Writes the diagnostics of one rank at output steps.
pub(crate) fn save_output(
    step: usize,
    rank: usize,
    cfg: &Config,
    diag: Option<&DiagBuffer>,
    beams: &[BeamData],
) -> Result<()> {
    let out = &cfg.output;
    if !out.write_output || step % out.output_interval != 0 {
        return Ok(());
    }
    let prefix = output_prefix(cfg, step);
    std::fs::create_dir_all(format!("{}/flds", &prefix))
        .context("Unable to create output directory")?;
    std::fs::create_dir_all(format!("{}/beams", &prefix))
        .context("Unable to create output directory")?;

    if let Some(diag) = diag {
        save_diag(diag, &prefix, rank)?;
    }
    for beam in beams.iter().filter(|b| beam_selected(cfg, &b.name)) {
        save_beam(beam, &prefix, rank, out.stride)?;
    }
    info!("rank {}: output of step {} written to {}", rank, step, prefix);
    Ok(())
}
