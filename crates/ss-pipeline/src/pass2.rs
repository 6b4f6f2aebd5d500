//! Pass 2: backward resolution walk (spec.md §4.4).
//!
//! Ported from `truncate.c`'s `calc_max_noise_thread`/`assign_voxels_thread`:
//! lowpass each half to the current shell's cutoff, estimate an
//! Extreme-Value noise ceiling inside the mask, and admit voxels whose
//! squared amplitude exceeds it. Admission is monotone — once a voxel is
//! non-zero a later (coarser) shell never clears it.

use ss_core::{ComplexVolume, Mask, ShellList, Volume};
use ss_fft::{FftEngine, ParallelFor};
use ss_kernels::fourier::lowpass;

pub struct Pass2Output {
    pub ro1: Volume,
    pub ro2: Volume,
    /// Mean fraction of voxels admitted per shell, averaged over the walk.
    pub recovery: f64,
}

/// Hard-admission walk from `tail` back to `head`.
pub fn run(
    fft1: &ComplexVolume,
    fft2: &ComplexVolume,
    mask: &Mask,
    shells: &ShellList,
    engine: &FftEngine,
    pf: &ParallelFor,
) -> Pass2Output {
    let n = engine.side();
    let len = n * n * n;
    let n3 = len as f64;
    let mut ro1 = Volume::zeros(n);
    let mut ro2 = Volume::zeros(n);
    let mut recovery_sum = 0.0f64;
    let mut shell_count = 0u64;

    for idx in shells.backward_indices() {
        let node = shells.get(idx);
        let cutoff = node.res + node.stp;

        let band1 = lowpass(fft1, cutoff, pf);
        let band2 = lowpass(fft2, cutoff, pf);
        let mut b1 = engine.inverse(&band1, pf);
        let mut b2 = engine.inverse(&band2, pf);
        for v in b1.as_mut_slice() {
            *v /= n3;
        }
        for v in b2.as_mut_slice() {
            *v /= n3;
        }

        let (noise_max, sigma_sum, count) = pf
            .for_each_strided_reduce(
                len,
                (0.0f64, 0.0f64, 0u64),
                |flat, acc| {
                    if !mask.is_interior(flat) {
                        return;
                    }
                    let half_diff = 0.5 * (b1.as_slice()[flat] - b2.as_slice()[flat]);
                    let sq = half_diff * half_diff;
                    if sq > acc.0 {
                        acc.0 = sq;
                    }
                    acc.1 += sq;
                    acc.2 += 1;
                },
                |partials| {
                    partials.into_iter().fold((0.0, 0.0, 0u64), |acc, p| {
                        (acc.0.max(p.0), acc.1 + p.1, acc.2 + p.2)
                    })
                },
            )
            .expect("pass2 noise reduction");

        let count_f = count.max(1) as f64;
        let sigma_ev = (sigma_sum / count_f).sqrt() * (2.0 * count_f.ln().max(0.0)).sqrt();
        let noise = noise_max.max(sigma_ev * sigma_ev);

        let base1 = ro1.as_slice().to_vec();
        let base2 = ro2.as_slice().to_vec();
        let b1v = b1.into_data();
        let b2v = b2.into_data();

        let admitted = pf
            .for_each_strided_reduce(
                len,
                0.0f64,
                |flat, acc| {
                    if base1[flat] != 0.0 {
                        *acc += 0.5;
                    }
                    if base2[flat] != 0.0 {
                        *acc += 0.5;
                    }
                },
                |partials| partials.into_iter().sum(),
            )
            .expect("pass2 recovery reduction");

        pf.map_strided(ro1.as_mut_slice(), |flat| {
            let cur = base1[flat];
            if cur != 0.0 {
                cur
            } else if b1v[flat] * b1v[flat] > noise {
                b1v[flat]
            } else {
                0.0
            }
        })
        .expect("pass2 admit ro1");
        pf.map_strided(ro2.as_mut_slice(), |flat| {
            let cur = base2[flat];
            if cur != 0.0 {
                cur
            } else if b2v[flat] * b2v[flat] > noise {
                b2v[flat]
            } else {
                0.0
            }
        })
        .expect("pass2 admit ro2");

        recovery_sum += admitted / count_f;
        shell_count += 1;

        log::debug!("pass2 shell res={:.4} stp={:.4} noise={noise:.6}", node.res, node.stp);
    }

    let recovery = if shell_count > 0 { recovery_sum / shell_count as f64 } else { 0.0 };
    Pass2Output { ro1, ro2, recovery }
}

/// The `--rotfl` tapering variant. `taper_voxels_thread` is declared but its
/// body is absent from the source (see DESIGN.md); this reconstructs the
/// blend from `main.c:239-251`, which lowpasses *two* separate Fourier
/// channels per shell before calling `taper_map(ri1, ri2, ro1, ro2, ori1,
/// ori2, ...)`: `rof1`/`rof2` (`ki1`/`ki2`, re-seeded from Pass 1's output
/// at `main.c:195-196` — the Pass-1-denoised band, `ri1`/`ri2`) and
/// `fft1`/`fft2` (`inpk1`/`inpk2`, the pre-Pass-1 snapshot — the original
/// band, `ori1`/`ori2`). Each shell's already-computed `crf` is the
/// SNR-derived blend weight: the Pass-1-denoised band is trusted in
/// proportion to `crf²`, the raw original band picks up the remaining
/// `crf·(1-crf)`, and the running accumulator keeps `1-crf` of its prior
/// value — a continuous analogue of Pass 2's hard per-voxel admission.
pub fn run_tapered(
    fft1: &ComplexVolume,
    fft2: &ComplexVolume,
    rof1: &ComplexVolume,
    rof2: &ComplexVolume,
    shells: &ShellList,
    engine: &FftEngine,
    pf: &ParallelFor,
) -> (Volume, Volume) {
    let n = engine.side();
    let n3 = (n * n * n) as f64;
    let mut ro1 = Volume::zeros(n);
    let mut ro2 = Volume::zeros(n);

    for idx in shells.backward_indices() {
        let node = shells.get(idx);
        let cutoff = node.res + node.stp;
        let crf = node.crf.clamp(0.0, 1.0);
        let base_weight = 1.0 - crf;
        let denoised_weight = crf * crf;
        let original_weight = crf * (1.0 - crf);

        let ri_band1 = lowpass(rof1, cutoff, pf);
        let ri_band2 = lowpass(rof2, cutoff, pf);
        let mut ri1 = engine.inverse(&ri_band1, pf);
        let mut ri2 = engine.inverse(&ri_band2, pf);
        for v in ri1.as_mut_slice() {
            *v /= n3;
        }
        for v in ri2.as_mut_slice() {
            *v /= n3;
        }

        let ori_band1 = lowpass(fft1, cutoff, pf);
        let ori_band2 = lowpass(fft2, cutoff, pf);
        let mut ori1 = engine.inverse(&ori_band1, pf);
        let mut ori2 = engine.inverse(&ori_band2, pf);
        for v in ori1.as_mut_slice() {
            *v /= n3;
        }
        for v in ori2.as_mut_slice() {
            *v /= n3;
        }

        let base1 = ro1.as_slice().to_vec();
        let base2 = ro2.as_slice().to_vec();
        let ri1v = ri1.into_data();
        let ri2v = ri2.into_data();
        let ori1v = ori1.into_data();
        let ori2v = ori2.into_data();
        pf.map_strided(ro1.as_mut_slice(), |flat| {
            base1[flat] * base_weight + ri1v[flat] * denoised_weight + ori1v[flat] * original_weight
        })
        .expect("taper ro1");
        pf.map_strided(ro2.as_mut_slice(), |flat| {
            base2[flat] * base_weight + ri2v[flat] * denoised_weight + ori2v[flat] * original_weight
        })
        .expect("taper ro2");
    }

    (ro1, ro2)
}
