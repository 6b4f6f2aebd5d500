//! Pass 1: forward resolution walk (spec.md §4.3).
//!
//! Ported from `main.c`'s `normalise` loop in the V1.2 driver: band-isolate
//! each shell, estimate noise/signal inside the mask, weighted-accumulate
//! into the real-space buffers, and extend the shell list until a stopping
//! criterion fires.

use ss_core::{ComplexVolume, Mask, ShellList, Volume};
use ss_fft::{FftEngine, ParallelFor};
use ss_kernels::fourier::{bandpass, fsc, lowpass};

/// The shell list built by the walk (with `fsc`/`crf`/`pwr`/`max` recorded
/// on every node) plus the accumulated, still-unmasked real maps.
pub struct Pass1Output {
    pub shells: ShellList,
    pub ro1: Volume,
    pub ro2: Volume,
}

/// Walk shells forward from `head`, accumulating into `ro1`/`ro2` until
/// `res+stp >= maxres` or `psnr <= 0.05`.
pub fn run(
    fft1: &ComplexVolume,
    fft2: &ComplexVolume,
    mask: &Mask,
    maxres: f64,
    engine: &FftEngine,
    pf: &ParallelFor,
) -> Pass1Output {
    let n = engine.side();
    let len = n * n * n;
    let n3 = len as f64;
    let mut shells = ShellList::new();
    let mut ro1 = Volume::zeros(n);
    let mut ro2 = Volume::zeros(n);

    loop {
        let idx = shells.tail_index();
        let (res, stp) = {
            let node = shells.get(idx);
            (node.res, node.stp)
        };

        let (band1, band2) = if res == 0.0 {
            (lowpass(fft1, stp, pf), lowpass(fft2, stp, pf))
        } else {
            (bandpass(fft1, res, res + stp, pf), bandpass(fft2, res, res + stp, pf))
        };

        let shell_fsc = fsc(&band1, &band2, pf);
        let crf = (2.0 * shell_fsc / (1.0 + shell_fsc)).abs().sqrt();

        let mut b1 = engine.inverse(&band1, pf);
        let mut b2 = engine.inverse(&band2, pf);
        for v in b1.as_mut_slice() {
            *v /= n3;
        }
        for v in b2.as_mut_slice() {
            *v /= n3;
        }

        let (noise_sum, power_sum, count) = pf
            .for_each_strided_reduce(
                len,
                (0.0f64, 0.0f64, 0u64),
                |flat, acc| {
                    if !mask.is_interior(flat) {
                        return;
                    }
                    let x1 = b1.as_slice()[flat];
                    let x2 = b2.as_slice()[flat];
                    let noise = x1 - x2;
                    let power = x1 + x2;
                    acc.0 += noise * noise;
                    acc.1 += power * power;
                    acc.2 += 1;
                },
                |partials| {
                    partials.into_iter().fold((0.0, 0.0, 0u64), |acc, p| {
                        (acc.0 + p.0, acc.1 + p.1, acc.2 + p.2)
                    })
                },
            )
            .expect("pass1 noise/power reduction");

        let count_f = count.max(1) as f64;
        let noise_mean = noise_sum / count_f;
        let power_mean = power_sum / count_f;
        let psnr = (1.0 - noise_mean / power_mean).abs();
        let pwr = power_mean.sqrt();

        {
            let node = shells.get_mut(idx);
            node.fsc = shell_fsc;
            node.crf = crf;
            node.pwr = pwr;
            node.max = psnr;
        }

        let weight = stp / pwr.max(1e-12);
        let b1v = b1.into_data();
        let b2v = b2.into_data();
        let base1 = ro1.as_slice().to_vec();
        let base2 = ro2.as_slice().to_vec();
        pf.map_strided(ro1.as_mut_slice(), |flat| base1[flat] + b1v[flat] * weight)
            .expect("pass1 accumulate ro1");
        pf.map_strided(ro2.as_mut_slice(), |flat| base2[flat] + b2v[flat] * weight)
            .expect("pass1 accumulate ro2");

        log::debug!(
            "pass1 shell res={res:.4} stp={stp:.4} fsc={shell_fsc:.4} psnr={psnr:.4} pwr={pwr:.6}"
        );

        // `psnr` is undefined (NaN) when a shell carries no power at all — a
        // degenerate, fully band-limited input. Treat that the same as the
        // noise-floor stop: extending with a non-finite weight would clamp
        // `stp` to zero and the walk would never reach `maxres`.
        if res + stp >= maxres || psnr <= 0.05 || !psnr.is_finite() {
            break;
        }
        shells.extend(psnr);
    }

    Pass1Output { shells, ro1, ro2 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadband_pair(n: usize, engine: &FftEngine, pf: &ParallelFor) -> (ComplexVolume, ComplexVolume) {
        let data: Vec<f64> = (0..n * n * n)
            .map(|i| (i as f64 * 0.17).sin() + 0.3 * (i as f64 * 0.91).cos())
            .collect();
        let volume = Volume::from_data(n, data);
        let fft = engine.forward(&volume, pf);
        (fft.clone(), fft)
    }

    #[test]
    fn identical_inputs_terminate_with_well_formed_shells() {
        let n = 16;
        let engine = FftEngine::new(n);
        let pf = ParallelFor::with_workers(2);
        let (fft1, fft2) = broadband_pair(n, &engine, &pf);
        let mask = ss_kernels::realspace::synthesize_mask(n, n as f64 / 4.0, &pf);

        let out = run(&fft1, &fft2, &mask, 0.45, &engine, &pf);
        assert!(!out.shells.is_empty());
        for idx in out.shells.forward_indices() {
            let node = out.shells.get(idx);
            assert!((node.fsc - 1.0).abs() < 1e-6, "fsc={}", node.fsc);
        }
    }

    #[test]
    fn degenerate_single_frequency_input_still_terminates() {
        let n = 16;
        let engine = FftEngine::new(n);
        let pf = ParallelFor::with_workers(2);
        let mut fft1 = ComplexVolume::zeros(n);
        let idx = fft1.index(0, 0, 0);
        fft1.as_mut_slice()[idx] = num_complex::Complex::new((n * n * n) as f64, 0.0);
        let fft2 = fft1.clone();
        let mask = ss_kernels::realspace::synthesize_mask(n, n as f64 / 4.0, &pf);

        let out = run(&fft1, &fft2, &mask, 0.45, &engine, &pf);
        assert!(!out.shells.is_empty());
    }
}
