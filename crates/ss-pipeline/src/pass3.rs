//! Pass 3: re-normalisation (spec.md §4.5 step 7, V1.2 only).
//!
//! Walks the shell list forward again, this time over the Fourier transform
//! of Pass 2's output, band-isolating each shell and accumulating
//! `ri * stp/pwr` using the `pwr` each node recorded during Pass 1 — the
//! same weighting shape as Pass 1 step 5, run in reverse to undo its scaling.

use ss_core::{ComplexVolume, ShellList, Volume};
use ss_fft::{FftEngine, ParallelFor};
use ss_kernels::fourier::{bandpass, lowpass};

pub fn run(
    fft1: &ComplexVolume,
    fft2: &ComplexVolume,
    shells: &ShellList,
    engine: &FftEngine,
    pf: &ParallelFor,
) -> (Volume, Volume) {
    let n = engine.side();
    let n3 = (n * n * n) as f64;
    let mut ro1 = Volume::zeros(n);
    let mut ro2 = Volume::zeros(n);

    for idx in shells.forward_indices() {
        let node = shells.get(idx);
        let (res, stp, pwr) = (node.res, node.stp, node.pwr);

        let (band1, band2) = if res == 0.0 {
            (lowpass(fft1, stp, pf), lowpass(fft2, stp, pf))
        } else {
            (bandpass(fft1, res, res + stp, pf), bandpass(fft2, res, res + stp, pf))
        };

        let mut ri1 = engine.inverse(&band1, pf);
        let mut ri2 = engine.inverse(&band2, pf);
        for v in ri1.as_mut_slice() {
            *v /= n3;
        }
        for v in ri2.as_mut_slice() {
            *v /= n3;
        }

        let weight = stp / pwr.max(1e-12);
        let ri1v = ri1.into_data();
        let ri2v = ri2.into_data();
        let base1 = ro1.as_slice().to_vec();
        let base2 = ro2.as_slice().to_vec();
        pf.map_strided(ro1.as_mut_slice(), |flat| base1[flat] + ri1v[flat] * weight)
            .expect("pass3 accumulate ro1");
        pf.map_strided(ro2.as_mut_slice(), |flat| base2[flat] + ri2v[flat] * weight)
            .expect("pass3 accumulate ro2");
    }

    (ro1, ro2)
}
