//! Spherical Butterworth filtering, FSC accumulation, and radial spectrum
//! estimation/re-application over the half-Hermitian Fourier cube.
//!
//! Ported from `fouriers.c`. Every kernel there forks `nthreads` workers,
//! strides an index range, and joins; here each is one call into
//! [`ParallelFor`].

use num_complex::Complex;
use ss_core::ComplexVolume;
use ss_fft::ParallelFor;

/// Squared radial frequency `(kf^2 + jf^2 + if^2) / n^2` at a lattice point.
#[inline]
fn radial_q2(vol: &ComplexVolume, k: usize, j: usize, i: usize) -> f64 {
    let n = vol.side() as f64;
    let kf = vol.centred_freq(k) / n;
    let jf = vol.centred_freq(j) / n;
    let if_ = vol.centred_freq(i) / n;
    kf * kf + jf * jf + if_ * if_
}

#[inline]
fn coords(vol: &ComplexVolume, flat: usize) -> (usize, usize, usize) {
    let n = vol.side();
    let nf = vol.folded_side();
    let i = flat % nf;
    let rest = flat / nf;
    let j = rest % n;
    let k = rest / n;
    (k, j, i)
}

/// Butterworth order-8 lowpass with high cutoff `hires` (cycles/voxel).
pub fn lowpass(input: &ComplexVolume, hires: f64, pf: &ParallelFor) -> ComplexVolume {
    let n = input.side();
    let hires2 = hires * hires;
    let mut out = ComplexVolume::zeros(n);
    pf.map_strided(out.as_mut_slice(), |flat| {
        let (k, j, i) = coords(input, flat);
        let q2 = radial_q2(input, k, j, i);
        let gain = (1.0 / (1.0 + (q2 / hires2).powi(8))).sqrt();
        input.as_slice()[flat] * gain
    })
    .expect("lowpass worker failure");
    out
}

/// Butterworth bandpass between `lores` and `hires` (cycles/voxel).
pub fn bandpass(input: &ComplexVolume, lores: f64, hires: f64, pf: &ParallelFor) -> ComplexVolume {
    let n = input.side();
    let hires2 = hires * hires;
    let lores2 = lores * lores;
    let mut out = ComplexVolume::zeros(n);
    pf.map_strided(out.as_mut_slice(), |flat| {
        let (k, j, i) = coords(input, flat);
        let q2 = radial_q2(input, k, j, i);
        let hi = (1.0 / (1.0 + (q2 / hires2).powi(8))).sqrt();
        let lo = (1.0 / (1.0 + (q2 / lores2).powi(8))).sqrt();
        input.as_slice()[flat] * (hi - lo)
    })
    .expect("bandpass worker failure");
    out
}

/// Fourier Shell Correlation over the full half-Hermitian cube.
pub fn fsc(a: &ComplexVolume, b: &ComplexVolume, pf: &ParallelFor) -> f64 {
    let len = a.as_slice().len();
    let (num, den1, den2) = pf
        .for_each_strided_reduce(
            len,
            (0.0f64, 0.0f64, 0.0f64),
            |idx, acc| {
                let x = a.as_slice()[idx];
                let y = b.as_slice()[idx];
                acc.0 += (x * y.conj()).re;
                acc.1 += (x * x.conj()).re;
                acc.2 += (y * y.conj()).re;
            },
            |partials| {
                partials.into_iter().fold((0.0, 0.0, 0.0), |acc, p| {
                    (acc.0 + p.0, acc.1 + p.1, acc.2 + p.2)
                })
            },
        )
        .expect("fsc worker failure");
    num / (den1 * den2).abs().sqrt()
}

/// The result of [`radial_spectrum`]: per-shell mean amplitude profiles and
/// the detected spectral cutoff (cycles/voxel).
pub struct Spectrum {
    pub spec1: Vec<f64>,
    pub spec2: Vec<f64>,
    pub maxres: f64,
}

/// Bin Fourier amplitude by radius (2 bins per voxel-radius) and detect the
/// resolution at which the signal drops into the noise floor.
pub fn radial_spectrum(a: &ComplexVolume, b: &ComplexVolume, pf: &ParallelFor) -> Spectrum {
    let n = a.side();
    let len = a.as_slice().len();

    #[derive(Clone)]
    struct Bins {
        n: Vec<u64>,
        amp1: Vec<f64>,
        amp2: Vec<f64>,
        sum: Vec<f64>,
        sub: Vec<f64>,
    }
    let identity = Bins {
        n: vec![0u64; n],
        amp1: vec![0.0; n],
        amp2: vec![0.0; n],
        sum: vec![0.0; n],
        sub: vec![0.0; n],
    };

    let bins = pf
        .for_each_strided_reduce(
            len,
            identity,
            |flat, acc| {
                let (k, j, i) = coords(a, flat);
                let kf = a.centred_freq(k);
                let jf = a.centred_freq(j);
                let if_ = a.centred_freq(i);
                let s = ((kf * kf + jf * jf + if_ * if_).abs().sqrt() * 2.0) as usize;
                if s >= n {
                    return;
                }
                let x = a.as_slice()[flat];
                let y = b.as_slice()[flat];
                acc.amp1[s] += (x * x.conj()).re.abs().sqrt();
                acc.amp2[s] += (y * y.conj()).re.abs().sqrt();
                let plus = x + y;
                let minus = x - y;
                acc.sum[s] += (plus * plus.conj()).re;
                acc.sub[s] += (minus * minus.conj()).re;
                acc.n[s] += 1;
            },
            |partials| {
                let mut total = Bins {
                    n: vec![0u64; n],
                    amp1: vec![0.0; n],
                    amp2: vec![0.0; n],
                    sum: vec![0.0; n],
                    sub: vec![0.0; n],
                };
                for p in partials {
                    for s in 0..n {
                        total.n[s] += p.n[s];
                        total.amp1[s] += p.amp1[s];
                        total.amp2[s] += p.amp2[s];
                        total.sum[s] += p.sum[s];
                        total.sub[s] += p.sub[s];
                    }
                }
                total
            },
        )
        .expect("radial spectrum worker failure");

    let mut spec1 = vec![0.0; n];
    let mut spec2 = vec![0.0; n];
    let mut cut = 0.0f64;
    for s in 0..n {
        // Low shells can be empty: the lattice has no integer frequency
        // vector with norm strictly between two consecutive half-integers,
        // e.g. nothing lands at s=1 (radius in [0.5,1.0)). An empty shell
        // carries no evidence either way, so it can't trigger the cutoff.
        if bins.n[s] == 0 {
            continue;
        }
        let count = bins.n[s] as f64;
        spec1[s] = bins.amp1[s] / count;
        spec2[s] = bins.amp2[s] / count;
        let below_floor = spec1[s] > 0.0 && spec2[s] > 0.0 && spec1[s] < 0.1 && spec2[s] < 0.1;
        let snr_collapsed = (bins.sum[s] / bins.sub[s].max(f64::MIN_POSITIVE)).log2() < 0.25;
        if cut > 0.0 || below_floor || snr_collapsed {
            if cut == 0.0 {
                cut = s as f64 / (n as f64 * 2.0);
            }
            spec1[s] = 0.0;
            spec2[s] = 0.0;
        }
    }
    let maxres = if cut > 0.0 { cut } else { 0.45 };
    Spectrum { spec1, spec2, maxres }
}

/// Rescale `half1`/`half2` in place so their radial amplitude profile
/// matches the targets `spec1`/`spec2` up to `maxres`, zeroing beyond it.
pub fn apply_spectrum(
    half1: &mut ComplexVolume,
    half2: &mut ComplexVolume,
    spec1: &[f64],
    spec2: &[f64],
    maxres: f64,
    pf: &ParallelFor,
) {
    let n = half1.side();
    let len = half1.as_slice().len();
    let current = radial_spectrum_amplitude_only(half1, half2, pf);

    let cut = (maxres * n as f64 * 2.0) as usize;
    let mut cor1 = vec![0.0; n];
    let mut cor2 = vec![0.0; n];
    for s in 0..n {
        if s < cut {
            let count = current.n[s].max(1) as f64;
            let mean1 = current.amp1[s] / count;
            let mean2 = current.amp2[s] / count;
            // A shell with exactly zero surviving amplitude carries no
            // information to rescale from; suppress it rather than dividing
            // by zero. Anything short of that, even a very small nonzero
            // denominator, is a real (if faint) amplitude the rescale should
            // still amplify back toward the target spectrum.
            cor1[s] = if mean1 > 0.0 { spec1[s] / mean1 } else { 0.0 };
            cor2[s] = if mean2 > 0.0 { spec2[s] / mean2 } else { 0.0 };
        }
    }

    let nf = half1.folded_side();
    let centred = |q: usize| -> f64 {
        if q < n / 2 + 1 {
            q as f64
        } else {
            q as f64 - n as f64
        }
    };
    let shell_of = |flat: usize| -> usize {
        let i = flat % nf;
        let rest = flat / nf;
        let j = rest % n;
        let k = rest / n;
        let kf = centred(k);
        let jf = centred(j);
        let if_ = centred(i);
        ((kf * kf + jf * jf + if_ * if_).abs().sqrt() * 2.0) as usize
    };
    let orig1 = half1.as_slice().to_vec();
    let orig2 = half2.as_slice().to_vec();
    let _ = len;
    pf.map_strided(half1.as_mut_slice(), |flat| {
        let s = shell_of(flat);
        if s >= n {
            Complex::new(0.0, 0.0)
        } else {
            orig1[flat] * cor1[s]
        }
    })
    .expect("apply_spectrum worker failure (half1)");
    pf.map_strided(half2.as_mut_slice(), |flat| {
        let s = shell_of(flat);
        if s >= n {
            Complex::new(0.0, 0.0)
        } else {
            orig2[flat] * cor2[s]
        }
    })
    .expect("apply_spectrum worker failure (half2)");
}

struct AmplitudeBins {
    n: Vec<u64>,
    amp1: Vec<f64>,
    amp2: Vec<f64>,
}

fn radial_spectrum_amplitude_only(
    a: &ComplexVolume,
    b: &ComplexVolume,
    pf: &ParallelFor,
) -> AmplitudeBins {
    let n = a.side();
    let len = a.as_slice().len();
    let identity = (vec![0u64; n], vec![0.0f64; n], vec![0.0f64; n]);
    let (counts, amp1, amp2) = pf
        .for_each_strided_reduce(
            len,
            identity,
            |flat, acc| {
                let (k, j, i) = coords(a, flat);
                let kf = a.centred_freq(k);
                let jf = a.centred_freq(j);
                let if_ = a.centred_freq(i);
                let s = ((kf * kf + jf * jf + if_ * if_).abs().sqrt() * 2.0) as usize;
                if s >= n {
                    return;
                }
                let x = a.as_slice()[flat];
                let y = b.as_slice()[flat];
                acc.1[s] += (x * x.conj()).re.abs().sqrt();
                acc.2[s] += (y * y.conj()).re.abs().sqrt();
                acc.0[s] += 1;
            },
            |partials| {
                let mut total = (vec![0u64; n], vec![0.0f64; n], vec![0.0f64; n]);
                for (pn, p1, p2) in partials {
                    for s in 0..n {
                        total.0[s] += pn[s];
                        total.1[s] += p1[s];
                        total.2[s] += p2[s];
                    }
                }
                total
            },
        )
        .expect("radial spectrum amplitude worker failure");
    AmplitudeBins { n: counts, amp1, amp2 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_volume(n: usize) -> ComplexVolume {
        let mut v = ComplexVolume::zeros(n);
        let idx = v.index(0, 0, 0);
        v.as_mut_slice()[idx] = Complex::new(1.0, 0.0);
        v
    }

    #[test]
    fn fsc_of_identical_volumes_is_one() {
        let n = 8;
        let v = delta_volume(n);
        let pf = ParallelFor::with_workers(2);
        let score = fsc(&v, &v, &pf);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn lowpass_at_dc_passes_unattenuated() {
        let n = 8;
        let v = delta_volume(n);
        let pf = ParallelFor::with_workers(2);
        let out = lowpass(&v, 0.4, &pf);
        let idx = out.index(0, 0, 0);
        assert!((out.as_slice()[idx].re - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bandpass_is_lowpass_difference() {
        let n = 8;
        let v = delta_volume(n);
        let pf = ParallelFor::with_workers(2);
        let lo_hi = lowpass(&v, 0.3, &pf);
        let lo_lo = lowpass(&v, 0.1, &pf);
        let band = bandpass(&v, 0.1, 0.3, &pf);
        let idx = band.index(1, 0, 0);
        let expect = lo_hi.as_slice()[idx] - lo_lo.as_slice()[idx];
        assert!((band.as_slice()[idx] - expect).norm() < 1e-9);
    }

    #[test]
    fn radial_spectrum_returns_default_maxres_for_flat_signal() {
        let n = 16;
        let mut a = ComplexVolume::zeros(n);
        let mut b = ComplexVolume::zeros(n);
        for v in a.as_mut_slice() {
            *v = Complex::new(1.0, 0.0);
        }
        for v in b.as_mut_slice() {
            *v = Complex::new(1.0, 0.0);
        }
        let pf = ParallelFor::with_workers(3);
        let spectrum = radial_spectrum(&a, &b, &pf);
        assert!(spectrum.maxres > 0.0);
    }
}

