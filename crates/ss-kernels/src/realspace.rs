//! Radial soft mask synthesis and elementwise volume combination.
//!
//! Ported from `realspace.c`'s `make_mask_thread`/`add_map_thread`/
//! `apply_mask_thread`.

use ss_core::{Mask, Volume};
use ss_fft::ParallelFor;

/// Synthesise a radial soft mask of cutoff radius `rad` (voxels) about the
/// cube centre: `1 / sqrt(1 + (r^2/rad^2)^8)`.
pub fn synthesize_mask(side: usize, rad: f64, pf: &ParallelFor) -> Mask {
    let centre = side as f64 / 2.0;
    let rad2 = rad * rad;
    let mut volume = Volume::zeros(side);
    pf.map_strided(volume.as_mut_slice(), |flat| {
        let i = flat % side;
        let rest = flat / side;
        let j = rest % side;
        let k = rest / side;
        let dk = k as f64 - centre;
        let dj = j as f64 - centre;
        let di = i as f64 - centre;
        let r2 = dk * dk + dj * dj + di * di;
        1.0 / (1.0 + (r2 / rad2).powi(8)).sqrt()
    })
    .expect("mask synthesis worker failure");
    let (mask, _clamped) = Mask::from_volume_clamped(volume);
    mask
}

/// `out += in`, element-wise.
pub fn add_volume(out: &mut Volume, input: &Volume, pf: &ParallelFor) {
    let addend = input.as_slice().to_vec();
    let base = out.as_slice().to_vec();
    pf.map_strided(out.as_mut_slice(), |flat| base[flat] + addend[flat])
        .expect("add_volume worker failure");
}

/// `out *= mask`, element-wise.
pub fn apply_mask(out: &mut Volume, mask: &Mask, pf: &ParallelFor) {
    let factors = mask.volume().as_slice().to_vec();
    let base = out.as_slice().to_vec();
    pf.map_strided(out.as_mut_slice(), |flat| base[flat] * factors[flat])
        .expect("apply_mask worker failure");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_matches_closed_form_at_every_voxel() {
        let n = 16;
        let rad = (n / 4) as f64;
        let pf = ParallelFor::with_workers(3);
        let mask = synthesize_mask(n, rad, &pf);
        let centre = n as f64 / 2.0;
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    let dk = k as f64 - centre;
                    let dj = j as f64 - centre;
                    let di = i as f64 - centre;
                    let r2 = dk * dk + dj * dj + di * di;
                    let expect = 1.0 / (1.0 + (r2 / (rad * rad)).powi(8)).sqrt();
                    let idx = (k * n + j) * n + i;
                    assert!((mask.at(idx) - expect).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn mask_values_stay_in_unit_interval() {
        let n = 10;
        let pf = ParallelFor::with_workers(2);
        let mask = synthesize_mask(n, 3.0, &pf);
        assert!(mask.volume().as_slice().iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn apply_mask_is_noop_for_all_ones() {
        let n = 4;
        let pf = ParallelFor::with_workers(2);
        let (mask, _) = Mask::from_volume_clamped(Volume::from_data(n, vec![1.0; n * n * n]));
        let data: Vec<f64> = (0..n * n * n).map(|i| i as f64).collect();
        let mut volume = Volume::from_data(n, data.clone());
        apply_mask(&mut volume, &mask, &pf);
        assert_eq!(volume.as_slice(), data.as_slice());
    }

    #[test]
    fn add_volume_accumulates_into_existing() {
        let n = 4;
        let pf = ParallelFor::with_workers(2);
        let mut out = Volume::from_data(n, vec![1.0; n * n * n]);
        let input = Volume::from_data(n, vec![2.5; n * n * n]);
        add_volume(&mut out, &input, &pf);
        assert!(out.as_slice().iter().all(|&v| v == 3.5));
    }
}
