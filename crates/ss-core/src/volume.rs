use num_complex::Complex;

/// A cubic real-space volume of side `n`, indexed `(k, j, i) = k*n*n + j*n + i`.
#[derive(Debug, Clone)]
pub struct Volume {
    n: usize,
    data: Vec<f64>,
}

impl Volume {
    pub fn zeros(n: usize) -> Self {
        Volume { n, data: vec![0.0; n * n * n] }
    }

    pub fn from_data(n: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), n * n * n, "volume data length must be n^3");
        Volume { n, data }
    }

    pub fn side(&self) -> usize {
        self.n
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    #[inline]
    pub fn index(&self, k: usize, j: usize, i: usize) -> usize {
        (k * self.n + j) * self.n + i
    }

    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    /// `self += other`, element-wise.
    pub fn add_assign(&mut self, other: &Volume) {
        assert_eq!(self.n, other.n);
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += *b;
        }
    }

    /// `self *= other`, element-wise.
    pub fn mul_assign(&mut self, other: &Volume) {
        assert_eq!(self.n, other.n);
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a *= *b;
        }
    }
}

/// A soft mask volume with values constrained to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Mask(Volume);

impl Mask {
    /// Wrap a volume as a mask, clamping any out-of-range values.
    ///
    /// A mask loaded from a foreign MRC file is an input-format boundary, not
    /// an internal invariant, so out-of-range values are clamped rather than
    /// rejected.
    pub fn from_volume_clamped(mut volume: Volume) -> (Self, bool) {
        let mut clamped = false;
        for v in volume.as_mut_slice() {
            if *v < 0.0 {
                *v = 0.0;
                clamped = true;
            } else if *v > 1.0 {
                *v = 1.0;
                clamped = true;
            }
        }
        (Mask(volume), clamped)
    }

    pub fn volume(&self) -> &Volume {
        &self.0
    }

    pub fn side(&self) -> usize {
        self.0.side()
    }

    #[inline]
    pub fn at(&self, flat: usize) -> f64 {
        self.0.as_slice()[flat]
    }

    /// A voxel counts as mask-interior once its value reaches this threshold.
    pub const INTERIOR_THRESHOLD: f64 = 0.99;

    #[inline]
    pub fn is_interior(&self, flat: usize) -> bool {
        self.at(flat) >= Self::INTERIOR_THRESHOLD
    }
}

/// The half-Hermitian result of a real -> complex 3D DFT: shape
/// `n * n * (n/2 + 1)`, with centred-wrap frequency indexing.
#[derive(Debug, Clone)]
pub struct ComplexVolume {
    n: usize,
    nf: usize,
    data: Vec<Complex<f64>>,
}

impl ComplexVolume {
    pub fn zeros(n: usize) -> Self {
        let nf = n / 2 + 1;
        ComplexVolume { n, nf, data: vec![Complex::new(0.0, 0.0); n * n * nf] }
    }

    pub fn from_data(n: usize, data: Vec<Complex<f64>>) -> Self {
        let nf = n / 2 + 1;
        assert_eq!(data.len(), n * n * nf, "complex volume length must be n*n*(n/2+1)");
        ComplexVolume { n, nf, data }
    }

    pub fn side(&self) -> usize {
        self.n
    }

    /// The fastest-varying (Hermitian-folded) axis length, `n/2 + 1`.
    pub fn folded_side(&self) -> usize {
        self.nf
    }

    pub fn as_slice(&self) -> &[Complex<f64>] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Complex<f64>] {
        &mut self.data
    }

    #[inline]
    pub fn index(&self, k: usize, j: usize, i: usize) -> usize {
        (k * self.n + j) * self.nf + i
    }

    /// Map a wrapped axis coordinate `q` to its centred (signed) frequency,
    /// in cycles: `q` if `q < n/2 + 1`, else `q - n`.
    #[inline]
    pub fn centred_freq(&self, q: usize) -> f64 {
        if q < self.n / 2 + 1 {
            q as f64
        } else {
            q as f64 - self.n as f64
        }
    }

    /// Zero the DC (zero-frequency) component.
    pub fn zero_dc(&mut self) {
        let idx = self.index(0, 0, 0);
        self.data[idx] = Complex::new(0.0, 0.0);
    }
}
