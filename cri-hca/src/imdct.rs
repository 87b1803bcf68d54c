//! 128-point IMDCT with overlap-add.
//!
//! Each subframe's 128 spectral lines expand to a 256-sample cosine-basis
//! synthesis; the first half overlaps the previous subframe's tail. The
//! windows satisfy the Princen-Bradley condition so back-to-back subframes
//! reconstruct cleanly. The 2N-sample synthesis is folded through a DCT-IV:
//!
//! ```text
//! y[n]       =  d[n + N/2]        n in [0, N/2)
//! y[n]       = -d[3N/2 - 1 - n]   n in [N/2, 3N/2)
//! y[n]       = -d[n - 3N/2]       n in [3N/2, 2N)
//! ```

use std::sync::LazyLock;

use crate::SAMPLES_PER_SUBFRAME;

const N: usize = SAMPLES_PER_SUBFRAME;

/// Orthonormal DCT-IV basis: sqrt(2/N) * cos(pi/N * (m + 1/2)(k + 1/2)).
static DCT4_BASIS: LazyLock<Box<[[f32; N]; N]>> = LazyLock::new(|| {
    let mut basis = Box::new([[0.0f32; N]; N]);
    let scale = (2.0 / N as f64).sqrt();
    for (m, row) in basis.iter_mut().enumerate() {
        for (k, v) in row.iter_mut().enumerate() {
            let angle =
                std::f64::consts::PI / N as f64 * (m as f64 + 0.5) * (k as f64 + 0.5);
            *v = (scale * angle.cos()) as f32;
        }
    }
    basis
});

/// Sine window over the full 2N span; w[i]^2 + w[i+N]^2 == 1.
static WINDOW: LazyLock<[f32; 2 * N]> = LazyLock::new(|| {
    let mut window = [0.0f32; 2 * N];
    for (i, v) in window.iter_mut().enumerate() {
        *v = (std::f64::consts::PI * (i as f64 + 0.5) / (2 * N) as f64).sin() as f32;
    }
    window
});

pub(crate) fn transform(spectra: &[f32; N], previous: &mut [f32; N], out: &mut [f32; N]) {
    let basis = &*DCT4_BASIS;
    let window = &*WINDOW;

    let mut d = [0.0f32; N];
    for (m, dv) in d.iter_mut().enumerate() {
        let mut acc = 0.0f32;
        for (k, &s) in spectra.iter().enumerate() {
            acc += s * basis[m][k];
        }
        *dv = acc;
    }

    for i in 0..N {
        let head = if i < N / 2 { d[i + N / 2] } else { -d[3 * N / 2 - 1 - i] };
        out[i] = window[i] * head + previous[i];

        let j = i + N;
        let tail = if j < 3 * N / 2 {
            -d[3 * N / 2 - 1 - j]
        } else {
            -d[j - 3 * N / 2]
        };
        previous[i] = window[j] * tail;
    }
}
