//! Sub-pixel sampling of detector-grid images.
//!
//! Out-of-bounds samples clamp to the nearest edge pixel.

use common::Buffer2;

/// Bicubic kernel value (Catmull-Rom spline).
///
/// W(x) = (a+2)|x|^3 - (a+3)|x|^2 + 1       for |x| <= 1
/// W(x) = a|x|^3 - 5a|x|^2 + 8a|x| - 4a     for 1 < |x| < 2
/// W(x) = 0                                  otherwise
///
/// where a = -0.5 for Catmull-Rom spline
#[inline]
pub(crate) fn bicubic_kernel(x: f64) -> f64 {
    const A: f64 = -0.5;

    let abs_x = x.abs();

    if abs_x <= 1.0 {
        ((A + 2.0) * abs_x - (A + 3.0)) * abs_x * abs_x + 1.0
    } else if abs_x < 2.0 {
        ((A * abs_x - 5.0 * A) * abs_x + 8.0 * A) * abs_x - 4.0 * A
    } else {
        0.0
    }
}

/// Read a pixel, clamping coordinates to the image.
#[inline]
pub(crate) fn sample_clamped<T: Copy + Into<f64>>(data: &Buffer2<T>, x: isize, y: isize) -> f64 {
    let cx = x.clamp(0, data.width() as isize - 1) as usize;
    let cy = y.clamp(0, data.height() as isize - 1) as usize;
    data[(cx, cy)].into()
}

/// Bilinear interpolation.
pub fn interpolate_bilinear<T: Copy + Into<f64>>(data: &Buffer2<T>, x: f64, y: f64) -> f64 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as isize, y0 as isize);

    let p00 = sample_clamped(data, x0, y0);
    let p10 = sample_clamped(data, x0 + 1, y0);
    let p01 = sample_clamped(data, x0, y0 + 1);
    let p11 = sample_clamped(data, x0 + 1, y0 + 1);

    let top = p00 + fx * (p10 - p00);
    let bottom = p01 + fx * (p11 - p01);

    top + fy * (bottom - top)
}

/// Bicubic interpolation.
pub fn interpolate_bicubic<T: Copy + Into<f64>>(data: &Buffer2<T>, x: f64, y: f64) -> f64 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as isize, y0 as isize);

    let wx = [
        bicubic_kernel(fx + 1.0),
        bicubic_kernel(fx),
        bicubic_kernel(fx - 1.0),
        bicubic_kernel(fx - 2.0),
    ];
    let wy = [
        bicubic_kernel(fy + 1.0),
        bicubic_kernel(fy),
        bicubic_kernel(fy - 1.0),
        bicubic_kernel(fy - 2.0),
    ];

    let mut sum = 0.0;
    for (j, &wyj) in wy.iter().enumerate() {
        let py = y0 - 1 + j as isize;
        for (i, &wxi) in wx.iter().enumerate() {
            let px = x0 - 1 + i as isize;
            sum += sample_clamped(data, px, py) * wxi * wyj;
        }
    }
    sum
}

/// The four grid neighbors of `(x, y)` with their bilinear weights.
///
/// Used to splat a value onto a grid; neighbors may lie outside it.
pub(crate) fn bilinear_footprint(x: f64, y: f64) -> [(isize, isize, f64); 4] {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as isize, y0 as isize);
    [
        (x0, y0, (1.0 - fx) * (1.0 - fy)),
        (x0 + 1, y0, fx * (1.0 - fy)),
        (x0, y0 + 1, (1.0 - fx) * fy),
        (x0 + 1, y0 + 1, fx * fy),
    ]
}
