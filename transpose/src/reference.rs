//! Scalar versions of both relayouts, used to check generated kernels.

use itertools::iproduct;
use tj_util::LANES;
use tj_util::transpose::transpose_strided;

use crate::config::TransposeConfig;
use crate::tile::TileShape;

/// What a tile relayout kernel for `conf` writes to `dst` for the source row `src`.
///
/// `src` holds `conf.iw` positions of `LANES` channels; `dst` holds `LANES` rows of `conf.tr_iw`.
/// Every element of `dst` is written, unless the row is empty, in which case `dst` is left
/// untouched, pads included.
pub fn tile_rows_reference(conf: &TransposeConfig, src: &[f32], dst: &mut [f32]) {
    let (iw, tr_iw, l_pad) = (conf.iw, conf.tr_iw, conf.l_pad);
    assert!(src.len() >= iw * LANES);
    assert!(dst.len() >= LANES * tr_iw);
    assert!(l_pad + iw <= tr_iw);
    if iw == 0 {
        return;
    }

    for row in dst.chunks_exact_mut(tr_iw).take(LANES) {
        row[..l_pad].fill(0.0);
        row[l_pad + iw..].fill(0.0);
    }
    transpose_strided(src, LANES, &mut dst[l_pad..], tr_iw, LANES, iw);
}

/// What a single-tile kernel for `shape` writes to `dst`, rows `tr_stride` apart.
///
/// Elements outside `l_pad + nrows + r_pad` of each row are left untouched, as are all rows when
/// the tile is empty.
pub fn tile_reference(shape: TileShape, src: &[f32], dst: &mut [f32], tr_stride: usize) {
    let TileShape {
        nrows,
        l_pad,
        r_pad,
        ..
    } = shape;
    if nrows == 0 {
        return;
    }
    for row in 0..LANES {
        let base = row * tr_stride;
        dst[base..base + l_pad].fill(0.0);
        dst[base + l_pad + nrows..base + l_pad + nrows + r_pad].fill(0.0);
    }
    transpose_strided(src, LANES, &mut dst[l_pad..], tr_stride, LANES, nrows);
}

/// Inverse of [`tile_reference`]: recovers the `nrows` source rows from a relayouted tile.
#[must_use]
pub fn inverse_tile(dst: &[f32], tr_stride: usize, l_pad: usize, nrows: usize) -> Vec<f32> {
    let mut src = vec![0.0; nrows * LANES];
    if nrows > 0 {
        transpose_strided(&dst[l_pad..], tr_stride, &mut src, LANES, nrows, LANES);
    }
    src
}

/// What a strided relayout kernel for `conf` writes for source rows `ih_start..ih_end`.
///
/// `src` holds rows of `conf.iw` elements, `dst` rows of `conf.stride_w * conf.tr_ld` elements.
/// Source elements past `iw` read as zero.
pub fn strided_reference(
    conf: &TransposeConfig,
    src: &[f32],
    dst: &mut [f32],
    ih_start: usize,
    ih_end: usize,
) {
    let (iw, tr_ld) = (conf.iw, conf.tr_ld);
    let groups = conf.strided_iters() * LANES;
    let step = conf.strided_dst_step();

    for ih in ih_start..ih_end {
        let src_row = &src[ih * iw..(ih + 1) * iw];
        let dst_row = &mut dst[ih * step..];
        for (plane, m) in iproduct!(0..4, 0..groups) {
            dst_row[plane * tr_ld + m] = src_row.get(4 * m + plane).copied().unwrap_or(0.0);
        }
    }
}
