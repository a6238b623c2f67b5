use serde::{Deserialize, Serialize};
use tj_util::{LANES, lane_mask};

/// Size in bytes of one relayouted element.
pub const TYPESIZE: usize = size_of::<f32>();

/// Spatial widths up to this value are handled without software prefetch.
pub const SMALL_SPATIAL: usize = 14;

/// Upper bound on the number of 16-element groups per plane for the strided relayout.
pub const MAX_STRIDED_ITERS: usize = 4;

/// The convolution implementation the relayout feeds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvAlgorithm {
    Fma,
    /// Backward-by-weights path built on 4-FMA instructions. The only one served here.
    #[default]
    FourFma,
    Vnni,
    FourVnni,
}

/// Shape of a source relayout, as derived by the convolution setup.
///
/// Widths, pads and leading dimensions are in elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TransposeConfig {
    pub ver: ConvAlgorithm,
    /// Selects the strided 4-wide relayout used by first-layer convolutions.
    pub is_1stconv: bool,
    /// Channels per block. Must equal the vector width.
    pub ic_block: usize,
    /// Input spatial width.
    pub iw: usize,
    /// Padded spatial width of the relayouted rows.
    pub tr_iw: usize,
    pub l_pad: usize,
    pub stride_w: usize,
    /// Distance between planes of the strided relayout.
    pub tr_ld: usize,
    /// Number of workers cooperating on one strided relayout.
    pub nthr: usize,
}

impl Default for TransposeConfig {
    fn default() -> Self {
        Self {
            ver: ConvAlgorithm::FourFma,
            is_1stconv: false,
            ic_block: LANES,
            iw: LANES,
            tr_iw: LANES,
            l_pad: 0,
            stride_w: 1,
            tr_ld: LANES,
            nthr: 1,
        }
    }
}

impl TransposeConfig {
    #[must_use]
    pub const fn with_ver(mut self, ver: ConvAlgorithm) -> Self {
        self.ver = ver;
        self
    }

    #[must_use]
    pub const fn with_first_conv(mut self, is_1stconv: bool) -> Self {
        self.is_1stconv = is_1stconv;
        self
    }

    #[must_use]
    pub const fn with_ic_block(mut self, ic_block: usize) -> Self {
        self.ic_block = ic_block;
        self
    }

    /// Sets the input width and the padded width together.
    #[must_use]
    pub const fn with_widths(mut self, iw: usize, tr_iw: usize) -> Self {
        self.iw = iw;
        self.tr_iw = tr_iw;
        self
    }

    #[must_use]
    pub const fn with_l_pad(mut self, l_pad: usize) -> Self {
        self.l_pad = l_pad;
        self
    }

    #[must_use]
    pub const fn with_stride_w(mut self, stride_w: usize) -> Self {
        self.stride_w = stride_w;
        self
    }

    #[must_use]
    pub const fn with_tr_ld(mut self, tr_ld: usize) -> Self {
        self.tr_ld = tr_ld;
        self
    }

    #[must_use]
    pub const fn with_nthr(mut self, nthr: usize) -> Self {
        self.nthr = nthr;
        self
    }

    /// Number of 16-row tiles covering one input row.
    #[must_use]
    pub const fn tile_count(&self) -> usize {
        self.iw.div_ceil(LANES)
    }

    /// Zero elements written after the last input column.
    ///
    /// Zero when the padded width does not leave room, which only happens for invalid configs.
    #[must_use]
    pub const fn right_pad(&self) -> usize {
        self.tr_iw.saturating_sub(self.iw + self.l_pad)
    }

    /// Distance in bytes between consecutive source rows of the tile relayout.
    #[must_use]
    pub const fn src_stride_bytes(&self) -> usize {
        self.ic_block * TYPESIZE
    }

    /// Distance in bytes between consecutive destination rows of the tile relayout.
    #[must_use]
    pub const fn tr_src_stride_bytes(&self) -> usize {
        self.tr_iw * TYPESIZE
    }

    /// Number of 16-element groups written per plane by the strided relayout.
    #[must_use]
    pub const fn strided_iters(&self) -> usize {
        self.tr_ld / LANES
    }

    /// Load mask for the last partial vector of a strided row, if the width leaves one.
    #[must_use]
    pub const fn tail_mask(&self) -> Option<u16> {
        match self.iw % LANES {
            0 => None,
            rem => Some(lane_mask(rem)),
        }
    }

    #[must_use]
    pub const fn enable_prefetch(&self) -> bool {
        self.iw > SMALL_SPATIAL
    }

    /// Elements one destination row of the tile relayout spans: `LANES` rows of `tr_iw`.
    #[must_use]
    pub const fn tile_dst_len(&self) -> usize {
        self.ic_block * self.tr_iw
    }

    /// Distance in elements between the destinations of consecutive strided rows.
    #[must_use]
    pub const fn strided_dst_step(&self) -> usize {
        self.stride_w * self.tr_ld
    }
}
