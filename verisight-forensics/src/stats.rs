/*!
Pixel statistics used by the built-in detectors
*/

/// JPEG codes pixels in 8x8 blocks.
const JPEG_BLOCK: u32 = 8;

/// Reported when block interiors are perfectly flat but their edges are not.
const BLOCKINESS_CEILING: f64 = 255.0;

/// Single-channel luminance plane with values in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct LumaPlane {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl LumaPlane {
    /// Rec. 601 luma from interleaved RGB8.
    pub fn from_rgb(width: u32, height: u32, rgb: &[u8]) -> Self {
        let values = rgb
            .chunks_exact(3)
            .map(|px| (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32) / 255.0)
            .collect();
        Self {
            width,
            height,
            values,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[(y * self.width + x) as usize]
    }

    /// Absolute 4-neighbour Laplacian at an interior pixel.
    #[inline]
    fn laplacian(&self, x: u32, y: u32) -> f64 {
        let center = 4.0 * self.get(x, y);
        let around = self.get(x - 1, y) + self.get(x + 1, y) + self.get(x, y - 1) + self.get(x, y + 1);
        (center - around).abs() as f64
    }
}

/// Mean absolute Laplacian over the interior of the plane.
///
/// Camera sensor noise keeps this well above zero; heavily denoised or
/// synthesized images sit close to it.
pub fn high_frequency_energy(plane: &LumaPlane) -> f64 {
    if plane.width < 3 || plane.height < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for y in 1..plane.height - 1 {
        for x in 1..plane.width - 1 {
            sum += plane.laplacian(x, y);
        }
    }
    sum / ((plane.width - 2) as f64 * (plane.height - 2) as f64)
}

/// Noise estimate for one square tile of the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockNoise {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub noise: f64,
}

/// Per-tile mean absolute Laplacian, row-major. Partial tiles at the right
/// and bottom edges are skipped.
pub fn block_noise(plane: &LumaPlane, block: u32) -> Vec<BlockNoise> {
    let block = block.max(4);
    let mut blocks = Vec::new();
    let mut y0 = 0;
    while y0 + block <= plane.height {
        let mut x0 = 0;
        while x0 + block <= plane.width {
            let mut sum = 0.0;
            let mut count = 0usize;
            for y in y0.max(1)..(y0 + block).min(plane.height - 1) {
                for x in x0.max(1)..(x0 + block).min(plane.width - 1) {
                    sum += plane.laplacian(x, y);
                    count += 1;
                }
            }
            if count > 0 {
                blocks.push(BlockNoise {
                    x: x0,
                    y: y0,
                    width: block,
                    height: block,
                    noise: sum / count as f64,
                });
            }
            x0 += block;
        }
        y0 += block;
    }
    blocks
}

/// Ratio of horizontal gradient across 8-pixel boundaries to the gradient
/// inside blocks. About 1.0 for natural images, higher when JPEG block
/// edges are visible.
pub fn grid_blockiness(plane: &LumaPlane) -> f64 {
    if plane.width < JPEG_BLOCK * 2 {
        return 1.0;
    }
    let (mut boundary, mut boundary_n) = (0.0f64, 0usize);
    let (mut inner, mut inner_n) = (0.0f64, 0usize);
    for y in 0..plane.height {
        for x in 0..plane.width - 1 {
            let diff = (plane.get(x + 1, y) - plane.get(x, y)).abs() as f64;
            if (x + 1) % JPEG_BLOCK == 0 {
                boundary += diff;
                boundary_n += 1;
            } else {
                inner += diff;
                inner_n += 1;
            }
        }
    }
    if boundary_n == 0 || inner_n == 0 {
        return 1.0;
    }
    let boundary_mean = boundary / boundary_n as f64;
    let inner_mean = inner / inner_n as f64;
    if inner_mean < 1e-6 {
        if boundary_mean < 1e-6 { 1.0 } else { BLOCKINESS_CEILING }
    } else {
        boundary_mean / inner_mean
    }
}

/// Fraction of channel samples pinned at 0 or 255.
pub fn clipping_ratio(rgb: &[u8]) -> f64 {
    if rgb.is_empty() {
        return 0.0;
    }
    let clipped = rgb.iter().filter(|&&v| v == 0 || v == u8::MAX).count();
    clipped as f64 / rgb.len() as f64
}

/// Median of a slice; sorts in place. Zero for an empty slice.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
