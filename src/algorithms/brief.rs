use bitarray::BitArray;
use image::GrayImage;
use once_cell::sync::Lazy;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

pub const DESCRIPTOR_BYTES: usize = 256 / u8::BITS as usize;

/// 256-bit BRIEF descriptor.
pub type Descriptor = [u8; DESCRIPTOR_BYTES];

/// Compute BRIEF (Binary Robust Independent Elementary Features) on a given grayscale image
/// around the target pixel.
///
/// Sample offsets are clamped to `half_window`, so the descriptor only looks at the
/// `(2 * half_window + 1)^2` patch around the pixel. Samples falling outside the
/// image read as `0`.
pub fn compute_descriptor(x: u32, y: u32, image: &GrayImage, half_window: i32) -> Descriptor {
    const BITS: usize = u8::BITS as _;

    let (width, height) = (image.width() as i32, image.height() as i32);
    let intensity = |dx: i32, dy: i32| {
        let px = x as i32 + dx.clamp(-half_window, half_window);
        let py = y as i32 + dy.clamp(-half_window, half_window);
        if px >= 0 && px < width && py >= 0 && py < height {
            image.get_pixel(px as u32, py as u32).0[0]
        } else {
            0
        }
    };

    let mut descriptor = [0; DESCRIPTOR_BYTES];
    for (i, byte) in descriptor.iter_mut().enumerate() {
        for j in 0..BITS {
            let [p1x, p1y, p2x, p2y] = BRIEF_SAMPLES[i * BITS + j];
            if intensity(p1x, p1y) > intensity(p2x, p2y) {
                *byte |= 1 << j;
            }
        }
    }

    descriptor
}

/// Number of differing bits between two descriptors.
pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    BitArray::new(*a).distance(&BitArray::new(*b))
}

/// Precomputed BRIEF point pairs.
/// The values remain consistent across frames and runs so that descriptors from the
/// two stereo images are comparable.
static BRIEF_SAMPLES: Lazy<[[i32; 4]; DESCRIPTOR_BYTES * 8]> = Lazy::new(|| {
    let mut rng = StdRng::seed_from_u64(42);

    // isotropic gaussian with sigma = 2 pixels, most samples land in a 9x9 patch
    const SIGMA: f64 = 2.0;
    let mut sample = || (rng.sample::<f64, _>(StandardNormal) * SIGMA).round() as i32;

    let mut samples = [[0; 4]; DESCRIPTOR_BYTES * 8];
    for pair in samples.iter_mut() {
        *pair = [sample(), sample(), sample(), sample()];
    }

    samples
});
