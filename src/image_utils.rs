use image::{imageops, GrayImage, Luma, Rgb};
use imageproc::rect::Rect;

pub const WHITE: Luma<u8> = Luma([u8::MAX]);
pub const BLACK: Luma<u8> = Luma([u8::MIN]);

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const CYAN: Rgb<u8> = Rgb([0, 255, 255]);
pub const PINK: Rgb<u8> = Rgb([255, 0, 255]);

pub const RAINBOW: [Rgb<u8>; 7] = [
    Rgb([255, 0, 0]),
    Rgb([255, 127, 0]),
    Rgb([255, 255, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 0, 255]),
    Rgb([75, 0, 130]),
    Rgb([143, 0, 255]),
];

/// Resizes an image to exactly the given dimensions, ignoring aspect ratio.
pub fn size_image_to_fit(img: &GrayImage, width: u32, height: u32) -> GrayImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    imageops::resize(img, width, height, imageops::FilterType::Triangle)
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into `tiles` x `tiles` regions. Each region gets its
/// own equalization mapping built from a histogram whose bins are clipped at
/// `clip_limit` times the mean bin height, with the clipped excess spread
/// evenly over all bins. Every pixel is mapped by bilinearly blending the
/// mappings of the four nearest tile centers, so tile seams do not show.
pub fn equalize_adaptive(img: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (width, height) = img.dimensions();
    let tiles_x = tiles.clamp(1, width.max(1));
    let tiles_y = tiles.clamp(1, height.max(1));
    if width == 0 || height == 0 {
        return img.clone();
    }

    let tile_width = (width as f32 / tiles_x as f32).max(1.0);
    let tile_height = (height as f32 / tiles_y as f32).max(1.0);

    let mut mappings = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = (tx as f32 * tile_width) as u32;
            let y0 = (ty as f32 * tile_height) as u32;
            let x1 = (((tx + 1) as f32 * tile_width) as u32).min(width);
            let y1 = (((ty + 1) as f32 * tile_height) as u32).min(height);
            mappings.push(clipped_equalization_mapping(img, x0, y0, x1, y1, clip_limit));
        }
    }

    let mut out = GrayImage::new(width, height);
    for (x, y, pixel) in img.enumerate_pixels() {
        // position relative to tile centers
        let gx = (x as f32 + 0.5) / tile_width - 0.5;
        let gy = (y as f32 + 0.5) / tile_height - 0.5;
        let tx0 = gx.floor().clamp(0.0, (tiles_x - 1) as f32) as u32;
        let ty0 = gy.floor().clamp(0.0, (tiles_y - 1) as f32) as u32;
        let tx1 = (tx0 + 1).min(tiles_x - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let fx = (gx - tx0 as f32).clamp(0.0, 1.0);
        let fy = (gy - ty0 as f32).clamp(0.0, 1.0);

        let value = pixel.0[0] as usize;
        let at = |tx: u32, ty: u32| mappings[(ty * tiles_x + tx) as usize][value] as f32;
        let top = at(tx0, ty0) * (1.0 - fx) + at(tx1, ty0) * fx;
        let bottom = at(tx0, ty1) * (1.0 - fx) + at(tx1, ty1) * fx;
        let mapped = top * (1.0 - fy) + bottom * fy;

        out.put_pixel(x, y, Luma([mapped.round().clamp(0.0, 255.0) as u8]));
    }

    out
}

fn clipped_equalization_mapping(
    img: &GrayImage,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    clip_limit: f32,
) -> [u8; 256] {
    let mut histogram = [0f32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            histogram[img.get_pixel(x, y).0[0] as usize] += 1.0;
        }
    }

    let total: f32 = histogram.iter().sum();
    let mut mapping = [0u8; 256];
    if total == 0.0 {
        for (i, m) in mapping.iter_mut().enumerate() {
            *m = i as u8;
        }
        return mapping;
    }

    let limit = (clip_limit * total / 256.0).max(1.0);
    let excess: f32 = histogram.iter().map(|&h| (h - limit).max(0.0)).sum();
    let bonus = excess / 256.0;
    for h in histogram.iter_mut() {
        *h = h.min(limit) + bonus;
    }

    let mut cumulative = 0.0;
    for (i, h) in histogram.iter().enumerate() {
        cumulative += h;
        mapping[i] = (cumulative / total * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    mapping
}

/// Collects the luma values inside `rect`, clipped to the image bounds.
pub fn region_values(img: &GrayImage, rect: &Rect) -> Vec<u8> {
    let x0 = rect.left().max(0) as u32;
    let y0 = rect.top().max(0) as u32;
    let x1 = ((rect.right() + 1).max(0) as u32).min(img.width());
    let y1 = ((rect.bottom() + 1).max(0) as u32).min(img.height());

    let mut values = Vec::with_capacity((x1.saturating_sub(x0) * y1.saturating_sub(y0)) as usize);
    for y in y0..y1 {
        for x in x0..x1 {
            values.push(img.get_pixel(x, y).0[0]);
        }
    }
    values
}

/// Nearest-rank percentile of `values` (`p` in 0..=100). `values` must be
/// sorted ascending.
pub fn percentile_of_sorted(values: &[u8], p: f32) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let rank = ((p / 100.0) * (values.len() - 1) as f32).round() as usize;
    Some(values[rank.min(values.len() - 1)] as f32)
}

/// Percentile of all pixels in an image.
pub fn image_percentile(img: &GrayImage, p: f32) -> Option<f32> {
    let mut histogram = [0usize; 256];
    for pixel in img.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }
    let total: usize = histogram.iter().sum();
    if total == 0 {
        return None;
    }

    let rank = ((p / 100.0) * (total - 1) as f32).round() as usize;
    let mut seen = 0;
    for (value, count) in histogram.iter().enumerate() {
        seen += count;
        if seen > rank {
            return Some(value as f32);
        }
    }
    Some(255.0)
}
