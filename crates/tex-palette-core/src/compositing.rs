use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

/// Resamples `src` to `width` x `height` and converts it to `channels` channels.
pub fn resample(src: &DynamicImage, width: u32, height: u32, channels: u8) -> DynamicImage {
    let sized = if src.dimensions() == (width, height) {
        src.clone()
    } else {
        DynamicImage::ImageRgba8(imageops::resize(
            &src.to_rgba8(),
            width,
            height,
            FilterType::Triangle,
        ))
    };
    match channels {
        1 => DynamicImage::ImageLuma8(sized.to_luma8()),
        2 => DynamicImage::ImageLumaA8(sized.to_luma_alpha8()),
        3 => DynamicImage::ImageRgb8(sized.to_rgb8()),
        _ => DynamicImage::ImageRgba8(sized.to_rgba8()),
    }
}

/// Replaces the alpha channel of `color` with the luminance of `alpha`,
/// stretching the alpha image when the sizes differ.
pub fn merge_alpha(color: &DynamicImage, alpha: &DynamicImage) -> DynamicImage {
    let mut rgba = color.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mask = if alpha.dimensions() == (w, h) {
        alpha.to_luma8()
    } else {
        imageops::resize(&alpha.to_luma8(), w, h, FilterType::Triangle)
    };
    for (x, y, px) in rgba.enumerate_pixels_mut() {
        px[3] = mask.get_pixel(x, y)[0];
    }
    DynamicImage::ImageRgba8(rgba)
}

/// True if every pixel has equal red, green and blue.
pub fn is_grayscale(image: &DynamicImage) -> bool {
    image.pixels().all(|(_, _, p)| p[0] == p[1] && p[1] == p[2])
}

/// True if the image has an alpha channel and every alpha sample is at its maximum.
pub fn is_opaque(image: &DynamicImage) -> bool {
    image.color().has_alpha() && image.pixels().all(|(_, _, p)| p[3] == u8::MAX)
}

/// Copies `src` into `canvas` with its top-left at (dx, dy), then fills `extrude` pixels
/// around it with the nearest edge pixel.
pub fn blit_rgba(src: &RgbaImage, canvas: &mut RgbaImage, dx: u32, dy: u32, extrude: u32) {
    let (cw, ch) = canvas.dimensions();
    let (sw, sh) = src.dimensions();
    if sw == 0 || sh == 0 {
        return;
    }

    let x0 = dx.saturating_sub(extrude);
    let y0 = dy.saturating_sub(extrude);
    let x1 = (dx + sw + extrude).min(cw);
    let y1 = (dy + sh + extrude).min(ch);
    for y in y0..y1 {
        // clamp into the source so margin pixels repeat the nearest edge
        let sy = y.clamp(dy, dy + sh - 1) - dy;
        for x in x0..x1 {
            let sx = x.clamp(dx, dx + sw - 1) - dx;
            canvas.put_pixel(x, y, *src.get_pixel(sx, sy));
        }
    }
}

/// Composes one palette page from `(image, top-left, margin)` entries on a transparent canvas.
pub fn compose_page(width: u32, height: u32, entries: &[(&DynamicImage, u32, u32, u32)]) -> DynamicImage {
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    for (image, x, y, margin) in entries {
        blit_rgba(&image.to_rgba8(), &mut canvas, *x, *y, *margin);
    }
    DynamicImage::ImageRgba8(canvas)
}
