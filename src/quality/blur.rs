use tracing::warn;

/// Outcome of the pure blur check. `variance` is absent when the image
/// could not be decoded (the check then fails open to not-blurry).
#[derive(Debug, Clone, Copy)]
pub struct BlurVerdict {
    pub is_blurry: bool,
    pub variance: Option<f64>,
}

/// Flag an image as blurry when the variance of its Laplacian magnitudes
/// falls below `threshold`. Low variance means little high-frequency
/// detail, which correlates with motion blur or poor focus. Decode
/// failures fail open: an unreadable photo is not rejected here.
pub fn detect_blur(bytes: &[u8], threshold: f64) -> BlurVerdict {
    match laplacian_variance(bytes) {
        Some(variance) => BlurVerdict {
            is_blurry: variance < threshold,
            variance: Some(variance),
        },
        None => {
            warn!(
                target = "snaplist.quality",
                "image not decodable for blur check, failing open"
            );
            BlurVerdict {
                is_blurry: false,
                variance: None,
            }
        }
    }
}

/// Grayscale the image, take |4*center - up - down - left - right| at
/// every interior pixel, then return the variance of those magnitudes.
fn laplacian_variance(bytes: &[u8]) -> Option<f64> {
    let image = image::load_from_memory(bytes).ok()?;
    let gray = image.to_luma8();
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return None;
    }

    let mut magnitudes = Vec::with_capacity(((width - 2) * (height - 2)) as usize);
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = gray.get_pixel(x, y)[0] as i32;
            let up = gray.get_pixel(x, y - 1)[0] as i32;
            let down = gray.get_pixel(x, y + 1)[0] as i32;
            let left = gray.get_pixel(x - 1, y)[0] as i32;
            let right = gray.get_pixel(x + 1, y)[0] as i32;
            let laplacian = 4 * center - up - down - left - right;
            magnitudes.push(laplacian.abs() as f64);
        }
    }

    let count = magnitudes.len() as f64;
    let mean = magnitudes.iter().sum::<f64>() / count;
    let variance = magnitudes
        .iter()
        .map(|magnitude| (magnitude - mean).powi(2))
        .sum::<f64>()
        / count;
    Some(variance)
}
