use anyhow::{anyhow, ensure, Result};

pub const MAX_IMAGE_BYTES: usize = 20_000_000;
pub const MAX_VIDEO_BYTES: usize = 200_000_000;
pub const MAX_IMAGE_SIDE: u32 = 2048;
const WEBP_QUALITY: f32 = 75.0;

/// Everything stored for one recipe lives under this prefix
pub fn recipe_media_prefix(uid: &str, recipe_id: &str) -> String {
    format!("users/{uid}/recipes/{recipe_id}/")
}

pub fn image_path(uid: &str, recipe_id: &str, name: &str) -> String {
    format!("{}images/{name}.webp", recipe_media_prefix(uid, recipe_id))
}

pub fn video_path(uid: &str, recipe_id: &str, name: &str, extension: &str) -> String {
    format!(
        "{}videos/{name}.{extension}",
        recipe_media_prefix(uid, recipe_id)
    )
}

/// Check that an upload is a real image and re-encode it as lossy webp,
/// shrinking it to fit in 2048x2048 first if needed.
pub fn normalize_image(content_bytes: &[u8]) -> Result<Vec<u8>> {
    ensure!(
        content_bytes.len() < MAX_IMAGE_BYTES,
        "Image is too large"
    );
    let mut img = image::load_from_memory(content_bytes)?;
    if img.width() > MAX_IMAGE_SIDE || img.height() > MAX_IMAGE_SIDE {
        img = img.resize(
            MAX_IMAGE_SIDE,
            MAX_IMAGE_SIDE,
            image::imageops::FilterType::Lanczos3,
        );
    }
    // The webp encoder only accepts 8 bit RGB(A)
    let img = image::DynamicImage::ImageRgba8(img.to_rgba8());
    let encoded = webp::Encoder::from_image(&img)
        .map_err(|e| anyhow!("WebP encoding error: {}", e))?
        .encode(WEBP_QUALITY);
    Ok(encoded.to_vec())
}

/// Check a video upload and pick the file extension to store it under
pub fn check_video(content_bytes: &[u8], content_type: Option<&str>) -> Result<&'static str> {
    ensure!(!content_bytes.is_empty(), "Video is empty");
    ensure!(
        content_bytes.len() < MAX_VIDEO_BYTES,
        "Video is too large"
    );
    Ok(video_extension(content_type))
}

pub fn video_extension(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some("video/quicktime") => "mov",
        Some("video/webm") => "webm",
        Some("video/x-matroska") => "mkv",
        Some("video/x-msvideo") => "avi",
        _ => "mp4",
    }
}

pub fn video_content_type(extension: &str) -> &'static str {
    match extension {
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        _ => "video/mp4",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
        let mut out = Cursor::new(vec![]);
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn images_become_webp() {
        let webp = normalize_image(&png_bytes(8, 4)).unwrap();
        assert_eq!(&webp[0..4], b"RIFF");
        assert_eq!(&webp[8..12], b"WEBP");
        let decoded = image::load_from_memory(&webp).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
    }

    #[test]
    fn large_images_are_shrunk_to_fit() {
        let webp = normalize_image(&png_bytes(2560, 640)).unwrap();
        let decoded = image::load_from_memory(&webp).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (2048, 512));
    }

    #[test]
    fn non_images_are_rejected() {
        assert!(normalize_image(b"definitely not a picture").is_err());
    }

    #[test]
    fn video_checks() {
        assert_eq!(check_video(&[1], Some("video/quicktime")).unwrap(), "mov");
        assert_eq!(check_video(&[1], None).unwrap(), "mp4");
        assert!(check_video(&[], None).is_err());
        assert_eq!(video_content_type("webm"), "video/webm");
    }

    #[test]
    fn media_paths_share_the_recipe_prefix() {
        let prefix = recipe_media_prefix("u1", "r1");
        assert!(image_path("u1", "r1", "x").starts_with(&prefix));
        assert!(video_path("u1", "r1", "y", "mp4").starts_with(&prefix));
        assert_eq!(image_path("u1", "r1", "x"), "users/u1/recipes/r1/images/x.webp");
    }
}
