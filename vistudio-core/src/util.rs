use std::io::Cursor;

use anyhow::{Context, Result};
use base64::{prelude::BASE64_STANDARD, Engine};
use candle_core::{DType, Device, Tensor};
use image::{imageops::FilterType, DynamicImage, ImageFormat, RgbImage};

/// Decodes an uploaded image in any supported encoding and normalizes it to RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("failed to decode image")?;
    Ok(image.to_rgb8())
}

/// Converts a u8 tensor with shape (3, height, width) into an RGB image.
pub fn tensor_to_image(img: &Tensor) -> Result<RgbImage> {
    let (channels, height, width) = img.dims3()?;
    if channels != 3 {
        anyhow::bail!("tensor_to_image expects an image with 3 channels, got {channels}");
    }
    let img = img.permute((1, 2, 0))?.flatten_all()?;
    let pixels = img.to_vec1::<u8>()?;
    RgbImage::from_raw(width as u32, height as u32, pixels)
        .context("error converting tensor to image buffer")
}

/// Resizes to a `size`x`size` square and normalizes each channel, producing a
/// (3, size, size) F32 tensor on `device`.
pub fn image_to_normalized_tensor(
    img: &RgbImage,
    size: u32,
    mean: [f32; 3],
    std: [f32; 3],
    device: &Device,
) -> Result<Tensor> {
    let resized = DynamicImage::ImageRgb8(img.clone())
        .resize_to_fill(size, size, FilterType::Triangle)
        .to_rgb8();
    let data = Tensor::from_vec(
        resized.into_raw(),
        (size as usize, size as usize, 3),
        &Device::Cpu,
    )?
    .permute((2, 0, 1))?;
    let mean = Tensor::new(&mean, &Device::Cpu)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&std, &Device::Cpu)?.reshape((3, 1, 1))?;
    let normalized = (data.to_dtype(DType::F32)? / 255.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?;
    Ok(normalized.to_device(device)?)
}

/// Encodes an image as PNG and wraps it in standard base64.
pub fn image_to_base64_png(img: &RgbImage) -> Result<String> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(BASE64_STANDARD.encode(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard() -> RgbImage {
        RgbImage::from_fn(4, 2, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            }
        })
    }

    #[test]
    fn tensor_round_trips_into_image() {
        let img = checkerboard();
        let tensor = Tensor::from_vec(img.clone().into_raw(), (2, 4, 3), &Device::Cpu)
            .unwrap()
            .permute((2, 0, 1))
            .unwrap();
        assert_eq!(tensor_to_image(&tensor).unwrap(), img);
    }

    #[test]
    fn tensor_to_image_rejects_grayscale() {
        let tensor = Tensor::zeros((1, 2, 2), DType::U8, &Device::Cpu).unwrap();
        assert!(tensor_to_image(&tensor).is_err());
    }

    #[test]
    fn base64_png_decodes_back_to_the_same_pixels() {
        let img = checkerboard();
        let encoded = image_to_base64_png(&img).unwrap();
        let bytes = BASE64_STANDARD.decode(encoded).unwrap();
        assert!(bytes.starts_with(b"\x89PNG"));
        assert_eq!(decode_rgb(&bytes).unwrap(), img);
    }

    #[test]
    fn decode_rgb_rejects_garbage() {
        assert!(decode_rgb(b"definitely not an image").is_err());
    }

    #[test]
    fn normalized_tensor_has_channel_first_shape() {
        let tensor = image_to_normalized_tensor(
            &checkerboard(),
            8,
            [0.5, 0.5, 0.5],
            [0.5, 0.5, 0.5],
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(tensor.dims(), &[3, 8, 8]);
        let max = tensor
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(max <= 1.0 + 1e-5);
    }
}
