use crate::error::EncoderError;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use std::io::Cursor;

/// Planar YUV 4:2:0 image as three borrowed planes
#[derive(Debug, Clone, Copy)]
pub struct YuvPlanes<'a> {
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub y_stride: usize,
    pub u_stride: usize,
    pub v_stride: usize,
    pub width: u32,
    pub height: u32,
}

impl<'a> YuvPlanes<'a> {
    /// Split a contiguous I420 frame of `width` x `height` into its planes.
    /// Both dimensions must be even so every luma row has a chroma row.
    pub fn from_i420(data: &'a [u8], width: u32, height: u32) -> Result<Self, EncoderError> {
        if width % 2 != 0 || height % 2 != 0 {
            return Err(EncoderError::OddDimensions { width, height });
        }

        let (w, h) = (width as usize, height as usize);
        let y_size = w * h;
        let chroma_size = y_size / 4;
        let expected = y_size + 2 * chroma_size;
        if data.len() < expected {
            return Err(EncoderError::ShortFrame {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            y: &data[..y_size],
            u: &data[y_size..y_size + chroma_size],
            v: &data[y_size + chroma_size..expected],
            y_stride: w,
            u_stride: w / 2,
            v_stride: w / 2,
            width,
            height,
        })
    }
}

/// Compresses one YUV 4:2:0 frame into a caller-provided output buffer
pub trait BlockEncoder: Send {
    /// Upper bound of the compressed size for a frame of these dimensions
    fn buffer_size(&self, width: u32, height: u32) -> usize {
        let pad16 = |v: u32| ((v as usize) + 15) & !15;
        pad16(width) * pad16(height) * 3 / 2 + 2048
    }

    /// Returns the number of bytes written to `output`
    fn compress(
        &mut self,
        planes: &YuvPlanes<'_>,
        quality: i32,
        output: &mut [u8],
    ) -> Result<usize, EncoderError>;
}

/// Baseline JPEG codec backed by the `image` crate
#[derive(Debug, Default)]
pub struct JpegCodec {
    rgb: Vec<u8>,
}

impl JpegCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockEncoder for JpegCodec {
    fn compress(
        &mut self,
        planes: &YuvPlanes<'_>,
        quality: i32,
        output: &mut [u8],
    ) -> Result<usize, EncoderError> {
        i420_to_rgb(planes, &mut self.rgb);

        let quality = quality.clamp(1, 100) as u8;
        let mut cursor = Cursor::new(output);
        JpegEncoder::new_with_quality(&mut cursor, quality)
            .encode(&self.rgb, planes.width, planes.height, ColorType::Rgb8)
            .map_err(|e| EncoderError::Codec {
                details: e.to_string(),
            })?;

        Ok(cursor.position() as usize)
    }
}

/// BT.601 full-range conversion, 8-bit fixed point
fn i420_to_rgb(planes: &YuvPlanes<'_>, rgb: &mut Vec<u8>) {
    let (w, h) = (planes.width as usize, planes.height as usize);
    rgb.resize(w * h * 3, 0);

    for row in 0..h {
        let y_row = &planes.y[row * planes.y_stride..];
        let u_row = &planes.u[(row / 2) * planes.u_stride..];
        let v_row = &planes.v[(row / 2) * planes.v_stride..];
        let out = &mut rgb[row * w * 3..(row + 1) * w * 3];

        for col in 0..w {
            let y = y_row[col] as i32;
            let u = u_row[col / 2] as i32 - 128;
            let v = v_row[col / 2] as i32 - 128;

            let r = y + ((359 * v) >> 8);
            let g = y - ((88 * u + 183 * v) >> 8);
            let b = y + ((454 * u) >> 8);

            out[col * 3] = r.clamp(0, 255) as u8;
            out[col * 3 + 1] = g.clamp(0, 255) as u8;
            out[col * 3 + 2] = b.clamp(0, 255) as u8;
        }
    }
}
