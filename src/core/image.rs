use bytes::Bytes;
use image::RgbaImage;

use crate::core::error::{PlayerError, Result};
use crate::core::types::{PixelFormat, VideoFrame};

/// Chroma subsampling of a planar YCbCr picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YCbCrSubsampling {
    S444,
    S422,
    S420,
    S440,
    S411,
    S410,
}

impl YCbCrSubsampling {
    pub fn from_format(format: &PixelFormat) -> Option<Self> {
        match format {
            PixelFormat::Yuv420p => Some(Self::S420),
            PixelFormat::Yuv422p => Some(Self::S422),
            PixelFormat::Yuv444p => Some(Self::S444),
            PixelFormat::Yuv440p => Some(Self::S440),
            PixelFormat::Yuv411p => Some(Self::S411),
            PixelFormat::Yuv410p => Some(Self::S410),
            _ => None,
        }
    }

    /// (horizontal, vertical) log2 chroma shift
    pub fn shift(&self) -> (u32, u32) {
        match self {
            Self::S444 => (0, 0),
            Self::S422 => (1, 0),
            Self::S420 => (1, 1),
            Self::S440 => (0, 1),
            Self::S411 => (2, 0),
            Self::S410 => (2, 2),
        }
    }

    pub fn chroma_size(&self, width: u32, height: u32) -> (u32, u32) {
        let (h, v) = self.shift();
        (ceil_shift(width, h), ceil_shift(height, v))
    }
}

fn ceil_shift(value: u32, shift: u32) -> u32 {
    (value + (1 << shift) - 1) >> shift
}

/// Planar YCbCr picture, planes shared with the decoded frame
#[derive(Debug, Clone)]
pub struct YCbCrImage {
    pub width: u32,
    pub height: u32,
    pub subsampling: YCbCrSubsampling,
    pub y: Bytes,
    pub cb: Bytes,
    pub cr: Bytes,
    pub y_stride: usize,
    pub c_stride: usize,
}

/// Generic decoded image handed to the presenter
#[derive(Debug, Clone)]
pub enum Image {
    YCbCr(YCbCrImage),
    Rgba(RgbaImage),
}

impl Image {
    pub fn width(&self) -> u32 {
        match self {
            Image::YCbCr(img) => img.width,
            Image::Rgba(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Image::YCbCr(img) => img.height,
            Image::Rgba(img) => img.height(),
        }
    }

    /// Wrap a tightly packed RGBA buffer
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        RgbaImage::from_raw(width, height, data)
            .map(Image::Rgba)
            .ok_or_else(|| {
                PlayerError::DecodeFailed(format!("RGBA buffer too small for {}x{}", width, height))
            })
    }

    /// Native path: planar YCbCr layouts become an `Image::YCbCr` without pixel conversion.
    ///
    /// Returns `Ok(None)` when the frame's layout is not handled natively; the caller then
    /// goes through the RGBA conversion path.
    pub fn from_native(frame: &VideoFrame) -> Result<Option<Self>> {
        let subsampling = match YCbCrSubsampling::from_format(&frame.format) {
            Some(s) => s,
            None => return Ok(None),
        };

        if frame.planes.len() < 3 {
            return Err(PlayerError::DecodeFailed(format!(
                "{:?} frame has {} planes",
                frame.format,
                frame.planes.len()
            )));
        }

        let (cw, ch) = subsampling.chroma_size(frame.width, frame.height);
        let y = take_plane(&frame.planes[0].data, frame.planes[0].stride, frame.width, frame.height)?;
        let cb = take_plane(&frame.planes[1].data, frame.planes[1].stride, cw, ch)?;
        let cr = take_plane(&frame.planes[2].data, frame.planes[2].stride, cw, ch)?;

        if frame.planes[1].stride != frame.planes[2].stride {
            return Err(PlayerError::DecodeFailed("chroma planes differ in stride".to_string()));
        }

        Ok(Some(Image::YCbCr(YCbCrImage {
            width: frame.width,
            height: frame.height,
            subsampling,
            y,
            cb,
            cr,
            y_stride: frame.planes[0].stride,
            c_stride: frame.planes[1].stride,
        })))
    }
}

fn take_plane(data: &Bytes, stride: usize, width: u32, rows: u32) -> Result<Bytes> {
    let needed = stride * rows as usize;
    if stride < width as usize || data.len() < needed {
        return Err(PlayerError::DecodeFailed(format!(
            "invalid plane: {} bytes, stride {}, need {}x{}",
            data.len(),
            stride,
            width,
            rows
        )));
    }
    Ok(data.slice(..needed))
}
