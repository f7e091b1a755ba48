//! Texture messages, optionally compressed with PNG or JPEG.
//!
//! Payload layout:
//!
//! ```text
//! [TextureDescription: 7 x i32][name: string][metadata: string][pixels: i32 len + bytes]
//! ```
//!
//! Raw payloads carry the texture bytes untouched (every mip level). PNG and JPEG
//! payloads carry only the top level.

use crate::data::{DataOptions, DataReceiver, DataSender, PayloadCodec};
use crate::error::MessageError;
use crate::message::read_section_version;
use bytemuck::{Pod, Zeroable};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, RgbaImage};
use livecapture_core::{WireError, WireReader, WireWriter};
use std::borrow::Cow;

const CODEC_VERSION: i32 = 0;
const JPEG_QUALITY: u8 = 75;

/// How pixel data is packed into the payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TextureCompression {
    /// Bytes copied as-is.
    #[default]
    Raw = 0,
    /// Lossless PNG.
    Png = 10,
    /// Lossy JPEG; alpha is discarded.
    Jpeg = 20,
}

impl TryFrom<i32> for TextureCompression {
    type Error = WireError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TextureCompression::Raw),
            10 => Ok(TextureCompression::Png),
            20 => Ok(TextureCompression::Jpeg),
            _ => Err(WireError::InvalidEnum {
                name: "TextureCompression",
                value: value as i64,
            }),
        }
    }
}

/// Pixel formats the texture codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TextureFormat {
    /// Single 8-bit channel.
    R8 = 1,
    /// 8-bit red, green and blue.
    Rgb8 = 2,
    /// 8-bit red, green, blue and alpha.
    Rgba8 = 3,
}

impl TextureFormat {
    /// Size of one pixel in bytes.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::Rgb8 => 3,
            TextureFormat::Rgba8 => 4,
        }
    }

    fn from_raw(value: i32) -> Option<Self> {
        match value {
            1 => Some(TextureFormat::R8),
            2 => Some(TextureFormat::Rgb8),
            3 => Some(TextureFormat::Rgba8),
            _ => None,
        }
    }

    fn color_type(&self) -> ExtendedColorType {
        match self {
            TextureFormat::R8 => ExtendedColorType::L8,
            TextureFormat::Rgb8 => ExtendedColorType::Rgb8,
            TextureFormat::Rgba8 => ExtendedColorType::Rgba8,
        }
    }
}

/// Texture addressing outside `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum WrapMode {
    /// Tile.
    #[default]
    Repeat = 0,
    /// Clamp to the edge.
    Clamp = 1,
    /// Tile, flipping every repetition.
    Mirror = 2,
    /// Mirror once, then clamp.
    MirrorOnce = 3,
}

impl WrapMode {
    fn from_raw(value: i32) -> Self {
        match value {
            1 => WrapMode::Clamp,
            2 => WrapMode::Mirror,
            3 => WrapMode::MirrorOnce,
            _ => WrapMode::Repeat,
        }
    }
}

/// Texture sampling filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum FilterMode {
    /// Nearest texel.
    Point = 0,
    /// Linear within a mip level.
    #[default]
    Bilinear = 1,
    /// Linear within and between mip levels.
    Trilinear = 2,
}

impl FilterMode {
    fn from_raw(value: i32) -> Self {
        match value {
            0 => FilterMode::Point,
            2 => FilterMode::Trilinear,
            _ => FilterMode::Bilinear,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
struct TextureDescription {
    width: i32,
    height: i32,
    format: i32,
    mip_count: i32,
    aniso_level: i32,
    wrap_mode: i32,
    filter_mode: i32,
}

/// CPU-side texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    /// Display name.
    pub name: String,
    /// Width of the top level in pixels.
    pub width: u32,
    /// Height of the top level in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: TextureFormat,
    /// Number of mip levels contained in `data`.
    pub mip_count: u32,
    /// Anisotropic filtering level.
    pub aniso_level: u32,
    /// Addressing mode.
    pub wrap_mode: WrapMode,
    /// Sampling filter.
    pub filter_mode: FilterMode,
    /// Pixel bytes, top level first.
    pub data: Vec<u8>,
}

impl Texture {
    /// A single-level texture with default sampling settings.
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        format: TextureFormat,
        data: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            format,
            mip_count: 1,
            aniso_level: 1,
            wrap_mode: WrapMode::default(),
            filter_mode: FilterMode::default(),
            data,
        }
    }

    fn top_level(&self) -> Result<&[u8], MessageError> {
        let len = self.width as usize * self.height as usize * self.format.bytes_per_pixel();
        self.data.get(..len).ok_or_else(|| {
            MessageError::InvalidTexture(format!(
                "\"{}\" is {}x{} {:?} but has only {} bytes",
                self.name,
                self.width,
                self.height,
                self.format,
                self.data.len()
            ))
        })
    }

    fn description(&self) -> TextureDescription {
        TextureDescription {
            width: self.width as i32,
            height: self.height as i32,
            format: self.format as i32,
            mip_count: self.mip_count as i32,
            aniso_level: self.aniso_level as i32,
            wrap_mode: self.wrap_mode as i32,
            filter_mode: self.filter_mode as i32,
        }
    }
}

/// Value carried by texture messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextureData {
    /// The texture, or `None` when absent or in a format this build cannot read.
    pub texture: Option<Texture>,
    /// Free-form text sent alongside the texture.
    pub metadata: String,
}

/// Texture codec with its compression setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureCodec {
    compression: TextureCompression,
}

impl TextureCodec {
    /// Codec using the given compression.
    pub fn new(compression: TextureCompression) -> Self {
        Self { compression }
    }

    /// Compression used for the pixel payload.
    pub fn compression(&self) -> TextureCompression {
        self.compression
    }

    fn compress<'a>(&self, texture: &'a Texture) -> Result<Cow<'a, [u8]>, MessageError> {
        let (width, height) = (texture.width, texture.height);
        match self.compression {
            TextureCompression::Raw => Ok(Cow::Borrowed(texture.data.as_slice())),
            TextureCompression::Png => {
                let mut png = Vec::new();
                PngEncoder::new(&mut png).write_image(
                    texture.top_level()?,
                    width,
                    height,
                    texture.format.color_type(),
                )?;
                Ok(Cow::Owned(png))
            }
            TextureCompression::Jpeg => {
                let pixels = texture.top_level()?;
                let (pixels, color) = match texture.format {
                    TextureFormat::Rgba8 => {
                        let rgba = RgbaImage::from_raw(width, height, pixels.to_vec())
                            .ok_or_else(|| {
                                MessageError::InvalidTexture("pixel buffer too small".into())
                            })?;
                        let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8().into_raw();
                        (Cow::Owned(rgb), ExtendedColorType::Rgb8)
                    }
                    format => (Cow::Borrowed(pixels), format.color_type()),
                };
                let mut jpg = Vec::new();
                JpegEncoder::new_with_quality(&mut jpg, JPEG_QUALITY)
                    .write_image(&pixels, width, height, color)?;
                Ok(Cow::Owned(jpg))
            }
        }
    }

    fn decompress(
        &self,
        bytes: &[u8],
        format: TextureFormat,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, MessageError> {
        let image_format = match self.compression {
            TextureCompression::Raw => return Ok(bytes.to_vec()),
            TextureCompression::Png => ImageFormat::Png,
            TextureCompression::Jpeg => ImageFormat::Jpeg,
        };

        let image = image::load_from_memory_with_format(bytes, image_format)?;
        if image.width() != width || image.height() != height {
            return Err(MessageError::InvalidTexture(format!(
                "decoded image is {}x{}, expected {width}x{height}",
                image.width(),
                image.height()
            )));
        }

        Ok(match format {
            TextureFormat::R8 => image.into_luma8().into_raw(),
            TextureFormat::Rgb8 => image.into_rgb8().into_raw(),
            TextureFormat::Rgba8 => image.into_rgba8().into_raw(),
        })
    }
}

impl PayloadCodec for TextureCodec {
    type Value = TextureData;

    const SENDER_NAME: &'static str = "TextureSender";
    const RECEIVER_NAME: &'static str = "TextureReceiver";
    // Diffing whole textures costs more than resending them.
    const DEFAULT_OPTIONS: DataOptions = DataOptions::empty();

    fn encode(&self, value: &TextureData, out: &mut Vec<u8>) -> Result<(), MessageError> {
        match &value.texture {
            Some(texture) => {
                let pixels = self.compress(texture)?;
                let mut description = texture.description();
                if self.compression != TextureCompression::Raw {
                    // Image codecs carry the top level only.
                    description.mip_count = 1;
                }
                out.write_struct(&description);
                out.write_string(&texture.name);
                out.write_string(&value.metadata);
                out.write_len_prefixed(&pixels);
            }
            None => {
                out.write_struct(&TextureDescription::zeroed());
                out.write_string("");
                out.write_string(&value.metadata);
                out.write_len_prefixed(&[]);
            }
        }
        Ok(())
    }

    fn decode(&self, reader: &mut WireReader<'_>) -> Result<TextureData, MessageError> {
        let desc: TextureDescription = reader.read_struct()?;
        let name = reader.read_string()?;
        let metadata = reader.read_string()?;
        let pixels = reader.read_len_prefixed()?;

        let format = match TextureFormat::from_raw(desc.format) {
            Some(format) if desc.width > 0 && desc.height > 0 => format,
            _ => {
                return Ok(TextureData {
                    texture: None,
                    metadata,
                })
            }
        };

        let (width, height) = (desc.width as u32, desc.height as u32);
        let data = self.decompress(pixels, format, width, height)?;

        Ok(TextureData {
            texture: Some(Texture {
                name,
                width,
                height,
                format,
                mip_count: match self.compression {
                    TextureCompression::Raw => desc.mip_count.max(1) as u32,
                    _ => 1,
                },
                aniso_level: desc.aniso_level.max(0) as u32,
                wrap_mode: WrapMode::from_raw(desc.wrap_mode),
                filter_mode: FilterMode::from_raw(desc.filter_mode),
                data,
            }),
            metadata,
        })
    }

    fn write_settings(&self, out: &mut Vec<u8>) {
        out.write_i32(CODEC_VERSION);
        out.write_i32(self.compression as i32);
    }

    fn read_settings(reader: &mut WireReader<'_>) -> Result<Self, MessageError> {
        read_section_version(reader, "texture codec", CODEC_VERSION)?;
        Ok(Self::new(reader.read_i32()?.try_into()?))
    }
}

/// Sends textures.
pub type TextureSender = DataSender<TextureCodec>;
/// Receives textures.
pub type TextureReceiver = DataReceiver<TextureCodec>;
