//! Grayscale 24-bit BMP output.
//!
//! The file is a 14-byte file header, a 40-byte `BITMAPINFOHEADER` and uncompressed BGR rows.
//! Rows are written in the order of the intensity field, row 0 first, with a positive height and
//! no row padding, so the file is always `54 + 3 * width * height` bytes.
//! Readers treat a positive height as bottom-up, so row 0 (the `min_y` edge of the plane) ends up
//! at the bottom of the displayed image, with the imaginary axis pointing up.

use std::{
    io::{self, Write},
    path::Path,
};

use byteorder_lite::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

pub const FILE_HEADER_SIZE: u32 = 14;
pub const INFO_HEADER_SIZE: u32 = 40;
pub const HEADER_SIZE: u32 = FILE_HEADER_SIZE + INFO_HEADER_SIZE;
pub const BITS_PER_PIXEL: u16 = 24;

const BYTES_PER_PIXEL: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Layout {
    width: u32,
    height: u32,
    image_size: u32,
    file_size: u32,
}

impl Layout {
    fn new(width: u32, height: u32) -> Result<Self> {
        let too_large = || Error::InvalidDimension { width, height };
        if width == 0
            || height == 0
            || i32::try_from(width).is_err()
            || i32::try_from(height).is_err()
        {
            return Err(too_large());
        }

        let image_size = width
            .checked_mul(BYTES_PER_PIXEL)
            .and_then(|row| row.checked_mul(height))
            .ok_or_else(too_large)?;
        let file_size = image_size.checked_add(HEADER_SIZE).ok_or_else(too_large)?;

        Ok(Self {
            width,
            height,
            image_size,
            file_size,
        })
    }

    fn write<W: Write>(&self, writer: &mut W, pixels: &[u8]) -> io::Result<()> {
        // file header
        writer.write_all(b"BM")?;
        writer.write_u32::<LittleEndian>(self.file_size)?;
        writer.write_u16::<LittleEndian>(0)?; // reserved
        writer.write_u16::<LittleEndian>(0)?; // reserved
        writer.write_u32::<LittleEndian>(HEADER_SIZE)?; // pixel data offset

        // info header
        writer.write_u32::<LittleEndian>(INFO_HEADER_SIZE)?;
        writer.write_i32::<LittleEndian>(self.width as i32)?;
        writer.write_i32::<LittleEndian>(self.height as i32)?;
        writer.write_u16::<LittleEndian>(1)?; // colour planes
        writer.write_u16::<LittleEndian>(BITS_PER_PIXEL)?;
        writer.write_u32::<LittleEndian>(0)?; // no compression
        writer.write_u32::<LittleEndian>(self.image_size)?;
        writer.write_i32::<LittleEndian>(0)?; // horizontal pixels per metre
        writer.write_i32::<LittleEndian>(0)?; // vertical pixels per metre
        writer.write_u32::<LittleEndian>(0)?; // no colour table
        writer.write_u32::<LittleEndian>(0)?; // all colours important

        for &intensity in pixels {
            writer.write_all(&[intensity, intensity, intensity])?;
        }
        Ok(())
    }
}

/// Fail with `InvalidDimension` if a `width` x `height` image does not fit the format's 32-bit
/// size fields.
pub fn check_dimensions(width: u32, height: u32) -> Result<()> {
    Layout::new(width, height).map(|_| ())
}

/// Encode a row-major intensity field as a grayscale BMP.
pub fn encode(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let layout = Layout::new(width, height)?;
    let expected = width as usize * height as usize;
    if pixels.len() != expected {
        return Err(Error::InvalidDimension { width, height });
    }

    let mut bytes = Vec::with_capacity(layout.file_size as usize);
    layout.write(&mut bytes, pixels).map_err(Error::EncodeError)?;
    debug_assert_eq!(bytes.len(), layout.file_size as usize);
    debug!("encoded {}x{} bitmap, {} bytes", width, height, bytes.len());
    Ok(bytes)
}

/// Write `bytes` to `path` through a temporary file in the same directory, so `path` either
/// holds the complete file or is left untouched.
pub fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let into_error = |source: io::Error| Error::FileWriteError {
        path: path.to_path_buf(),
        source,
    };

    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(directory).map_err(into_error)?;
    file.write_all(bytes).map_err(into_error)?;
    file.as_file().sync_all().map_err(into_error)?;
    file.persist(path).map_err(|error| into_error(error.error))?;

    info!("wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// The fields of a BMP header that this encoder writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitmapHeader {
    pub file_size: u32,
    pub data_offset: u32,
    pub width: i32,
    pub height: i32,
    pub planes: u16,
    pub bits_per_pixel: u16,
    pub compression: u32,
    pub image_size: u32,
}

impl BitmapHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE as usize {
            return Err(Error::MalformedBitmap(format!(
                "{} bytes is shorter than the {} byte header",
                bytes.len(),
                HEADER_SIZE
            )));
        }
        if &bytes[..2] != b"BM" {
            return Err(Error::MalformedBitmap("missing `BM` signature".to_string()));
        }

        Self::read(&mut &bytes[2..HEADER_SIZE as usize])
            .map_err(|error| Error::MalformedBitmap(error.to_string()))
    }

    fn read(reader: &mut &[u8]) -> io::Result<Self> {
        let file_size = reader.read_u32::<LittleEndian>()?;
        reader.read_u32::<LittleEndian>()?; // reserved
        let data_offset = reader.read_u32::<LittleEndian>()?;

        let info_header_size = reader.read_u32::<LittleEndian>()?;
        if info_header_size != INFO_HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported info header size {}", info_header_size),
            ));
        }

        Ok(Self {
            file_size,
            data_offset,
            width: reader.read_i32::<LittleEndian>()?,
            height: reader.read_i32::<LittleEndian>()?,
            planes: reader.read_u16::<LittleEndian>()?,
            bits_per_pixel: reader.read_u16::<LittleEndian>()?,
            compression: reader.read_u32::<LittleEndian>()?,
            image_size: reader.read_u32::<LittleEndian>()?,
        })
    }
}
