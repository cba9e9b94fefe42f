//! Construction and validation of single-channel intensity buffers.
//!
//! The segmenter and the grayscale operations work on [`GrayImage`]. Callers
//! that hold raw samples (a decoder, a capture pipeline, a test fixture) build
//! the buffer here so that empty, ragged or truncated input is rejected before
//! any processing starts.

use image::{GrayImage, ImageBuffer, Luma};

use crate::error::{ProcessingError, Result};

/// Builds a buffer from row-major rows, rejecting empty and ragged input.
///
/// # Examples
///
/// ```rust
/// use quadseg::gray_from_rows;
///
/// let image = gray_from_rows(&[vec![0, 10, 20], vec![30, 40, 50]]).unwrap();
/// assert_eq!(image.dimensions(), (3, 2));
///
/// assert!(gray_from_rows(&[vec![0, 1], vec![2]]).is_err());
/// ```
pub fn gray_from_rows<R: AsRef<[u8]>>(rows: &[R]) -> Result<GrayImage> {
    let height = rows.len();
    if height == 0 {
        return Err(ProcessingError::InvalidInput("no rows".to_string()));
    }

    let width = rows[0].as_ref().len();
    if width == 0 {
        return Err(ProcessingError::InvalidInput("rows are empty".to_string()));
    }

    let mut data = Vec::with_capacity(width * height);
    for (index, row) in rows.iter().enumerate() {
        let row = row.as_ref();
        if row.len() != width {
            return Err(ProcessingError::InvalidInput(format!(
                "row {index} has {} samples, expected {width}",
                row.len()
            )));
        }
        data.extend_from_slice(row);
    }

    gray_from_raw(dimension(width)?, dimension(height)?, data)
}

/// Wraps a row-major sample vector of `width * height` bytes.
pub fn gray_from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<GrayImage> {
    if width == 0 || height == 0 {
        return Err(ProcessingError::InvalidInput(format!(
            "degenerate dimensions {width}x{height}"
        )));
    }

    let expected = width as usize * height as usize;
    let actual = data.len();
    let mismatch = || {
        ProcessingError::InvalidInput(format!(
            "buffer holds {actual} samples, {width}x{height} needs {expected}"
        ))
    };
    // from_raw accepts oversized buffers and keeps the tail
    if actual != expected {
        return Err(mismatch());
    }
    ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(width, height, data).ok_or_else(mismatch)
}

/// Fails with [`ProcessingError::InvalidInput`] when either dimension is zero.
pub fn ensure_non_empty(image: &GrayImage) -> Result<()> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ProcessingError::InvalidInput(format!(
            "degenerate dimensions {width}x{height}"
        )));
    }
    Ok(())
}

fn dimension(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| ProcessingError::InvalidInput(format!("dimension {len} exceeds u32")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_row_major() {
        let image = gray_from_rows(&[[1u8, 2, 3], [4, 5, 6]]).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(2, 0)[0], 3);
        assert_eq!(image.get_pixel(0, 1)[0], 4);
    }

    #[test]
    fn test_rejects_empty_input() {
        let rows: Vec<Vec<u8>> = Vec::new();
        assert!(matches!(
            gray_from_rows(&rows),
            Err(ProcessingError::InvalidInput(_))
        ));
        assert!(matches!(
            gray_from_rows(&[Vec::<u8>::new()]),
            Err(ProcessingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_ragged_rows() {
        let err = gray_from_rows(&[vec![1u8, 2, 3], vec![4, 5]]).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_raw_length_mismatch() {
        assert!(gray_from_raw(3, 3, vec![0; 8]).is_err());
        assert!(matches!(
            gray_from_raw(3, 3, vec![0; 10]),
            Err(ProcessingError::InvalidInput(_))
        ));
        assert!(gray_from_raw(0, 3, Vec::new()).is_err());
        assert!(gray_from_raw(3, 3, vec![0; 9]).is_ok());
    }

    #[test]
    fn test_exact_buffer_segments_to_itself() {
        let image = gray_from_raw(3, 3, vec![7u8; 9]).unwrap();
        assert_eq!(image.as_raw().len(), 9);
        let segmented = crate::segment::segment_image(&image, 10.0).unwrap();
        assert_eq!(segmented, image);
    }

    #[test]
    fn test_ensure_non_empty() {
        assert!(ensure_non_empty(&GrayImage::new(0, 4)).is_err());
        assert!(ensure_non_empty(&GrayImage::new(1, 1)).is_ok());
    }
}
