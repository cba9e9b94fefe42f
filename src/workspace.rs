//! Original/working image pair for an interactive front end.
//!
//! The original is captured once on load and never modified. Every operation
//! is applied to the original and replaces the working image, so switching
//! operations or parameters never compounds earlier results.

use std::path::{Path, PathBuf};

use image::DynamicImage;

use crate::{
    error::{ProcessingError, Result},
    operation::{Operation, OperationParams},
};

#[derive(Debug, Clone)]
pub struct Workspace {
    original: DynamicImage,
    working: DynamicImage,
    source: PathBuf,
    last_operation: Option<Operation>,
}

impl Workspace {
    /// Decodes the image at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)?;
        debug!(
            "loaded {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Self::from_image(image, path)
    }

    /// Wraps an already decoded image; `source` only feeds
    /// [`Workspace::default_output_name`].
    pub fn from_image<P: AsRef<Path>>(image: DynamicImage, source: P) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ProcessingError::InvalidInput(format!(
                "degenerate dimensions {}x{}",
                image.width(),
                image.height()
            )));
        }
        Ok(Self {
            working: image.clone(),
            original: image,
            source: source.as_ref().to_path_buf(),
            last_operation: None,
        })
    }

    /// The image as loaded.
    pub fn original(&self) -> &DynamicImage {
        &self.original
    }

    /// The result of the last operation, or the original after a reset.
    pub fn working(&self) -> &DynamicImage {
        &self.working
    }

    pub fn last_operation(&self) -> Option<Operation> {
        self.last_operation
    }

    /// Applies `operation` to the original and stores the result as the
    /// working image.
    pub fn apply(&mut self, operation: Operation, params: &OperationParams) -> Result<&DynamicImage> {
        self.working = operation.apply(&self.original, params)?;
        self.last_operation = Some(operation);
        Ok(&self.working)
    }

    /// Discards the working image in favour of the original.
    pub fn reset(&mut self) {
        self.working = self.original.clone();
        self.last_operation = None;
    }

    /// Encodes the working image; the format follows the extension of `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.working.save(path)?;
        debug!("saved {}", path.display());
        Ok(())
    }

    /// `"<operation label> of <source stem>.<png|jpg>"`: PNG sources stay PNG,
    /// everything else becomes JPEG.
    pub fn default_output_name(&self) -> String {
        let stem = self
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let is_png = self
            .source
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        let extension = if is_png { "png" } else { "jpg" };

        match self.last_operation {
            Some(op) => format!("{} of {stem}.{extension}", op.label()),
            None => format!("{stem}.{extension}"),
        }
    }
}
