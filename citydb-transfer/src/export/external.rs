//! Extraction of texture images into an output directory.

use camino::{Utf8Path, Utf8PathBuf};
use citydb_core::TextureImage;
use log::debug;

use crate::error::TransferError;
use crate::options::ExternalFileOptions;

const APPEARANCE_DIR: &str = "appearance";

/// Writes texture image content below `<output>/appearance`.
#[derive(Debug, Clone)]
pub(crate) struct ExternalFiles {
    output_dir: Utf8PathBuf,
    buckets: u32,
}

impl ExternalFiles {
    pub(crate) fn new(options: &ExternalFileOptions) -> Self {
        Self {
            output_dir: options.output_dir.clone(),
            buckets: options.buckets,
        }
    }

    /// Path of image `id` relative to the output directory.
    pub(crate) fn relative_path(&self, id: i64, image: &TextureImage) -> Utf8PathBuf {
        let file_name = match image.file_name() {
            "" => format!("tex_{id}"),
            name => name.to_owned(),
        };
        let mut path = Utf8PathBuf::from(APPEARANCE_DIR);
        if self.buckets > 0 {
            let bucket = id.rem_euclid(i64::from(self.buckets)) + 1;
            path.push(bucket.to_string());
        }
        path.push(file_name);
        path
    }

    /// Write the image content of row `id` and point its URI at the file.
    ///
    /// Images without inline content are left untouched.
    pub(crate) fn extract(&self, id: i64, image: &mut TextureImage) -> Result<(), TransferError> {
        let Some(data) = image.data.take() else {
            return Ok(());
        };
        let relative = self.relative_path(id, image);
        let target = self.output_dir.join(&relative);
        citydb_fs::write_file(&target, &data).map_err(|source| TransferError::Io {
            path: target.clone(),
            source,
        })?;
        debug!("extracted texture image {id} to {target}");
        image.uri = to_uri(&relative);
        Ok(())
    }
}

fn to_uri(path: &Utf8Path) -> String {
    path.components()
        .map(|component| component.as_str())
        .collect::<Vec<_>>()
        .join("/")
}
