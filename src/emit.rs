//! Output file emission.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use eyre::{Result, WrapErr};
use tracing::info;

/// Writes an assembled image to `path`, truncating anything already there.
/// Fails unless every byte lands; a short or failed write may leave a partial
/// file behind, which the caller treats as fatal for the whole run.
pub fn write_image(image: &[u8], path: &Path) -> Result<()> {
    info!("writing {} bytes to {}", image.len(), path.display());
    let mut file =
        File::create(path).wrap_err_with(|| format!("opening {} for writing", path.display()))?;
    file.write_all(image)
        .wrap_err_with(|| format!("writing {}", path.display()))?;
    info!("wrote {}", path.display());
    Ok(())
}
