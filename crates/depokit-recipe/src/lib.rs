//! # DepoKit Recipe
//!
//! Turns CAD drawings into executable recipes.
//! - `dxf_import`: DXF entities to millimetre paths
//! - `builder`: filtering, compensation, jump detection, command emission
//!   and workspace validation
//! - `geometry`: shared planar helpers

pub mod builder;
pub mod compensation;
pub mod dxf_import;
pub mod error;
pub mod geometry;

pub use builder::{BuildOptions, BuildOutput, GeometryWarning, JumpWarning, RecipeBuilder};
pub use dxf_import::{import_drawing, import_file, DxfImportOptions, ImportedGeometry, OriginMode};
pub use error::{DxfImportError, RecipeError};
pub use geometry::PathEntity;

use std::path::Path;

/// Import a drawing and build its recipe
///
/// The file name is recorded as the recipe source.
pub fn prepare_recipe(
    path: impl AsRef<Path>,
    import: &DxfImportOptions,
    options: BuildOptions,
) -> Result<(ImportedGeometry, BuildOutput), RecipeError> {
    let path = path.as_ref();
    let geometry = import_file(path, import)?;
    let options = BuildOptions {
        source: options.source.or_else(|| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
        }),
        ..options
    };
    let output = RecipeBuilder::new(options)?.build(&geometry.paths)?;
    Ok((geometry, output))
}
