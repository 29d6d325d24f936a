//! 3D LUT loading and sampling.
//!
//! A loaded [`ColorCube`] is immutable. The active cube lives in a
//! [`LutSlot`] that preview and recording read from; replacing it swaps the
//! `Arc`, so readers see either the old cube or the new one, never a mix.

mod cube;
mod parser;
mod transform;

pub use cube::ColorCube;
pub use parser::{parse, parse_3dl, parse_cube, LutFormat};
pub use transform::{LutTransform, RenderError};

use crate::error::LutError;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Read and parse a LUT file
pub async fn load(path: impl AsRef<Path>) -> Result<ColorCube, LutError> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LutError::Read {
            path: path.display().to_string(),
            source,
        })?;

    let format = LutFormat::detect(path, &contents);
    let cube = parse(format, &contents)?.with_source(path.to_path_buf());
    info!(
        "Loaded {:?} LUT {} ({}³)",
        format,
        path.display(),
        cube.size()
    );
    Ok(cube)
}

/// The currently selected LUT, shared by the preview and recording paths
#[derive(Debug, Default)]
pub struct LutSlot {
    current: RwLock<Option<Arc<ColorCube>>>,
    generation: AtomicU64,
}

impl LutSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<ColorCube>> {
        self.current.read().clone()
    }

    pub fn is_active(&self) -> bool {
        self.current.read().is_some()
    }

    /// Install a new cube (or none), returning the one it replaced
    pub fn replace(&self, cube: Option<Arc<ColorCube>>) -> Option<Arc<ColorCube>> {
        let previous = std::mem::replace(&mut *self.current.write(), cube);
        self.generation.fetch_add(1, Ordering::SeqCst);
        previous
    }

    pub fn clear(&self) -> Option<Arc<ColorCube>> {
        self.replace(None)
    }

    /// Incremented on every replacement
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
