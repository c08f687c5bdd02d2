//! Registration of an exposure stack, either internally with median
//! threshold bitmaps or by delegating to `align_image_stack`.

use std::path::PathBuf;

use pfs::Rect;

mod external;
mod mtb;

pub use external::{spawn_external, AlignError, AlignEvent, AlignTask, ExternalAlignment};
pub use mtb::{mtb_offsets, MAX_SHIFT_BITS};

/// Settings for the external alignment tool.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignConfig {
    /// Path (or name on `PATH`) of the `align_image_stack` executable.
    pub tool: PathBuf,
    /// Whether the images are cropped to their common area after
    /// aligning.
    pub crop: bool,
    /// Directory for intermediate files.
    pub temp_dir: PathBuf,
}

impl Default for AlignConfig {
    fn default() -> AlignConfig {
        AlignConfig {
            tool: "align_image_stack".into(),
            crop: true,
            temp_dir: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AlignState {
    Idle,
    Aligning,
    Aligned,
    Failed,
}

/// The rectangle that stays covered by every image after each has been
/// shifted by its offset.
///
/// An image shifted right by `dx` loses its leftmost `dx` columns, one
/// shifted left loses its rightmost ones, and likewise vertically.
pub fn common_region(offsets: &[(i32, i32)], dimensions: (usize, usize)) -> Rect {
    let (w, h) = (dimensions.0 as i64, dimensions.1 as i64);
    let max_dx = offsets.iter().map(|o| o.0 as i64).max().unwrap_or(0);
    let min_dx = offsets.iter().map(|o| o.0 as i64).min().unwrap_or(0);
    let max_dy = offsets.iter().map(|o| o.1 as i64).max().unwrap_or(0);
    let min_dy = offsets.iter().map(|o| o.1 as i64).min().unwrap_or(0);

    let left = max_dx.max(0).min(w);
    let right = (w + min_dx.min(0)).max(left);
    let top = max_dy.max(0).min(h);
    let bottom = (h + min_dy.min(0)).max(top);

    Rect::new(
        left as usize,
        top as usize,
        (right - left) as usize,
        (bottom - top) as usize,
    )
}
