pub mod align;
pub mod anti_ghosting;
pub mod error;
pub mod fusion;
pub mod item;
pub mod job_helpers;
pub mod logger;
pub mod manager;

pub use align::{AlignConfig, AlignError, AlignEvent, AlignState, AlignTask};
pub use error::{Error, Result};
pub use fusion::{predefined_configs, FusionConfig, ResponseSource};
pub use item::{HdrCreationItem, ImageInfo};
pub use manager::{HdrCreationManager, LoadReport};
