//! The state of one HDR creation session: the loaded exposures, their
//! alignment and ghost masks, and the fusion settings.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use job_queue::Progress;
use pfs::{Array2Df, Frame, Rect};

use crate::{
    align::{self, AlignConfig, AlignError, AlignState, AlignTask, ExternalAlignment},
    anti_ghosting::{self, GhostInput},
    error::{Error, Result},
    fusion::{self, FusionConfig, FusionInput},
    item::HdrCreationItem,
    job_helpers,
};

/// Outcome of loading a batch of files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub loaded: usize,
    /// Files that could not be decoded, with the reason.
    pub failed: Vec<(PathBuf, String)>,
    /// Display names of loaded files without usable exposure data.
    pub without_exif: Vec<String>,
}

/// Per-item ghost masks, `None` where an item has no mask.
#[derive(Debug, Clone, PartialEq)]
struct MaskSet {
    version: u64,
    masks: Vec<Option<Array2Df>>,
}

#[derive(Debug, Clone, PartialEq)]
struct Offsets {
    version: u64,
    offsets: Vec<(i32, i32)>,
}

pub struct HdrCreationManager {
    items: Vec<HdrCreationItem>,
    config: FusionConfig,
    align_config: AlignConfig,
    align_state: AlignState,
    geometry_version: u64,
    masks: Option<MaskSet>,
    offsets: Option<Offsets>,
    temp_files: Vec<PathBuf>,
}

impl Default for HdrCreationManager {
    fn default() -> HdrCreationManager {
        HdrCreationManager::new()
    }
}

impl HdrCreationManager {
    pub fn new() -> HdrCreationManager {
        HdrCreationManager {
            items: Vec::new(),
            config: FusionConfig::default(),
            align_config: AlignConfig::default(),
            align_state: AlignState::Idle,
            geometry_version: 0,
            masks: None,
            offsets: None,
            temp_files: Vec::new(),
        }
    }

    //----------------------------------------------------------------
    // Item set.

    pub fn items(&self) -> &[HdrCreationItem] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&HdrCreationItem> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Loads image files and appends them to the item set.
    ///
    /// Files that fail to load are skipped and listed in the report.
    pub fn load_files(&mut self, paths: &[PathBuf], progress: &dyn Progress) -> Result<LoadReport> {
        self.check_not_aligning()?;

        let mut report = LoadReport::default();
        for (i, path) in paths.iter().enumerate() {
            if progress.is_canceled() {
                break;
            }
            progress.set_progress(
                &format!("Loading {}", path.display()),
                i as f32 / paths.len() as f32,
            );

            match job_helpers::load_image(path) {
                Ok((frame, info)) => {
                    let item = HdrCreationItem::new(path.clone(), frame, info);
                    if !item.is_valid() {
                        tracing::warn!(file = %path.display(), "not a valid RGB image");
                        report.failed.push((path.clone(), "not a valid RGB image".into()));
                        continue;
                    }
                    if !item.has_average_luminance() {
                        tracing::warn!(file = %path.display(), "no exposure information");
                        report.without_exif.push(item.display_name());
                    }
                    tracing::info!(file = %path.display(), ev = ?item.ev(), "loaded image");
                    self.items.push(item);
                    report.loaded += 1;
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "failed to load image");
                    report.failed.push((path.clone(), e.to_string()));
                }
            }
        }

        if report.loaded > 0 {
            self.item_set_changed();
        }
        if progress.is_canceled() {
            return Err(Error::Cancelled);
        }
        Ok(report)
    }

    pub fn add_item(&mut self, item: HdrCreationItem) -> Result<()> {
        self.check_not_aligning()?;
        self.items.push(item);
        self.item_set_changed();
        Ok(())
    }

    pub fn remove_file(&mut self, index: usize) -> Result<HdrCreationItem> {
        self.check_not_aligning()?;
        if index >= self.items.len() {
            return Err(Error::NoSuchItem(index));
        }
        let item = self.items.remove(index);
        self.item_set_changed();
        Ok(item)
    }

    pub fn clear_files(&mut self) -> Result<()> {
        self.check_not_aligning()?;
        self.items.clear();
        self.item_set_changed();
        Ok(())
    }

    /// Index of the item loaded from `path`.
    pub fn index_of(&self, path: &Path) -> Option<usize> {
        self.items.iter().position(|i| i.filename() == path)
    }

    pub fn set_ev(&mut self, index: usize, ev: f32) -> Result<()> {
        self.items
            .get_mut(index)
            .ok_or(Error::NoSuchItem(index))?
            .set_ev(ev);
        Ok(())
    }

    pub fn set_average_luminance(&mut self, index: usize, average_luminance: f32) -> Result<()> {
        self.items
            .get_mut(index)
            .ok_or(Error::NoSuchItem(index))?
            .set_average_luminance(average_luminance);
        Ok(())
    }

    /// Display names of the items whose exposure is still unknown.
    pub fn files_without_exif(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| !i.has_average_luminance())
            .map(|i| i.display_name())
            .collect()
    }

    /// Average luminance of every item, in item order.
    pub fn exposure_times(&self) -> Vec<Option<f32>> {
        self.items.iter().map(|i| i.average_luminance()).collect()
    }

    //----------------------------------------------------------------
    // Settings.

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: FusionConfig) {
        self.config = config;
    }

    pub fn align_config(&self) -> &AlignConfig {
        &self.align_config
    }

    pub fn set_align_config(&mut self, config: AlignConfig) {
        self.align_config = config;
    }

    pub fn set_crop_flag(&mut self, crop: bool) {
        self.align_config.crop = crop;
    }

    //----------------------------------------------------------------
    // Alignment.

    pub fn align_state(&self) -> AlignState {
        self.align_state
    }

    /// Offsets of the current alignment, if still valid.
    pub fn offsets(&self) -> Option<&[(i32, i32)]> {
        self.offsets
            .as_ref()
            .filter(|o| o.version == self.geometry_version)
            .map(|o| o.offsets.as_slice())
    }

    /// Aligns the items with median threshold bitmaps, shifts them into
    /// place and, if enabled, crops them to their common area.
    pub fn align_with_mtb(&mut self, progress: &dyn Progress) -> Result<Vec<(i32, i32)>> {
        self.check_can_align()?;
        self.align_state = AlignState::Aligning;

        let frames: Vec<&Frame> = self.items.iter().map(|i| i.frame()).collect();
        let offsets = match align::mtb_offsets(&frames, progress) {
            Ok(offsets) => offsets,
            Err(e) => {
                tracing::warn!(error = %e, "mtb alignment failed");
                self.align_state = AlignState::Failed;
                return Err(e);
            }
        };
        tracing::info!(offsets = ?offsets, "mtb alignment done");

        self.shift_items(&offsets)?;
        if self.align_config.crop {
            let rect = align::common_region(&offsets, self.items[0].frame().dimensions());
            self.crop_frames(rect)?;
        }
        self.align_state = AlignState::Aligned;
        Ok(offsets)
    }

    /// Starts `align_image_stack` on the items' source files.  The
    /// outcome must be handed back through `finish_external_alignment()`.
    pub fn start_external_alignment(&mut self) -> Result<AlignTask> {
        self.check_can_align()?;
        if self.items.is_empty() {
            return Err(Error::NoFrames);
        }
        job_helpers::ensure_dir_exists(&self.align_config.temp_dir)?;
        let inputs: Vec<PathBuf> = self.items.iter().map(|i| i.filename().to_path_buf()).collect();
        let prefix = self
            .align_config
            .temp_dir
            .join(format!("hdr_aligned_{}_", std::process::id()));

        self.align_state = AlignState::Aligning;
        Ok(align::spawn_external(&self.align_config, &inputs, &prefix))
    }

    /// Replaces the item frames with the externally aligned ones.
    ///
    /// On any failure the items are left as they were and the state
    /// becomes `Failed`.
    pub fn finish_external_alignment(
        &mut self,
        outcome: std::result::Result<ExternalAlignment, AlignError>,
    ) -> Result<()> {
        if self.align_state != AlignState::Aligning {
            return Err(Error::Busy);
        }
        let result = outcome.map_err(Error::from).and_then(|a| self.load_aligned(&a));
        match result {
            Ok(frames) => {
                for (item, frame) in self.items.iter_mut().zip(frames) {
                    item.set_frame(frame);
                }
                // The tool resamples the images itself.
                let offsets = vec![(0, 0); self.items.len()];
                self.geometry_version += 1;
                self.masks = None;
                self.offsets = Some(Offsets {
                    version: self.geometry_version,
                    offsets: offsets,
                });
                self.align_state = AlignState::Aligned;
                tracing::info!("external alignment applied");
                Ok(())
            }
            Err(e) => {
                self.align_state = AlignState::Failed;
                Err(e)
            }
        }
    }

    fn load_aligned(&mut self, alignment: &ExternalAlignment) -> Result<Vec<Frame>> {
        self.temp_files.extend(alignment.files.iter().cloned());
        if alignment.files.len() != self.items.len() {
            return Err(Error::OffsetCount {
                expected: self.items.len(),
                got: alignment.files.len(),
            });
        }
        alignment
            .files
            .iter()
            .map(|f| job_helpers::load_image(f).map(|(frame, _)| frame))
            .collect()
    }

    /// Returns from `Failed` to `Idle`.
    pub fn reset_alignment(&mut self) -> Result<()> {
        match self.align_state {
            AlignState::Aligning => Err(Error::Busy),
            AlignState::Aligned => Err(Error::AlreadyAligned),
            AlignState::Idle | AlignState::Failed => {
                self.align_state = AlignState::Idle;
                self.offsets = None;
                Ok(())
            }
        }
    }

    /// Shifts every item (and its mask) by the given offsets.
    ///
    /// Not allowed once the items are aligned.
    pub fn apply_shifts(&mut self, offsets: &[(i32, i32)]) -> Result<()> {
        self.check_can_align()?;
        self.shift_items(offsets)
    }

    fn shift_items(&mut self, offsets: &[(i32, i32)]) -> Result<()> {
        if offsets.len() != self.items.len() {
            return Err(Error::OffsetCount {
                expected: self.items.len(),
                got: offsets.len(),
            });
        }
        for (item, &(dx, dy)) in self.items.iter_mut().zip(offsets) {
            item.frame_mut().shift(dx, dy);
        }
        let keep_masks = self.masks().is_some();
        if let (true, Some(set)) = (keep_masks, self.masks.as_mut()) {
            for (mask, &(dx, dy)) in set.masks.iter_mut().zip(offsets) {
                if let Some(mask) = mask {
                    *mask = mask.shifted(dx, dy);
                }
            }
        }
        self.geometry_changed(keep_masks, Some(offsets.to_vec()));
        Ok(())
    }

    /// Crops every item (and its mask) to `rect`.
    ///
    /// Not allowed once the items are aligned.
    pub fn crop_items(&mut self, rect: Rect) -> Result<()> {
        self.check_can_align()?;
        self.crop_frames(rect)
    }

    fn crop_frames(&mut self, rect: Rect) -> Result<()> {
        for item in self.items.iter() {
            let (w, h) = item.frame().dimensions();
            if rect.x + rect.width > w || rect.y + rect.height > h {
                return Err(pfs::FrameError::CropOutOfBounds {
                    rect: rect,
                    dimensions: (w, h),
                }
                .into());
            }
        }

        let keep_masks = self.masks().is_some();
        for item in self.items.iter_mut() {
            item.frame_mut().crop(rect)?;
        }
        if let (true, Some(set)) = (keep_masks, self.masks.as_mut()) {
            for mask in set.masks.iter_mut().flatten() {
                *mask = mask.cropped(rect);
            }
        }
        let offsets = self.offsets().map(|o| o.to_vec());
        self.geometry_changed(keep_masks, offsets);
        tracing::info!(x = rect.x, y = rect.y, width = rect.width, height = rect.height, "cropped items");
        Ok(())
    }

    //----------------------------------------------------------------
    // Anti-ghosting.

    /// The current masks, or `None` if there are none or they are
    /// stale.
    pub fn masks(&self) -> Option<&[Option<Array2Df>]> {
        self.masks
            .as_ref()
            .filter(|m| m.version == self.geometry_version)
            .map(|m| m.masks.as_slice())
    }

    pub fn set_manual_mask(&mut self, index: usize, mask: Array2Df) -> Result<()> {
        self.check_not_aligning()?;
        let item = self.items.get(index).ok_or(Error::NoSuchItem(index))?;
        let dimensions = item.frame().dimensions();
        if mask.dimensions() != dimensions {
            return Err(Error::MaskSizeMismatch {
                expected: dimensions,
                got: mask.dimensions(),
            });
        }

        if self.masks().is_none() {
            self.masks = Some(MaskSet {
                version: self.geometry_version,
                masks: vec![None; self.items.len()],
            });
        }
        if let Some(set) = self.masks.as_mut() {
            set.masks[index] = Some(mask);
        }
        Ok(())
    }

    pub fn clear_masks(&mut self) {
        self.masks = None;
    }

    /// Replaces all masks with automatically detected ones.
    pub fn compute_automatic_masks(&mut self, sensitivity: f32, progress: &dyn Progress) -> Result<()> {
        self.check_not_aligning()?;
        self.check_exposures()?;

        let inputs: Vec<GhostInput> = self
            .items
            .iter()
            .map(|i| GhostInput {
                frame: i.frame(),
                average_luminance: i.average_luminance().unwrap_or(1.0),
            })
            .collect();
        let ldr = self.items.iter().all(|i| i.info().is_ldr());
        let masks = anti_ghosting::automatic_masks(&inputs, ldr, sensitivity, progress)?;

        self.masks = Some(MaskSet {
            version: self.geometry_version,
            masks: masks.into_iter().map(Some).collect(),
        });
        Ok(())
    }

    /// Turns the manual masks into masks that take every marked pixel
    /// from the item at `good_index` only.
    pub fn do_anti_ghosting(&mut self, good_index: usize) -> Result<()> {
        self.check_not_aligning()?;
        let first = self.items.first().ok_or(Error::NoFrames)?;
        let dimensions = first.frame().dimensions();

        let manual: Vec<Option<&Array2Df>> = match self.masks() {
            Some(masks) => masks.iter().map(|m| m.as_ref()).collect(),
            None => vec![None; self.items.len()],
        };
        let masks = anti_ghosting::good_image_masks(&manual, good_index, dimensions)?;

        self.masks = Some(MaskSet {
            version: self.geometry_version,
            masks: masks.into_iter().map(Some).collect(),
        });
        Ok(())
    }

    //----------------------------------------------------------------
    // Output.

    /// Fuses the items into one RGB radiance frame.
    pub fn create_hdr(&self, anti_ghosting: bool, progress: &dyn Progress) -> Result<Frame> {
        self.check_not_aligning()?;

        let masks = if anti_ghosting { self.masks() } else { None };
        let names: Vec<String> = self.items.iter().map(|i| i.display_name()).collect();
        let inputs: Vec<FusionInput> = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| FusionInput {
                name: &names[i],
                frame: item.frame(),
                average_luminance: item.average_luminance(),
                mask: masks.and_then(|m| m[i].as_ref()),
            })
            .collect();

        fusion::fuse(&inputs, &self.config, progress)
    }

    /// Writes every item's frame as `<prefix>_<index>.tiff`, 16 bits per
    /// channel.
    pub fn save_images(&self, prefix: &Path) -> Result<Vec<PathBuf>> {
        if let Some(dir) = prefix.parent().filter(|d| !d.as_os_str().is_empty()) {
            job_helpers::ensure_dir_exists(dir)?;
        }
        let mut written = Vec::with_capacity(self.items.len());
        for (i, item) in self.items.iter().enumerate() {
            let mut name = prefix.as_os_str().to_owned();
            name.push(format!("_{}.tiff", i));
            let path = PathBuf::from(name);

            let img = job_helpers::frame_to_image16(item.frame())?;
            image_fmt::save_tiff(BufWriter::new(File::create(&path)?), &img)?;
            tracing::debug!(file = %path.display(), "saved item");
            written.push(path);
        }
        Ok(written)
    }

    /// Deletes the intermediate files of external alignment.  Returns
    /// the number of files removed.
    pub fn remove_temp_files(&mut self) -> usize {
        let mut removed = 0;
        for path in self.temp_files.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(file = %path.display(), error = %e, "failed to remove temp file"),
            }
        }
        removed
    }

    //----------------------------------------------------------------

    fn check_not_aligning(&self) -> Result<()> {
        if self.align_state == AlignState::Aligning {
            Err(Error::Busy)
        } else {
            Ok(())
        }
    }

    fn check_can_align(&self) -> Result<()> {
        match self.align_state {
            AlignState::Aligning => Err(Error::Busy),
            AlignState::Aligned => Err(Error::AlreadyAligned),
            AlignState::Idle | AlignState::Failed => Ok(()),
        }
    }

    fn check_exposures(&self) -> Result<()> {
        let missing = self.files_without_exif();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingExposure(missing))
        }
    }

    fn item_set_changed(&mut self) {
        self.geometry_version += 1;
        self.align_state = AlignState::Idle;
        self.offsets = None;
    }

    /// Bumps the geometry version, carrying the masks and offsets over
    /// when they have been transformed along with the frames.
    fn geometry_changed(&mut self, keep_masks: bool, offsets: Option<Vec<(i32, i32)>>) {
        self.geometry_version += 1;
        if keep_masks {
            if let Some(set) = self.masks.as_mut() {
                set.version = self.geometry_version;
            }
        }
        self.offsets = offsets.map(|o| Offsets {
            version: self.geometry_version,
            offsets: o,
        });
    }
}
