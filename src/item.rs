use std::path::{Path, PathBuf};

use pfs::Frame;

/// Calibration constant of the reflected-light meter equation.
const METER_CALIBRATION: f64 = 12.07488;

/// Exposure metadata of a source image, as read from its EXIF block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageInfo {
    pub exposure_time: Option<(u32, u32)>, // Ratio.
    pub fstop: Option<(u32, u32)>,         // Ratio.
    pub iso: Option<u32>,

    /// Bits per channel of the decoded source.
    pub bit_depth: u32,
}

impl ImageInfo {
    /// Scene average luminance implied by the exposure settings, or
    /// `None` if any of them is missing.
    pub fn average_luminance(&self) -> Option<f32> {
        let ratio = |(num, denom): (u32, u32)| {
            if num == 0 || denom == 0 {
                None
            } else {
                Some(num as f64 / denom as f64)
            }
        };
        let time = ratio(self.exposure_time?)?;
        let fstop = ratio(self.fstop?)?;
        let iso = self.iso.filter(|&n| n != 0)? as f64;

        Some((time * iso / (fstop * fstop * METER_CALIBRATION)) as f32)
    }

    pub fn is_ldr(&self) -> bool {
        self.bit_depth <= 8
    }
}

/// One source exposure: its decoded frame (channels `R`, `G`, `B` with
/// encoded values in [0.0, 1.0]) plus exposure information.
///
/// Only the average luminance is stored.  EV is derived from it.
#[derive(Debug, Clone)]
pub struct HdrCreationItem {
    filename: PathBuf,
    frame: Frame,
    average_luminance: Option<f32>,
    info: ImageInfo,
}

impl HdrCreationItem {
    pub fn new<P: Into<PathBuf>>(filename: P, frame: Frame, info: ImageInfo) -> HdrCreationItem {
        let average_luminance = info.average_luminance();
        HdrCreationItem {
            filename: filename.into(),
            frame: frame,
            average_luminance: average_luminance,
            info: info,
        }
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// The file name without its directory, for messages and lists.
    pub fn display_name(&self) -> String {
        self.filename
            .file_name()
            .map(|n| n.to_string_lossy().into())
            .unwrap_or_else(|| self.filename.to_string_lossy().into())
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub(crate) fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }

    pub(crate) fn set_frame(&mut self, frame: Frame) {
        self.frame = frame;
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn is_valid(&self) -> bool {
        self.frame.is_valid() && self.frame.rgb_channels().is_some()
    }

    /// True when the exposure is known and usable for fusion, i.e.
    /// strictly positive.
    pub fn has_average_luminance(&self) -> bool {
        match self.average_luminance {
            Some(l) => l > 0.0 && l.is_finite(),
            None => false,
        }
    }

    pub fn average_luminance(&self) -> Option<f32> {
        self.average_luminance
    }

    /// Negative values are clamped to zero.
    pub fn set_average_luminance(&mut self, average_luminance: f32) {
        self.average_luminance = Some(average_luminance.max(0.0));
    }

    pub fn clear_average_luminance(&mut self) {
        self.average_luminance = None;
    }

    pub fn has_ev(&self) -> bool {
        self.has_average_luminance()
    }

    pub fn ev(&self) -> Option<f32> {
        self.average_luminance.map(|l| l.log2())
    }

    pub fn set_ev(&mut self, ev: f32) {
        self.average_luminance = Some(2.0f32.powf(ev));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> HdrCreationItem {
        HdrCreationItem::new("a.jpg", Frame::new(2, 2), ImageInfo::default())
    }

    #[test]
    fn ev_round_trip() {
        let mut item = item();
        assert!(!item.has_ev());
        assert_eq!(item.ev(), None);

        for &ev in [-4.0f32, -1.5, 0.0, 0.25, 3.0, 7.0].iter() {
            item.set_ev(ev);
            assert!((item.ev().unwrap() - ev).abs() < 1e-5);
            let lum = item.average_luminance().unwrap();
            item.set_average_luminance(lum);
            assert!((item.ev().unwrap() - ev).abs() < 1e-5);
        }
    }

    #[test]
    fn average_luminance_from_exif() {
        let info = ImageInfo {
            exposure_time: Some((1, 100)),
            fstop: Some((4, 1)),
            iso: Some(200),
            bit_depth: 8,
        };
        let expected = 0.01 * 200.0 / (16.0 * 12.07488);
        assert!((info.average_luminance().unwrap() - expected).abs() < 1e-7);

        let item = HdrCreationItem::new("b.jpg", Frame::new(1, 1), info.clone());
        assert!(item.has_average_luminance());

        let missing_iso = ImageInfo { iso: None, ..info.clone() };
        assert_eq!(missing_iso.average_luminance(), None);
        let zero_time = ImageInfo {
            exposure_time: Some((0, 1)),
            ..info
        };
        assert_eq!(zero_time.average_luminance(), None);
    }

    #[test]
    fn negative_luminance_is_clamped() {
        let mut item = item();
        item.set_average_luminance(-2.0);
        assert_eq!(item.average_luminance(), Some(0.0));
        assert!(!item.has_average_luminance());
        assert!(!item.has_ev());

        item.set_average_luminance(0.0);
        assert!(!item.has_average_luminance());
        item.set_average_luminance(0.125);
        assert!(item.has_average_luminance());
    }

    #[test]
    fn validity() {
        assert!(!item().is_valid());
        let frame = Frame::from_rgb(
            pfs::Array2Df::new(2, 2),
            pfs::Array2Df::new(2, 2),
            pfs::Array2Df::new(2, 2),
        )
        .unwrap();
        let rgb = HdrCreationItem::new("c.jpg", frame, ImageInfo::default());
        assert!(rgb.is_valid());
    }

    #[test]
    fn display_name() {
        let item = HdrCreationItem::new("/tmp/shots/IMG_0001.JPG", Frame::new(1, 1), ImageInfo::default());
        assert_eq!(item.display_name(), "IMG_0001.JPG");
    }
}
