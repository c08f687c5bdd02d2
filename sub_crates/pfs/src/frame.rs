use std::collections::BTreeMap;

use crate::array2d::{Array2Df, Rect};
use crate::FrameError;

/// Tag key describing the radiometric scale of the frame's values.
pub const LUMINANCE_TAG: &str = "LUMINANCE";

/// String key -> string value metadata attached to a frame.
pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    name: String,
    data: Array2Df,
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Array2Df {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2Df {
        &mut self.data
    }
}

/// A set of equally sized floating point channels plus metadata tags.
///
/// Channel order is the insertion order.  Every channel has the frame's
/// width and height; this is checked whenever a channel is added.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: usize,
    height: usize,
    channels: Vec<Channel>,
    tags: Tags,
}

impl Frame {
    pub fn new(width: usize, height: usize) -> Frame {
        Frame {
            width: width,
            height: height,
            channels: Vec::new(),
            tags: Tags::new(),
        }
    }

    /// Builds a frame with `R`, `G` and `B` channels.
    pub fn from_rgb(r: Array2Df, g: Array2Df, b: Array2Df) -> Result<Frame, FrameError> {
        let mut frame = Frame::new(r.width(), r.height());
        frame.add_channel("R", r)?;
        frame.add_channel("G", g)?;
        frame.add_channel("B", b)?;
        Ok(frame)
    }

    /// Builds a frame with `X`, `Y` and `Z` channels.
    pub fn from_xyz(x: Array2Df, y: Array2Df, z: Array2Df) -> Result<Frame, FrameError> {
        let mut frame = Frame::new(x.width(), x.height());
        frame.add_channel("X", x)?;
        frame.add_channel("Y", y)?;
        frame.add_channel("Z", z)?;
        Ok(frame)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && !self.channels.is_empty()
    }

    /// Adds a channel, replacing any existing channel with the same name.
    pub fn add_channel(&mut self, name: &str, data: Array2Df) -> Result<(), FrameError> {
        if data.dimensions() != self.dimensions() {
            return Err(FrameError::SizeMismatch {
                expected: self.dimensions(),
                got: data.dimensions(),
            });
        }

        if let Some(ch) = self.channels.iter_mut().find(|ch| ch.name == name) {
            ch.data = data;
        } else {
            self.channels.push(Channel {
                name: name.into(),
                data: data,
            });
        }
        Ok(())
    }

    /// Returns the named channel, creating a zero-filled one if needed.
    pub fn create_channel(&mut self, name: &str) -> &mut Array2Df {
        let i = match self.channels.iter().position(|ch| ch.name == name) {
            Some(i) => i,
            None => {
                self.channels.push(Channel {
                    name: name.into(),
                    data: Array2Df::new(self.width, self.height),
                });
                self.channels.len() - 1
            }
        };
        &mut self.channels[i].data
    }

    pub fn remove_channel(&mut self, name: &str) -> Option<Array2Df> {
        let i = self.channels.iter().position(|ch| ch.name == name)?;
        Some(self.channels.remove(i).data)
    }

    pub fn channel(&self, name: &str) -> Option<&Array2Df> {
        self.channels
            .iter()
            .find(|ch| ch.name == name)
            .map(|ch| &ch.data)
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Array2Df> {
        self.channels
            .iter_mut()
            .find(|ch| ch.name == name)
            .map(|ch| &mut ch.data)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|ch| ch.name.as_str()).collect()
    }

    pub fn xyz_channels(&self) -> Option<(&Array2Df, &Array2Df, &Array2Df)> {
        self.channel_triple(["X", "Y", "Z"])
    }

    pub fn xyz_channels_mut(&mut self) -> Option<(&mut Array2Df, &mut Array2Df, &mut Array2Df)> {
        self.channel_triple_mut(["X", "Y", "Z"])
    }

    pub fn rgb_channels(&self) -> Option<(&Array2Df, &Array2Df, &Array2Df)> {
        self.channel_triple(["R", "G", "B"])
    }

    pub fn rgb_channels_mut(&mut self) -> Option<(&mut Array2Df, &mut Array2Df, &mut Array2Df)> {
        self.channel_triple_mut(["R", "G", "B"])
    }

    fn channel_triple(&self, names: [&str; 3]) -> Option<(&Array2Df, &Array2Df, &Array2Df)> {
        Some((
            self.channel(names[0])?,
            self.channel(names[1])?,
            self.channel(names[2])?,
        ))
    }

    fn channel_triple_mut(
        &mut self,
        names: [&str; 3],
    ) -> Option<(&mut Array2Df, &mut Array2Df, &mut Array2Df)> {
        let (mut a, mut b, mut c) = (None, None, None);
        for ch in self.channels.iter_mut() {
            if ch.name == names[0] {
                a = Some(&mut ch.data);
            } else if ch.name == names[1] {
                b = Some(&mut ch.data);
            } else if ch.name == names[2] {
                c = Some(&mut ch.data);
            }
        }
        Some((a?, b?, c?))
    }

    /// Renames three channels in one go, e.g. `R,G,B` -> `X,Y,Z` after
    /// an in-place color space conversion.
    pub(crate) fn rename_channels(&mut self, from: [&str; 3], to: [&str; 3]) {
        for ch in self.channels.iter_mut() {
            if let Some(i) = from.iter().position(|n| *n == ch.name) {
                ch.name = to[i].into();
            }
        }
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|v| v.as_str())
    }

    pub fn set_tag(&mut self, key: &str, value: &str) {
        self.tags.insert(key.into(), value.into());
    }

    /// Moves every channel by `(dx, dy)` pixels, zero-filling the
    /// uncovered area.  Dimensions are unchanged.
    pub fn shift(&mut self, dx: i32, dy: i32) {
        if dx == 0 && dy == 0 {
            return;
        }
        for ch in self.channels.iter_mut() {
            ch.data = ch.data.shifted(dx, dy);
        }
    }

    /// Crops every channel to `rect`.
    pub fn crop(&mut self, rect: Rect) -> Result<(), FrameError> {
        if rect.x + rect.width > self.width || rect.y + rect.height > self.height {
            return Err(FrameError::CropOutOfBounds {
                rect: rect,
                dimensions: self.dimensions(),
            });
        }
        for ch in self.channels.iter_mut() {
            ch.data = ch.data.cropped(rect);
        }
        self.width = rect.width;
        self.height = rect.height;
        Ok(())
    }
}
