//! YAML description of a readout, and generators for common module layouts.
//!
//! ```yaml
//! module_definitions:
//!   - name: pixels
//!     kind: explicit
//!     size: [8.0, 8.0]
//!     channels:
//!       - id: 0
//!         pixels:
//!           - { origin: [0.0, 0.0], size: [2.0, 2.0] }
//! planes:
//!   - id: 0
//!     position: [0.0, 0.0, 0.0]
//!     normal: [0.0, 0.0, -1.0]
//!     cathode_position: [0.0, 0.0, 100.0]
//!     modules:
//!       - { definition: pixels, id: 0, origin: [-4.0, -4.0], first_daq_channel: 100 }
//! ```
//! Module definitions can also be generated with `kind: pixel_grid` or `kind: strips`
//! instead of listing channels.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::decoding::DecodingMap;
use super::error::ReadoutError;
use super::geometry::{Vec2, Vec3};
use super::readout::{Readout, ReadoutPlane};
use super::readout_module::{ReadoutChannel, ReadoutModule, ReadoutPixel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StripDirection {
    /// Strips run along x and resolve y
    AlongX,
    /// Strips run along y and resolve x
    AlongY,
}

/// How the channels of a module definition are given
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelLayout {
    Explicit {
        channels: Vec<ReadoutChannel>,
    },
    PixelGrid {
        nx: usize,
        ny: usize,
        pitch: f64,
    },
    Strips {
        n_strips: usize,
        pitch: f64,
        length: f64,
        direction: StripDirection,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub name: String,
    #[serde(default)]
    pub tolerance: f64,
    /// Required for explicit layouts, derived for generated ones
    #[serde(default)]
    pub size: Option<Vec2>,
    #[serde(flatten)]
    pub layout: ChannelLayout,
}

impl ModuleDefinition {
    /// Build the unplaced module
    pub fn build(&self) -> Result<ReadoutModule, ReadoutError> {
        let mut module = match &self.layout {
            ChannelLayout::Explicit { channels } => {
                let mut channels = channels.clone();
                channels.sort_by_key(|c| c.id);
                if channels.iter().enumerate().any(|(idx, c)| c.id != idx as i32) {
                    return Err(ReadoutError::BadChannelIds {
                        name: self.name.clone(),
                        channels: channels.len(),
                    });
                }
                let size = self.size.ok_or(ReadoutError::BadModuleSize {
                    name: self.name.clone(),
                    size: [0.0, 0.0],
                })?;
                ReadoutModule::new(&self.name, size, self.tolerance, channels)
            }
            ChannelLayout::PixelGrid { nx, ny, pitch } => pixel_grid_module(&self.name, *nx, *ny, *pitch),
            ChannelLayout::Strips {
                n_strips,
                pitch,
                length,
                direction,
            } => strip_module(&self.name, *n_strips, *pitch, *length, *direction),
        };
        if !(module.size[0] > 0.0 && module.size[1] > 0.0) {
            return Err(ReadoutError::BadModuleSize {
                name: self.name.clone(),
                size: module.size,
            });
        }
        module.tolerance = self.tolerance;
        Ok(module)
    }
}

/// Placement of a module definition in a plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModulePlacement {
    pub definition: String,
    pub id: i32,
    pub origin: Vec2,
    #[serde(default)]
    pub rotation: f64,
    /// Acquisition id of the module's first channel. Defaults to the number of channels
    /// placed before this module.
    #[serde(default)]
    pub first_daq_channel: Option<i32>,
    /// Decoding CSV file. Without one, readout channel n is read by acquisition
    /// channel first_daq_channel + n.
    #[serde(default)]
    pub decoding_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaneDescription {
    pub id: i32,
    pub position: Vec3,
    pub normal: Vec3,
    pub cathode_position: Vec3,
    #[serde(default = "default_charge_collection")]
    pub charge_collection: f64,
    pub modules: Vec<ModulePlacement>,
}

fn default_charge_collection() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadoutDescription {
    pub module_definitions: Vec<ModuleDefinition>,
    pub planes: Vec<PlaneDescription>,
}

impl ReadoutDescription {
    /// Build the readout. Relative decoding file paths are joined to base_dir.
    pub fn build(&self, base_dir: Option<&Path>) -> Result<Readout, ReadoutError> {
        let mut definitions: Vec<(String, ReadoutModule)> = Vec::new();
        for definition in self.module_definitions.iter() {
            definitions.push((definition.name.clone(), definition.build()?));
        }

        let mut placed_channels: i32 = 0;
        let mut planes = Vec::new();
        for plane_desc in self.planes.iter() {
            let mut plane = ReadoutPlane::new(
                plane_desc.id,
                plane_desc.position,
                plane_desc.normal,
                plane_desc.cathode_position,
                plane_desc.charge_collection,
            )?;
            for placement in plane_desc.modules.iter() {
                let Some((_, definition)) = definitions.iter().find(|(name, _)| *name == placement.definition) else {
                    return Err(ReadoutError::UnknownModuleDefinition(placement.definition.clone()));
                };
                let mut module = definition.placed(placement.id, placement.origin, placement.rotation);
                let first_daq = placement.first_daq_channel.unwrap_or(placed_channels);
                let decoding = match &placement.decoding_file {
                    Some(file) => {
                        let path = match base_dir {
                            Some(dir) if file.is_relative() => dir.join(file),
                            _ => file.clone(),
                        };
                        DecodingMap::new(&path)?
                    }
                    None => DecodingMap::in_module_order(module.channels().iter().map(|c| c.id)),
                };
                assign_daq_ids(&mut module, &decoding, first_daq)?;
                placed_channels += module.number_of_channels() as i32;
                plane.add_module(module)?;
            }
            planes.push(plane);
        }
        Readout::from_planes(planes)
    }
}

fn assign_daq_ids(module: &mut ReadoutModule, decoding: &DecodingMap, first_daq: i32) -> Result<(), ReadoutError> {
    let module_id = module.id;
    for entry in decoding.entries() {
        let Some(channel) = module.channel_mut(entry.readout_channel) else {
            return Err(ReadoutError::BadDecodedChannel {
                module: module_id,
                channel: entry.readout_channel,
            });
        };
        channel.daq_id = first_daq + entry.daq_offset;
    }
    Ok(())
}

/// A module of nx * ny square pixels. Channel j * nx + i is the pixel in column i, row j.
pub fn pixel_grid_module(name: &str, nx: usize, ny: usize, pitch: f64) -> ReadoutModule {
    let mut channels = Vec::with_capacity(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            let origin = [i as f64 * pitch, j as f64 * pitch];
            channels.push(ReadoutChannel::new(
                (j * nx + i) as i32,
                vec![ReadoutPixel::new(origin, [pitch, pitch])],
            ));
        }
    }
    ReadoutModule::new(name, [nx as f64 * pitch, ny as f64 * pitch], 0.0, channels)
}

/// A module of parallel strips, each a single long pixel
pub fn strip_module(name: &str, n_strips: usize, pitch: f64, length: f64, direction: StripDirection) -> ReadoutModule {
    let channels = (0..n_strips)
        .map(|k| {
            let offset = k as f64 * pitch;
            let pixel = match direction {
                StripDirection::AlongX => ReadoutPixel::new([0.0, offset], [length, pitch]),
                StripDirection::AlongY => ReadoutPixel::new([offset, 0.0], [pitch, length]),
            };
            ReadoutChannel::new(k as i32, vec![pixel])
        })
        .collect();
    let across = n_strips as f64 * pitch;
    let size = match direction {
        StripDirection::AlongX => [length, across],
        StripDirection::AlongY => [across, length],
    };
    ReadoutModule::new(name, size, 0.0, channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DESCRIPTION: &str = r#"
module_definitions:
  - name: pixels
    kind: pixel_grid
    nx: 4
    ny: 4
    pitch: 2.0
  - name: strips
    kind: strips
    n_strips: 8
    pitch: 1.0
    length: 8.0
    direction: along_y
  - name: pair
    kind: explicit
    size: [2.0, 1.0]
    channels:
      - id: 1
        pixels:
          - { origin: [1.0, 0.0], size: [1.0, 1.0] }
      - id: 0
        pixels:
          - { origin: [0.0, 0.0], size: [1.0, 1.0] }
planes:
  - id: 0
    position: [0.0, 0.0, 0.0]
    normal: [0.0, 0.0, -1.0]
    cathode_position: [0.0, 0.0, 100.0]
    modules:
      - { definition: pixels, id: 0, origin: [-4.0, -4.0] }
      - { definition: pair, id: 1, origin: [10.0, 10.0], first_daq_channel: 500 }
  - id: 1
    position: [0.0, 0.0, 0.0]
    normal: [0.0, 0.0, 1.0]
    cathode_position: [0.0, 0.0, -100.0]
    modules:
      - { definition: strips, id: 0, origin: [-4.0, -4.0], decoding_file: strips.csv }
"#;

    #[test]
    fn test_build_description() {
        let dir = tempfile::tempdir().unwrap();
        let mut csv = std::fs::File::create(dir.path().join("strips.csv")).unwrap();
        write!(csv, "daq,readout\n0,7\n1,6\n2,5\n3,4\n4,3\n5,2\n6,1\n7,0\n").unwrap();
        let readout_path = dir.path().join("readout.yaml");
        std::fs::write(&readout_path, DESCRIPTION).unwrap();

        let readout = Readout::read_readout_file(&readout_path).unwrap();
        assert_eq!(readout.number_of_planes(), 2);
        assert_eq!(readout.number_of_modules(), 3);
        assert_eq!(readout.number_of_channels(), 16 + 2 + 8);

        // Running count: pixels take 0..16, pair has an explicit start, strips follow at 18
        assert_eq!(readout.channel_to_acquisition(0, 0, 5), Some(5));
        assert_eq!(readout.channel_to_acquisition(0, 1, 0), Some(500));
        assert_eq!(readout.channel_to_acquisition(1, 0, 7), Some(18));
        assert_eq!(readout.channel_to_acquisition(1, 0, 0), Some(25));

        // Negative z lies in the second plane's volume, resolved by strip 0 at x = -3.5
        let address = readout.hit_channel(-3.5, 0.0, -20.0).unwrap();
        assert_eq!(address.plane_id, 1);
        assert_eq!(address.channel_id, 0);
        let position = readout.channel_position(1, 0, 0).unwrap();
        assert!((position[0] + 3.5).abs() < 1e-9);
        assert!(position[1].is_nan());
    }

    #[test]
    fn test_unknown_definition() {
        let text = DESCRIPTION.replace("definition: pair", "definition: missing");
        let description: ReadoutDescription = serde_yaml::from_str(&text).unwrap();
        assert!(matches!(
            description.build(None),
            Err(ReadoutError::UnknownModuleDefinition(_))
        ));
    }

    #[test]
    fn test_overlapping_daq_ids() {
        let text = DESCRIPTION.replace("first_daq_channel: 500", "first_daq_channel: 3");
        let description: ReadoutDescription = serde_yaml::from_str(&text).unwrap();
        let text_dir = tempfile::tempdir().unwrap();
        std::fs::write(text_dir.path().join("strips.csv"), "daq,readout\n").unwrap();
        assert!(matches!(
            description.build(Some(text_dir.path())),
            Err(ReadoutError::DuplicateDaqId(_))
        ));
    }
}
