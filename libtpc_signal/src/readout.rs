//! The readout geometry registry: planes holding modules, and the lookup tables between
//! positions, geometric channels, and acquisition channels.
use std::path::Path;

use fxhash::FxHashMap;

use super::channel_address::ChannelAddress;
use super::error::ReadoutError;
use super::geometry::{dot3, normalize3, sub3, Vec2, Vec3};
use super::readout_description::ReadoutDescription;
use super::readout_module::ReadoutModule;

/// A readout plane collecting the charge drifting in the volume between the plane and
/// its cathode.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadoutPlane {
    pub id: i32,
    /// A point of the plane, mm
    pub position: Vec3,
    /// Unit normal pointing into the drift volume, toward the cathode
    pub normal: Vec3,
    pub cathode_position: Vec3,
    /// Distance between the plane and the cathode, mm
    pub drift_length: f64,
    /// Fraction of the drifting charge collected by the plane
    pub charge_collection: f64,
    modules: Vec<ReadoutModule>,
}

impl ReadoutPlane {
    /// Create a plane. The normal only needs to be parallel to the drift direction; it is
    /// normalized and oriented toward the cathode.
    pub fn new(
        id: i32,
        position: Vec3,
        normal: Vec3,
        cathode_position: Vec3,
        charge_collection: f64,
    ) -> Result<Self, ReadoutError> {
        let mut normal = normalize3(normal).ok_or(ReadoutError::DegeneratePlane(id))?;
        let mut drift_length = dot3(sub3(cathode_position, position), normal);
        if drift_length < 0.0 {
            normal = normal.map(|c| -c);
            drift_length = -drift_length;
        }
        if drift_length < f64::EPSILON {
            return Err(ReadoutError::DegeneratePlane(id));
        }
        Ok(Self {
            id,
            position,
            normal,
            cathode_position,
            drift_length,
            charge_collection,
            modules: Vec::new(),
        })
    }

    pub fn add_module(&mut self, module: ReadoutModule) -> Result<(), ReadoutError> {
        if self.modules.iter().any(|m| m.id == module.id) {
            return Err(ReadoutError::DuplicateModuleId {
                plane: self.id,
                module: module.id,
            });
        }
        self.modules.push(module);
        Ok(())
    }

    /// Signed distance of a point to the plane, positive on the cathode side
    pub fn distance_to(&self, x: f64, y: f64, z: f64) -> f64 {
        dot3(sub3([x, y, z], self.position), self.normal)
    }

    pub fn is_inside_drift_volume(&self, x: f64, y: f64, z: f64) -> bool {
        let d = self.distance_to(x, y, z);
        d > 0.0 && d < self.drift_length
    }

    /// Drift volume test using only z, taking x and y on the plane position
    pub fn is_z_inside_drift_volume(&self, z: f64) -> bool {
        self.is_inside_drift_volume(self.position[0], self.position[1], z)
    }

    pub fn modules(&self) -> &[ReadoutModule] {
        &self.modules
    }

    pub(crate) fn modules_mut(&mut self) -> &mut [ReadoutModule] {
        &mut self.modules
    }

    pub fn module(&self, module_id: i32) -> Option<&ReadoutModule> {
        self.modules.iter().find(|m| m.id == module_id)
    }

    /// The module containing (x, y), ignoring the drift volume
    pub fn module_at(&self, x: f64, y: f64) -> Option<&ReadoutModule> {
        self.modules.iter().find(|m| m.is_inside(x, y))
    }

    /// The module under a point inside the drift volume
    pub fn module_from_position(&self, x: f64, y: f64, z: f64) -> Option<&ReadoutModule> {
        if !self.is_inside_drift_volume(x, y, z) {
            return None;
        }
        self.module_at(x, y)
    }

    pub fn channel_position(&self, module_id: i32, channel_id: i32) -> Option<Vec2> {
        self.module(module_id)?.channel_position(channel_id)
    }

    pub fn number_of_channels(&self) -> usize {
        self.modules.iter().map(|m| m.number_of_channels()).sum()
    }
}

/// The full readout. Built once before a run and shared read-only by all stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readout {
    planes: Vec<ReadoutPlane>,
    daq_map: FxHashMap<i32, ChannelAddress>,
    geometry_map: FxHashMap<u64, i32>,
}

impl Readout {
    /// Build the registry from planes whose channels have acquisition ids assigned
    pub fn from_planes(planes: Vec<ReadoutPlane>) -> Result<Self, ReadoutError> {
        let mut readout = Self::default();
        for plane in planes.iter() {
            if readout.planes.iter().any(|p| p.id == plane.id) {
                return Err(ReadoutError::DuplicatePlaneId(plane.id));
            }
            for module in plane.modules() {
                for channel in module.channels() {
                    if channel.daq_id < 0 {
                        continue;
                    }
                    let address = ChannelAddress::new(plane.id, module.id, channel.id, channel.daq_id);
                    if readout.daq_map.insert(channel.daq_id, address).is_some() {
                        return Err(ReadoutError::DuplicateDaqId(channel.daq_id));
                    }
                    readout.geometry_map.insert(address.uuid(), channel.daq_id);
                }
            }
            readout.planes.push(plane.clone());
        }
        log::info!(
            "Readout built with {} planes, {} modules, {} channels",
            readout.number_of_planes(),
            readout.number_of_modules(),
            readout.number_of_channels()
        );
        Ok(readout)
    }

    /// Read a YAML readout description. Decoding files are resolved relative to the
    /// description's directory.
    pub fn read_readout_file(path: &Path) -> Result<Self, ReadoutError> {
        if !path.exists() {
            return Err(ReadoutError::BadFilePath(path.to_path_buf()));
        }
        let yaml_str = std::fs::read_to_string(path)?;
        let description: ReadoutDescription = serde_yaml::from_str(&yaml_str)?;
        description.build(path.parent())
    }

    pub fn planes(&self) -> &[ReadoutPlane] {
        &self.planes
    }

    pub fn plane(&self, plane_id: i32) -> Option<&ReadoutPlane> {
        self.planes.iter().find(|p| p.id == plane_id)
    }

    pub fn number_of_planes(&self) -> usize {
        self.planes.len()
    }

    pub fn number_of_modules(&self) -> usize {
        self.planes.iter().map(|p| p.modules().len()).sum()
    }

    pub fn number_of_channels(&self) -> usize {
        self.planes.iter().map(|p| p.number_of_channels()).sum()
    }

    /// The module of a plane covering (x, y)
    pub fn resolve_module(&self, plane_id: i32, x: f64, y: f64) -> Option<i32> {
        self.plane(plane_id)?.module_at(x, y).map(|m| m.id)
    }

    /// The channel collecting the charge deposited at a point. The point must lie inside
    /// a plane's drift volume and inside a connected channel's pixel.
    pub fn hit_channel(&self, x: f64, y: f64, z: f64) -> Option<ChannelAddress> {
        for plane in self.planes.iter() {
            let Some(module) = plane.module_from_position(x, y, z) else {
                continue;
            };
            let Some(channel) = module.find_channel(x, y) else {
                continue;
            };
            if channel.daq_id < 0 {
                continue;
            }
            return Some(ChannelAddress::new(plane.id, module.id, channel.id, channel.daq_id));
        }
        None
    }

    /// The geometric location of an acquisition channel
    pub fn acquisition_to_channel(&self, daq_id: i32) -> Option<ChannelAddress> {
        self.daq_map.get(&daq_id).copied()
    }

    /// The acquisition channel of a geometric channel
    pub fn channel_to_acquisition(&self, plane_id: i32, module_id: i32, channel_id: i32) -> Option<i32> {
        let address = ChannelAddress::new(plane_id, module_id, channel_id, -1);
        self.geometry_map.get(&address.uuid()).copied()
    }

    /// Channel position in plane coordinates, with NaN on the axis a strip does not resolve
    pub fn channel_position(&self, plane_id: i32, module_id: i32, channel_id: i32) -> Option<Vec2> {
        self.plane(plane_id)?.channel_position(module_id, channel_id)
    }

    pub fn distance_to_plane(&self, plane_id: i32, x: f64, y: f64, z: f64) -> Option<f64> {
        self.plane(plane_id).map(|p| p.distance_to(x, y, z))
    }

    pub fn module_center(&self, plane_id: i32, module_id: i32) -> Option<Vec2> {
        self.plane(plane_id)?.module(module_id).map(|m| m.center())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readout_description::{pixel_grid_module, strip_module, StripDirection};
    use approx::assert_relative_eq;

    fn single_plane_readout() -> Readout {
        let mut plane = ReadoutPlane::new(0, [0.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 0.0, 100.0], 1.0).unwrap();
        let mut module = pixel_grid_module("pixels", 4, 4, 2.0).placed(0, [-4.0, -4.0], 0.0);
        for channel in module.channels_mut() {
            channel.daq_id = 100 + channel.id;
        }
        plane.add_module(module).unwrap();
        Readout::from_planes(vec![plane]).unwrap()
    }

    #[test]
    fn test_normal_orientation() {
        let readout = single_plane_readout();
        let plane = readout.plane(0).unwrap();
        assert_eq!(plane.normal, [0.0, 0.0, 1.0]);
        assert_relative_eq!(plane.drift_length, 100.0);
        assert_relative_eq!(plane.distance_to(1.0, 1.0, 50.0), 50.0);
        assert!(plane.is_z_inside_drift_volume(99.0));
        assert!(!plane.is_z_inside_drift_volume(0.0));
        assert!(!plane.is_z_inside_drift_volume(-5.0));
    }

    #[test]
    fn test_hit_channel_and_inverse() {
        let readout = single_plane_readout();
        let address = readout.hit_channel(0.5, 0.5, 10.0).unwrap();
        assert_eq!(address.channel_id, 10);
        assert_eq!(address.daq_id, 110);
        assert_eq!(readout.acquisition_to_channel(110), Some(address));
        assert_eq!(readout.channel_to_acquisition(0, 0, 10), Some(110));
        assert!(readout.hit_channel(0.5, 0.5, 150.0).is_none());
        assert!(readout.hit_channel(5.0, 0.5, 10.0).is_none());
        assert!(readout.acquisition_to_channel(99).is_none());
        assert!(readout.acquisition_to_channel(116).is_none());
        assert_eq!(readout.resolve_module(0, 3.9, -3.9), Some(0));
        assert_eq!(readout.resolve_module(1, 0.0, 0.0), None);
    }

    #[test]
    fn test_acquisition_is_injective() {
        let readout = single_plane_readout();
        let mut seen = std::collections::HashSet::new();
        for daq in 0..300 {
            if let Some(address) = readout.acquisition_to_channel(daq) {
                assert_eq!(address.daq_id, daq);
                assert!(seen.insert((address.plane_id, address.module_id, address.channel_id)));
            }
        }
        assert_eq!(seen.len(), 16);
    }

    #[test]
    fn test_duplicate_daq_rejected() {
        let mut plane = ReadoutPlane::new(0, [0.0; 3], [0.0, 0.0, 1.0], [0.0, 0.0, 10.0], 1.0).unwrap();
        let mut module = strip_module("strips", 4, 1.0, 4.0, StripDirection::AlongY).placed(0, [0.0, 0.0], 0.0);
        for channel in module.channels_mut() {
            channel.daq_id = 7;
        }
        plane.add_module(module).unwrap();
        assert!(matches!(
            Readout::from_planes(vec![plane]),
            Err(ReadoutError::DuplicateDaqId(7))
        ));
    }

    #[test]
    fn test_degenerate_plane() {
        assert!(ReadoutPlane::new(3, [0.0; 3], [0.0; 3], [0.0, 0.0, 1.0], 1.0).is_err());
        assert!(ReadoutPlane::new(3, [0.0; 3], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], 1.0).is_err());
    }
}
