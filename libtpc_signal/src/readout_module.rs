//! Modules, channels and pixels: the 2D part of the readout geometry.
//!
//! A module is a rectangle of size `size` placed at `origin` in its plane and rotated by
//! `rotation` degrees around that origin. Its channels are made of pixels described in the
//! module coordinate system, where the module spans [0, size).
use serde::{Deserialize, Serialize};

use super::constants::PIXEL_TOLERANCE;
use super::geometry::{add2, rotate, sub2, Vec2};

/// Upper limit of mapping nodes along one axis
const MAX_MAPPING_NODES: usize = 1024;
/// Neighbour rings inspected around a mapping node before falling back to a full search
const MAPPING_SEARCH_RINGS: usize = 2;

/// An elementary rectangle (or right triangle) of a channel, in module coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadoutPixel {
    pub origin: Vec2,
    pub size: Vec2,
    /// Rotation around the pixel origin, degrees
    #[serde(default)]
    pub rotation: f64,
    /// A triangle has its right angle at the origin and its hypotenuse joining
    /// (size.x, 0) to (0, size.y)
    #[serde(default)]
    pub triangle: bool,
}

impl ReadoutPixel {
    pub fn new(origin: Vec2, size: Vec2) -> Self {
        Self {
            origin,
            size,
            rotation: 0.0,
            triangle: false,
        }
    }

    fn to_pixel_coordinates(&self, point: Vec2) -> Vec2 {
        rotate(sub2(point, self.origin), -self.rotation)
    }

    /// Test a point given in module coordinates
    pub fn is_inside(&self, point: Vec2) -> bool {
        let p = self.to_pixel_coordinates(point);
        let t = PIXEL_TOLERANCE;
        if p[0] < -t || p[1] < -t || p[0] > self.size[0] + t || p[1] > self.size[1] + t {
            return false;
        }
        if self.triangle {
            p[1] <= self.size[1] - p[0] * self.size[1] / self.size[0] + t
        } else {
            true
        }
    }

    /// Geometric center in module coordinates (the centroid for triangles)
    pub fn center(&self) -> Vec2 {
        let local = if self.triangle {
            [self.size[0] / 3.0, self.size[1] / 3.0]
        } else {
            [self.size[0] / 2.0, self.size[1] / 2.0]
        };
        add2(self.origin, rotate(local, self.rotation))
    }

    fn smallest_extent(&self) -> f64 {
        self.size[0].min(self.size[1])
    }
}

/// A readout channel: a set of pixels read by one acquisition channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadoutChannel {
    /// Readout channel number inside the module
    pub id: i32,
    /// Acquisition channel, assigned when the module is placed in a readout
    #[serde(skip, default = "unassigned_daq_id")]
    pub daq_id: i32,
    pub pixels: Vec<ReadoutPixel>,
}

fn unassigned_daq_id() -> i32 {
    -1
}

impl ReadoutChannel {
    pub fn new(id: i32, pixels: Vec<ReadoutPixel>) -> Self {
        Self {
            id,
            daq_id: -1,
            pixels,
        }
    }

    pub fn is_inside(&self, point: Vec2) -> bool {
        self.pixels.iter().any(|p| p.is_inside(point))
    }

    /// Position of the channel in module coordinates. A strip channel only resolves the
    /// coordinate across the strip; the coordinate along the strip is NaN.
    pub fn local_position(&self) -> Vec2 {
        match self.pixels.as_slice() {
            [] => [f64::NAN, f64::NAN],
            [pixel] => {
                let center = pixel.center();
                let [sx, sy] = pixel.size;
                [
                    if sx > 2.0 * sy { f64::NAN } else { center[0] },
                    if sy > 2.0 * sx { f64::NAN } else { center[1] },
                ]
            }
            [first, second, ..] => {
                let c0 = first.center();
                let c1 = second.center();
                let dx = (c1[0] - c0[0]).abs();
                let dy = (c1[1] - c0[1]).abs();
                let n = self.pixels.len() as f64;
                let mean = |axis: usize| self.pixels.iter().map(|p| p.center()[axis]).sum::<f64>() / n;
                [
                    if dy > dx { mean(0) } else { f64::NAN },
                    if dx > dy { mean(1) } else { f64::NAN },
                ]
            }
        }
    }
}

/// A grid of nodes over a module, each remembering the channel covering it, used to
/// start the search for the channel under a point.
#[derive(Debug, Clone, Default, PartialEq)]
struct ReadoutMapping {
    nodes: [usize; 2],
    size: Vec2,
    cells: Vec<Option<usize>>,
}

impl ReadoutMapping {
    fn new(size: Vec2, channels: &[ReadoutChannel]) -> Self {
        let smallest = channels
            .iter()
            .flat_map(|c| c.pixels.iter())
            .map(ReadoutPixel::smallest_extent)
            .filter(|e| *e > 0.0)
            .fold(f64::INFINITY, f64::min);
        let nodes_along = |extent: f64| -> usize {
            if !smallest.is_finite() {
                return 1;
            }
            ((2.0 * extent / smallest).ceil() as usize).clamp(1, MAX_MAPPING_NODES)
        };
        let nodes = [nodes_along(size[0]), nodes_along(size[1])];
        let mut mapping = Self {
            nodes,
            size,
            cells: vec![None; nodes[0] * nodes[1]],
        };
        for i in 0..nodes[0] {
            for j in 0..nodes[1] {
                let point = mapping.node_center(i, j);
                mapping.cells[i * nodes[1] + j] = channels.iter().position(|c| c.is_inside(point));
            }
        }
        mapping
    }

    fn node_center(&self, i: usize, j: usize) -> Vec2 {
        [
            (i as f64 + 0.5) * self.size[0] / self.nodes[0] as f64,
            (j as f64 + 0.5) * self.size[1] / self.nodes[1] as f64,
        ]
    }

    fn node_of(&self, point: Vec2) -> (usize, usize) {
        let along = |axis: usize| -> usize {
            let n = self.nodes[axis];
            let idx = (point[axis] / self.size[axis] * n as f64).floor();
            if idx < 0.0 {
                0
            } else {
                (idx as usize).min(n - 1)
            }
        };
        (along(0), along(1))
    }

    /// Channels stored at the nodes of the ring at Chebyshev distance `radius` around (i, j)
    fn ring(&self, i: usize, j: usize, radius: usize) -> impl Iterator<Item = usize> + '_ {
        let (i, j, r) = (i as i64, j as i64, radius as i64);
        let (ni, nj) = (self.nodes[0] as i64, self.nodes[1] as i64);
        (i - r..=i + r)
            .flat_map(move |a| (j - r..=j + r).map(move |b| (a, b)))
            .filter(move |(a, b)| (a - i).abs().max((b - j).abs()) == r)
            .filter(move |(a, b)| *a >= 0 && *b >= 0 && *a < ni && *b < nj)
            .filter_map(move |(a, b)| self.cells[(a * nj + b) as usize])
    }

    fn unmapped_nodes(&self) -> usize {
        self.cells.iter().filter(|c| c.is_none()).count()
    }
}

/// A rectangular readout module holding channels
#[derive(Debug, Clone, PartialEq)]
pub struct ReadoutModule {
    pub id: i32,
    pub name: String,
    /// Position of the module corner in the plane, mm
    pub origin: Vec2,
    pub size: Vec2,
    /// Rotation around the origin, degrees
    pub rotation: f64,
    /// Margin accepted around the module edges, mm
    pub tolerance: f64,
    channels: Vec<ReadoutChannel>,
    mapping: ReadoutMapping,
}

impl ReadoutModule {
    /// Create an unplaced module. Channels are usually numbered 0..n in order, which makes
    /// lookups by id direct; any other numbering falls back to a search.
    pub fn new(name: &str, size: Vec2, tolerance: f64, channels: Vec<ReadoutChannel>) -> Self {
        let mapping = ReadoutMapping::new(size, &channels);
        if mapping.unmapped_nodes() > 0 {
            log::debug!(
                "Module {} has {} mapping nodes not covered by any channel",
                name,
                mapping.unmapped_nodes()
            );
        }
        Self {
            id: 0,
            name: name.to_string(),
            origin: [0.0, 0.0],
            size,
            rotation: 0.0,
            tolerance,
            channels,
            mapping,
        }
    }

    /// A copy of this module placed in a plane
    pub fn placed(&self, id: i32, origin: Vec2, rotation: f64) -> Self {
        let mut module = self.clone();
        module.id = id;
        module.origin = origin;
        module.rotation = rotation;
        module
    }

    pub fn to_module_coordinates(&self, x: f64, y: f64) -> Vec2 {
        rotate(sub2([x, y], self.origin), -self.rotation)
    }

    pub fn to_plane_coordinates(&self, local: Vec2) -> Vec2 {
        add2(self.origin, rotate(local, self.rotation))
    }

    pub fn is_inside(&self, x: f64, y: f64) -> bool {
        let local = self.to_module_coordinates(x, y);
        let t = self.tolerance;
        local[0] >= -t && local[1] >= -t && local[0] < self.size[0] + t && local[1] < self.size[1] + t
    }

    /// The channel whose pixels contain (x, y), given in plane coordinates
    pub fn find_channel(&self, x: f64, y: f64) -> Option<&ReadoutChannel> {
        if !self.is_inside(x, y) {
            return None;
        }
        let local = self.to_module_coordinates(x, y);
        let (i, j) = self.mapping.node_of(local);
        for radius in 0..=MAPPING_SEARCH_RINGS {
            for idx in self.mapping.ring(i, j, radius) {
                if self.channels[idx].is_inside(local) {
                    return Some(&self.channels[idx]);
                }
            }
        }
        self.channels.iter().find(|c| c.is_inside(local))
    }

    fn index_of(&self, id: i32) -> Option<usize> {
        match usize::try_from(id).ok().filter(|idx| self.channels.get(*idx).is_some_and(|c| c.id == id)) {
            Some(idx) => Some(idx),
            None => self.channels.iter().position(|c| c.id == id),
        }
    }

    pub fn channel(&self, id: i32) -> Option<&ReadoutChannel> {
        self.index_of(id).map(|idx| &self.channels[idx])
    }

    pub(crate) fn channel_mut(&mut self, id: i32) -> Option<&mut ReadoutChannel> {
        self.index_of(id).map(|idx| &mut self.channels[idx])
    }

    pub fn channels(&self) -> &[ReadoutChannel] {
        &self.channels
    }

    pub(crate) fn channels_mut(&mut self) -> &mut [ReadoutChannel] {
        &mut self.channels
    }

    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    /// Module center in plane coordinates
    pub fn center(&self) -> Vec2 {
        self.to_plane_coordinates([self.size[0] / 2.0, self.size[1] / 2.0])
    }

    /// Position of a channel in plane coordinates. The coordinate a strip channel does not
    /// resolve is NaN.
    pub fn channel_position(&self, id: i32) -> Option<Vec2> {
        let local = self.channel(id)?.local_position();
        let unresolved = match (local[0].is_nan(), local[1].is_nan()) {
            (false, false) => return Some(self.to_plane_coordinates(local)),
            (true, true) => return Some([f64::NAN, f64::NAN]),
            (true, false) => [1.0, 0.0],
            (false, true) => [0.0, 1.0],
        };
        let filled = [
            if local[0].is_nan() { self.size[0] / 2.0 } else { local[0] },
            if local[1].is_nan() { self.size[1] / 2.0 } else { local[1] },
        ];
        let mut position = self.to_plane_coordinates(filled);
        // The strip runs along the unresolved direction, whichever plane axis it is closest to
        let direction = rotate(unresolved, self.rotation);
        if direction[0].abs() >= direction[1].abs() {
            position[0] = f64::NAN;
        } else {
            position[1] = f64::NAN;
        }
        Some(position)
    }
}
