use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// ChannelAddress is the full location of a readout channel: the geometric
/// (plane, module, channel) triple plus its acquisition (DAQ) channel id.
///
/// It implements Hash on the acquisition id alone, which is unique within a readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAddress {
    pub plane_id: i32,
    pub module_id: i32,
    pub channel_id: i32,
    pub daq_id: i32,
}

impl ChannelAddress {
    pub fn new(plane_id: i32, module_id: i32, channel_id: i32, daq_id: i32) -> Self {
        Self {
            plane_id,
            module_id,
            channel_id,
            daq_id,
        }
    }

    pub fn uuid(&self) -> u64 {
        generate_uuid(self.plane_id, self.module_id, self.channel_id)
    }
}

impl Hash for ChannelAddress {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.daq_id.hash(state)
    }
}

/// Generate a unique id number for a geometric channel location. Each id is packed into
/// 21 bits, so ids must lie in [0, 2^21).
pub fn generate_uuid(plane_id: i32, module_id: i32, channel_id: i32) -> u64 {
    const BITS: u64 = 21;
    const MASK: u64 = (1 << BITS) - 1;
    ((plane_id as u64 & MASK) << (2 * BITS))
        | ((module_id as u64 & MASK) << BITS)
        | (channel_id as u64 & MASK)
}
