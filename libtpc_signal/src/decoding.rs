// A decoding file maps the readout channel numbers of a module (the geometric channel
// order) to acquisition channels. Rows look like
//   daq,readout
//   0,17
//   1,16
// where daq is relative to the first acquisition channel of the module. Rows with a
// negative readout channel mark acquisition channels which are not connected.
use std::path::Path;

use super::error::DecodingError;

const ENTRIES_PER_LINE: usize = 2;

/// A single row of a decoding file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodingEntry {
    /// Acquisition channel relative to the module's first acquisition channel
    pub daq_offset: i32,
    pub readout_channel: i32,
}

/// DecodingMap contains the mapping of readout channels of a module to acquisition channels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodingMap {
    entries: Vec<DecodingEntry>,
}

impl DecodingMap {
    /// Read a decoding CSV file. The first line is a header and is skipped.
    pub fn new(path: &Path) -> Result<Self, DecodingError> {
        if !path.exists() {
            return Err(DecodingError::BadFilePath(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse the contents of a decoding file
    pub fn parse(contents: &str) -> Result<Self, DecodingError> {
        let mut map = Self::default();
        let mut lines = contents.lines().enumerate();
        lines.next(); // Skip the header
        for (line_number, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let entries: Vec<&str> = line.split_terminator(",").map(str::trim).collect();
            if entries.len() != ENTRIES_PER_LINE {
                return Err(DecodingError::BadFileFormat(line_number + 1));
            }
            let daq_offset: i32 = entries[0].parse()?;
            let readout_channel: i32 = entries[1].parse()?;
            if readout_channel < 0 {
                continue;
            }
            map.entries.push(DecodingEntry {
                daq_offset,
                readout_channel,
            });
        }
        Ok(map)
    }

    /// Decoding that connects the k-th channel of a module, in storage order, to offset k
    pub fn in_module_order(channel_ids: impl IntoIterator<Item = i32>) -> Self {
        Self {
            entries: channel_ids
                .into_iter()
                .zip(0..)
                .map(|(readout_channel, daq_offset)| DecodingEntry {
                    daq_offset,
                    readout_channel,
                })
                .collect(),
        }
    }

    /// The acquisition offset of a readout channel, if it is connected
    pub fn daq_offset(&self, readout_channel: i32) -> Option<i32> {
        self.entries
            .iter()
            .find(|e| e.readout_channel == readout_channel)
            .map(|e| e.daq_offset)
    }

    pub fn entries(&self) -> &[DecodingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_decoding_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "daq,readout\n0,2\n1, 1\n2,-1\n3,0\n").unwrap();
        let map = DecodingMap::new(file.path()).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.daq_offset(2), Some(0));
        assert_eq!(map.daq_offset(0), Some(3));
        assert_eq!(map.daq_offset(5), None);
    }

    #[test]
    fn test_module_order_decoding() {
        let map = DecodingMap::in_module_order([4, 0, 9]);
        assert_eq!(map.daq_offset(4), Some(0));
        assert_eq!(map.daq_offset(0), Some(1));
        assert_eq!(map.daq_offset(9), Some(2));
        assert_eq!(map.daq_offset(1), None);
    }

    #[test]
    fn test_bad_decoding_file() {
        assert!(matches!(
            DecodingMap::parse("daq,readout\n0,1,2\n"),
            Err(DecodingError::BadFileFormat(2))
        ));
        assert!(matches!(
            DecodingMap::parse("daq,readout\nzero,1\n"),
            Err(DecodingError::ParsingError(_))
        ));
    }
}
