use serde::{Deserialize, Serialize};

/// A fixed binning 1D counting histogram, aggregated over a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram1D {
    pub name: String,
    pub title: String,
    pub min: f64,
    pub max: f64,
    bins: Vec<u64>,
    underflow: u64,
    overflow: u64,
}

impl Histogram1D {
    pub fn new(name: &str, title: &str, n_bins: usize, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            min,
            max,
            bins: vec![0; n_bins.max(1)],
            underflow: 0,
            overflow: 0,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.bins.len()
    }

    /// The bin holding x, None outside [min, max)
    pub fn find_bin(&self, x: f64) -> Option<usize> {
        if !(x >= self.min && x < self.max) {
            return None;
        }
        let width = (self.max - self.min) / self.bins.len() as f64;
        let bin = ((x - self.min) / width).floor() as usize;
        Some(bin.min(self.bins.len() - 1))
    }

    pub fn fill(&mut self, x: f64) {
        match self.find_bin(x) {
            Some(bin) => self.bins[bin] += 1,
            None if x < self.min => self.underflow += 1,
            None => self.overflow += 1,
        }
    }

    pub fn bin_content(&self, bin: usize) -> u64 {
        self.bins.get(bin).copied().unwrap_or(0)
    }

    /// Content of the bin holding x
    pub fn content_at(&self, x: f64) -> u64 {
        self.find_bin(x).map(|b| self.bins[b]).unwrap_or(0)
    }

    /// Number of fills, including under/overflow
    pub fn entries(&self) -> u64 {
        self.bins.iter().sum::<u64>() + self.underflow + self.overflow
    }

    pub fn underflow(&self) -> u64 {
        self.underflow
    }

    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    /// Add the contents of another histogram with the same binning. Returns false, and
    /// leaves self untouched, if the binnings differ.
    pub fn merge(&mut self, other: &Self) -> bool {
        if self.bins.len() != other.bins.len() || self.min != other.min || self.max != other.max {
            return false;
        }
        for (mine, theirs) in self.bins.iter_mut().zip(other.bins.iter()) {
            *mine += theirs;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_and_merge() {
        let mut hist = Histogram1D::new("h", "test", 300, 4320.0, 4620.0);
        hist.fill(4320.0);
        hist.fill(4321.5);
        hist.fill(4619.9);
        hist.fill(4620.0);
        hist.fill(10.0);
        assert_eq!(hist.bin_content(0), 1);
        assert_eq!(hist.content_at(4321.0), 1);
        assert_eq!(hist.bin_content(299), 1);
        assert_eq!(hist.overflow(), 1);
        assert_eq!(hist.underflow(), 1);
        assert_eq!(hist.entries(), 5);

        let mut other = hist.clone();
        assert!(other.merge(&hist));
        assert_eq!(other.bin_content(0), 2);
        let wrong = Histogram1D::new("w", "wrong", 10, 0.0, 1.0);
        assert!(!other.merge(&wrong));
        assert_eq!(other.entries(), 10);
    }
}
