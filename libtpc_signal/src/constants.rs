//! Physical constants and documented defaults shared by the processing stages.

/// Value held by a declared observable that was never written during an event.
///
/// Every declared observable is reset to this value at the start of each event, so a
/// reader can always tell "not computed" apart from a genuine zero.
pub const UNSET_OBSERVABLE: f64 = -99999999.0;

/// Energies are carried in keV, W-values in eV
pub const EV_PER_KEV: f64 = 1000.0;

/// Diffusion coefficients are quoted in sqrt(cm) while lengths are in mm
pub const MM_PER_CM: f64 = 10.0;

/// Upper bound on the electrons produced by a single deposit, applied on top of any
/// configured per-hit cap
pub const MAX_CARRIERS_PER_HIT: u64 = 1_000_000;

/// Ratio between the FWHM and the sigma of a gaussian
pub const FWHM_OVER_SIGMA: f64 = 2.35;

/// Tolerance used when testing if a point lies inside a readout pixel (mm)
pub const PIXEL_TOLERANCE: f64 = 1.0e-6;

/// Default reference energy for the resolution scaling law (keV)
pub const DEFAULT_ENERGY_REFERENCE: f64 = 5.9;
/// Default resolution at the reference energy (% FWHM)
pub const DEFAULT_RESOLUTION_REFERENCE: f64 = 15.0;

/// Default width of the trigger integration window, in time bins
pub const DEFAULT_ADC_LENGTH: u32 = 512;

// Channel activity histogram defaults
pub const DEFAULT_LOW_THRESHOLD: f64 = 25.0;
pub const DEFAULT_HIGH_THRESHOLD: f64 = 50.0;
pub const DEFAULT_DAQ_CHANNELS: usize = 300;
pub const DEFAULT_DAQ_START_CHANNEL: f64 = 4320.0;
pub const DEFAULT_DAQ_END_CHANNEL: f64 = 4620.0;
pub const DEFAULT_READOUT_CHANNELS: usize = 128;
pub const DEFAULT_READOUT_START_CHANNEL: f64 = 0.0;
pub const DEFAULT_READOUT_END_CHANNEL: f64 = 128.0;

/// Multi-signal activity histograms are filled for 4 up to (not including) this many
/// simultaneous signals
pub const MULTI_SIGNAL_LIMIT: usize = 10;
