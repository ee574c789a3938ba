//! # libtpc_signal
//!
//! libtpc_signal simulates and reconstructs the signals of a gaseous time-projection
//! chamber (TPC). Energy deposits ("hits") are turned into the per-channel charge pulses
//! the readout electronics would record, and pulses are turned back into hits. Along the
//! way the charge can be diffused, attached and smeared, and the resulting signals can be
//! passed through a trigger and a channel activity monitor.
//!
//! ## Pipeline
//!
//! Processing is organized as an ordered list of stages. Each stage consumes the event
//! produced by the previous one and either keeps it (its output is handed to the next
//! stage) or drops it. The available stages are:
//!
//! - `electron_diffusion`: hits -> hits, splits each deposit into ionization electrons
//! and spreads them according to the drift distance
//! - `smearing`: hits -> hits, applies the detector energy resolution
//! - `hits_to_signal`: hits -> signal, projects hits onto readout channels and time bins
//! - `signal_to_hits`: signal -> hits, reconstructs hits from channel positions and
//! peak times
//! - `trigger_analysis`: signal -> signal, evaluates the trigger integral for a set of
//! thresholds
//! - `channel_activity`: signal -> signal, fills channel occupancy histograms
//!
//! Stages publish observables (`<stage>.<name>`) into a per-event record. Unset
//! observables read `-99999999.0`. A stage may declare cuts on its observables, events
//! outside a cut are dropped by that stage.
//!
//! Events are distributed over `n_threads` workers. Stages that must see every event
//! (`channel_activity`) are shared between workers, all others are cloned per worker.
//!
//! ## Configuration
//!
//! The CLI (`tpc_signal_cli`) reads a YAML configuration of the following form:
//!
//! ```yml
//! input_path: events.yaml
//! output_path: output.yaml
//! readout_path: readout.yaml
//! gas_path: gas.yaml
//! n_threads: 4
//! verbosity: info
//! write_events: true
//! stages:
//!   - kind: electron_diffusion
//!     seed: 0
//!   - kind: hits_to_signal
//!     sampling: 0.2
//!     output_level: observable
//!   - kind: trigger_analysis
//!     adc_length: 512
//!     thresholds: [100.0, 500.0]
//!     cuts:
//!       raw_integral: [0.0, 1.0e6]
//!   - kind: channel_activity
//! ```
//!
//! Parameters left out of a stage are resolved at the start of the run, from other
//! stages of the pipeline or from the gas description. A `new` template can be written
//! with `tpc_signal_cli new -p config.yaml`.
//!
//! ### Readout description
//!
//! The readout is described by module definitions (explicit pixels, pixel grids, or
//! strips) placed on readout planes:
//!
//! ```yml
//! module_definitions:
//!   - name: pads
//!     kind: pixel_grid
//!     nx: 64
//!     ny: 64
//!     pitch: 1.0
//! planes:
//!   - id: 0
//!     position: [0.0, 0.0, 0.0]
//!     normal: [0.0, 0.0, 1.0]
//!     cathode_position: [0.0, 0.0, 500.0]
//!     modules:
//!       - definition: pads
//!         id: 0
//!         origin: [-32.0, -32.0]
//!         rotation: 0.0
//! ```
//!
//! Acquisition channel ids are assigned consecutively over the modules unless a module
//! gives `first_daq_channel`, and may be remapped with a `decoding_file` CSV
//! (`daq,readout`).
//!
//! ### Gas description
//!
//! ```yml
//! name: Ar-iC4H10
//! pressure: 1.0
//! electric_field: 100.0
//! w_value: 26.2
//! longitudinal_diffusion: 0.025
//! transverse_diffusion: 0.022
//! drift_velocity:
//!   - { field: 50.0, velocity: 2.3 }
//!   - { field: 100.0, velocity: 3.9 }
//! ```
//!
//! Units are mm, µs, keV, V/cm, atm and cm^1/2 for diffusion coefficients.
pub mod channel_activity;
pub mod channel_address;
pub mod config;
pub mod constants;
pub mod decoding;
pub mod electron_diffusion;
pub mod error;
pub mod event;
pub mod event_process;
pub mod gas;
pub mod geometry;
pub mod histogram;
pub mod hits;
pub mod hits_to_signal;
pub mod observable;
pub mod pipeline;
pub mod process;
pub mod readout;
pub mod readout_description;
pub mod readout_module;
pub mod signal;
pub mod signal_to_hits;
pub mod smearing;
pub mod trigger_analysis;
pub mod worker_status;
