/// Series layer: typed time series and the numeric operations over them.
///
/// Architecture:
/// ```text
///   Record (h1, h2, vertical)
///        │
///        ▼
///   ┌────────────┐
///   │   model     │  TimeSeries + SeriesKind rules (integrate / differentiate)
///   └────────────┘
///        │
///        ├──► filter    Butterworth low/high/bandpass (zero phase)
///        ├──► window    taper, cut, zero pad
///        ├──► rotate    horizontal pair → target azimuth
///        └──► spectral  FAS, response spectra (auxiliary data)
/// ```

pub mod filter;
pub mod model;
pub mod rotate;
pub mod spectral;
pub mod window;
