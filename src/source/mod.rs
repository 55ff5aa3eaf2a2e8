//! Raw-data source: where unprocessed station recordings come from.
//!
//! ```text
//!   <root>/
//!     EQ100/
//!       S1.parquet | S1.json | S1.csv
//!       S2.parquet
//!     EQ101/
//!       ...
//! ```

pub mod loader;

use std::path::{Component, Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};
use crate::project::model::{Incident, StationMetadata};
use crate::series::model::{Orientation, Record, SeriesKind, TimeSeries};

use loader::{load_components, ComponentData, EXTENSIONS};

/// Supplies the raw three-component record of a station in an incident.
///
/// The resolver calls this only on a cache miss.
pub trait RawDataSource {
    fn load(&self, incident: &Incident, station: &StationMetadata) -> Result<Record>;
}

impl<T: RawDataSource + ?Sized> RawDataSource for &T {
    fn load(&self, incident: &Incident, station: &StationMetadata) -> Result<Record> {
        (**self).load(incident, station)
    }
}

/// Reads `root/<incident>/<station>.{parquet,json,csv}`.
#[derive(Debug, Clone)]
pub struct FileDataSource {
    root: PathBuf,
}

impl FileDataSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileDataSource { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The first existing file for the station, if any. Both ids must be
    /// plain file names; anything that could leave `root` is rejected.
    pub fn locate(&self, incident: &str, station: &str) -> Result<Option<PathBuf>> {
        check_file_name("incident", incident)?;
        check_file_name("station", station)?;
        let dir = self.root.join(incident);
        Ok(EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{station}.{ext}")))
            .find(|p| p.is_file()))
    }
}

impl RawDataSource for FileDataSource {
    fn load(&self, incident: &Incident, station: &StationMetadata) -> Result<Record> {
        let path = self
            .locate(&incident.name, &station.id)?
            .ok_or_else(|| Error::DataNotFound {
                incident: incident.name.clone(),
                station: station.id.clone(),
            })?;
        debug!("loading raw data from {}", path.display());
        let data = load_components(&path).map_err(|source| Error::Load {
            path: path.clone(),
            source,
        })?;
        raw_record(&incident.name, station, data)
    }
}

fn check_file_name(subject: &str, id: &str) -> Result<()> {
    let mut components = Path::new(id).components();
    let plain = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == id
    );
    if plain && !id.contains(['/', '\\']) {
        return Ok(());
    }
    Err(Error::InvalidMetadata {
        subject: format!("{subject} '{id}'"),
        reason: "not usable as a file name in the data directory".to_string(),
    })
}

/// Type raw samples as a `Raw` record oriented by the station metadata.
pub fn raw_record(incident: &str, station: &StationMetadata, data: ComponentData) -> Result<Record> {
    let ComponentData {
        delta_t,
        start_time,
        h1,
        h2,
        vertical,
    } = data;
    let series = |samples, orientation| {
        TimeSeries::new(samples, delta_t, start_time, SeriesKind::Raw, orientation)
    };
    Record::new(
        incident,
        station.id.as_str(),
        series(h1, Orientation::Horizontal { azimuth: station.h1_azimuth })?,
        series(h2, Orientation::Horizontal { azimuth: station.h2_azimuth })?,
        series(vertical, Orientation::Vertical)?,
    )
}
