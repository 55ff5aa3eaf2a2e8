/// Project layer: the aggregate every lookup is resolved against.
///
/// ```text
///   Project
///     ├── incidents        name → Incident { source, stations }
///     ├── station_filters  name → StationFilter (selection only)
///     └── labels           name → ProcessingTrail
/// ```
///
/// Removing an incident or a label also invalidates the cache entries that
/// depend on it (`Project::remove_incident`, `Project::remove_label`).

pub mod filter;
pub mod model;
