mod common;

use common::{sample_project, CountingSource, DELTA_T, SAMPLES};
use tempfile::TempDir;
use tsprocess::resolver::{FasOptions, ResponseOptions};
use tsprocess::{
    key_for, CacheStore, Component, Error, FileDataSource, ProcessingStep, ProcessingTrail,
    Project, RecordResolver, SeriesKind,
};

fn open_store(dir: &TempDir) -> CacheStore {
    CacheStore::open(dir.path().join("cache"), 64).unwrap()
}

#[test]
fn second_request_is_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let source = CountingSource::new();
    let resolver = RecordResolver::new(&store, &source);
    let project = sample_project();

    let first = resolver.resolve(&project, "EQ100", "S1", &["lp"]).unwrap();
    let second = resolver.resolve(&project, "EQ100", "S1", &["lp"]).unwrap();

    assert_eq!(source.calls(), 1);
    assert_eq!(first, second);
    let stats = resolver.stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[test]
fn cache_survives_reopening_the_store() {
    let dir = TempDir::new().unwrap();
    let project = sample_project();
    let first = {
        let store = open_store(&dir);
        let source = CountingSource::new();
        RecordResolver::new(&store, &source)
            .resolve(&project, "EQ100", "S1", &["lp"])
            .unwrap()
    };

    let store = open_store(&dir);
    let source = CountingSource::new();
    let again = RecordResolver::new(&store, &source)
        .resolve(&project, "EQ100", "S1", &["lp"])
        .unwrap();
    assert_eq!(source.calls(), 0);
    assert_eq!(first, again);
}

#[test]
fn lowpass_on_s1_of_eq100() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let source = CountingSource::new();
    let resolver = RecordResolver::new(&store, &source);
    let project = sample_project();

    let entry = resolver.resolve_entry(&project, "EQ100", "S1", &["lp"]).unwrap();
    let trail = ProcessingTrail::new(vec![ProcessingStep::lowpass(10.0, 4)]);

    assert_eq!(entry.key, key_for("S1", "EQ100", &trail));
    assert_eq!(entry.trail, trail.canonical());
    assert_eq!(entry.labels, vec!["lp".to_string()]);
    assert_eq!(entry.record.kind(), SeriesKind::Raw);
    assert_eq!(entry.record.h1.len(), SAMPLES);
    assert_eq!(entry.record.vertical.trail(), &trail.canonical());
    assert!(store.has(&["EQ100", "S1", entry.key.as_str(), "record"]));
    assert_eq!(
        store.children(&["EQ100", "S1"]).unwrap(),
        vec![entry.key.to_string()]
    );

    // The 17 Hz component is removed, so the filtered peak is lower.
    assert!(entry.record.h1.peak_abs() < 1.3);
    let distance = entry.metadata["epicentral_distance_km"].as_f64().unwrap();
    assert!((distance - 11.12).abs() < 0.05, "{distance}");
}

#[test]
fn unknown_label_fails_before_any_work() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let source = CountingSource::new();
    let resolver = RecordResolver::new(&store, &source);
    let project = sample_project();

    let err = resolver
        .resolve(&project, "EQ100", "S1", &["lp", "doesnotexist"])
        .unwrap_err();
    assert!(matches!(err, Error::UnknownProcessingLabel { ref label } if label == "doesnotexist"));

    assert!(matches!(
        resolver.resolve(&project, "EQ999", "S1", &["lp"]),
        Err(Error::UnknownIncident { .. })
    ));
    assert!(matches!(
        resolver.resolve(&project, "EQ100", "S9", &["lp"]),
        Err(Error::UnknownStation { .. })
    ));

    assert_eq!(source.calls(), 0);
    assert!(store.children(&[]).unwrap().is_empty());
}

#[test]
fn failing_pipeline_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let source = CountingSource::new();
    let resolver = RecordResolver::new(&store, &source);
    let mut project = sample_project();
    project
        .add_label("too_high", ProcessingTrail::new(vec![ProcessingStep::lowpass(80.0, 4)]))
        .unwrap();

    let err = resolver.resolve(&project, "EQ100", "S1", &["too_high"]).unwrap_err();
    assert!(matches!(err, Error::InvalidFilterParameters { .. }));
    assert_eq!(source.calls(), 1);
    assert!(store.children(&[]).unwrap().is_empty());

    let err = resolver.resolve(&project, "EQ100", "S1", &["acc"]).unwrap_err();
    assert!(matches!(err, Error::UnsupportedDerivation { kind: SeriesKind::Raw, .. }));
    assert!(store.children(&[]).unwrap().is_empty());
}

#[test]
fn label_order_changes_key_and_result() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let source = CountingSource::new();
    let resolver = RecordResolver::new(&store, &source);
    let project = sample_project();

    let a = resolver.resolve_entry(&project, "EQ100", "S1", &["cut", "lp"]).unwrap();
    let b = resolver.resolve_entry(&project, "EQ100", "S1", &["lp", "cut"]).unwrap();

    assert_ne!(a.key, b.key);
    assert_eq!(a.record.h1.len(), b.record.h1.len());
    let max_diff = a
        .record
        .h1
        .samples()
        .iter()
        .zip(b.record.h1.samples())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max);
    assert!(max_diff > 1e-6, "{max_diff}");
    assert_eq!(store.children(&["EQ100", "S1"]).unwrap().len(), 2);
}

#[test]
fn integrate_then_differentiate_recovers_the_input() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let source = CountingSource::new();
    let resolver = RecordResolver::new(&store, &source);
    let project = sample_project();

    let raw = resolver.resolve(&project, "EQ100", "S1", &[]).unwrap();
    let vel = resolver.resolve(&project, "EQ100", "S1", &["vel"]).unwrap();
    let back = resolver.resolve(&project, "EQ100", "S1", &["vel", "acc"]).unwrap();

    assert_eq!(raw.kind(), SeriesKind::Raw);
    assert_eq!(vel.kind(), SeriesKind::Velocity);
    assert_eq!(back.kind(), SeriesKind::Acceleration);
    for (x, y) in raw.h2.samples().iter().zip(back.h2.samples()) {
        assert!((x - y).abs() < 1e-9, "{x} vs {y}");
    }
}

#[test]
fn changed_metadata_makes_entries_stale() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let source = CountingSource::new();
    let resolver = RecordResolver::new(&store, &source);
    let mut project = sample_project();

    resolver.resolve(&project, "EQ100", "S1", &["lp"]).unwrap();
    project
        .incidents
        .get_mut("EQ100")
        .unwrap()
        .stations
        .get_mut("S1")
        .unwrap()
        .latitude += 0.01;

    let err = resolver.resolve(&project, "EQ100", "S1", &["lp"]).unwrap_err();
    assert!(matches!(err, Error::StaleCacheEntry { ref station, .. } if station == "S1"));
    assert_eq!(source.calls(), 1);
}

#[test]
fn spectra_are_memoized_under_the_record() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let source = CountingSource::new();
    let resolver = RecordResolver::new(&store, &source);
    let project = sample_project();
    let options = FasOptions::default();

    let a = resolver
        .resolve_fas(&project, "EQ100", "S1", &["lp"], Component::H1, &options)
        .unwrap();
    let b = resolver
        .resolve_fas(&project, "EQ100", "S1", &["lp"], Component::H1, &options)
        .unwrap();
    assert_eq!(a, b);
    assert!(!a.frequencies.is_empty());
    assert_eq!(source.calls(), 1);

    let stats = resolver.stats();
    assert_eq!((stats.spectral_hits, stats.spectral_misses), (1, 1));

    let key = resolver.resolve_entry(&project, "EQ100", "S1", &["lp"]).unwrap().key;
    assert_eq!(
        store.children(&["EQ100", "S1", key.as_str(), "spectra"]).unwrap().len(),
        1
    );

    // Response spectra need acceleration.
    let err = resolver
        .resolve_response_spectrum(&project, "EQ100", "S1", &["lp"], Component::H1, &ResponseOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedDerivation { .. }));

    let rsp = resolver
        .resolve_response_spectrum(
            &project,
            "EQ100",
            "S1",
            &["vel", "acc"],
            Component::Vertical,
            &ResponseOptions::default(),
        )
        .unwrap();
    assert_eq!(rsp.periods.len(), rsp.accelerations.len());
    assert_eq!(rsp.damping, 0.05);
    assert!(rsp.accelerations.iter().all(|a| a.is_finite() && *a >= 0.0));
}

#[test]
fn removing_an_incident_clears_its_cache() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let source = CountingSource::new();
    let resolver = RecordResolver::new(&store, &source);
    let mut project = sample_project();

    resolver.resolve(&project, "EQ100", "S1", &["lp"]).unwrap();
    resolver.resolve(&project, "EQ100", "S2", &["lp"]).unwrap();
    resolver.resolve(&project, "EQ101", "S1", &["lp"]).unwrap();

    project.remove_incident("EQ100", &store).unwrap();

    assert_eq!(store.children(&[]).unwrap(), vec!["EQ101".to_string()]);
    assert!(matches!(
        resolver.resolve(&project, "EQ100", "S1", &["lp"]),
        Err(Error::UnknownIncident { .. })
    ));
    // EQ101 is still cached.
    resolver.resolve(&project, "EQ101", "S1", &["lp"]).unwrap();
    assert_eq!(source.calls(), 3);
}

#[test]
fn removing_a_label_sweeps_entries_built_with_it() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let source = CountingSource::new();
    let resolver = RecordResolver::new(&store, &source);
    let mut project = sample_project();

    resolver.resolve(&project, "EQ100", "S1", &["lp"]).unwrap();
    resolver.resolve(&project, "EQ100", "S1", &["vel", "lp"]).unwrap();
    resolver.resolve(&project, "EQ100", "S1", &["vel"]).unwrap();
    resolver.resolve(&project, "EQ101", "S2", &["lp"]).unwrap();

    let (trail, swept) = project.remove_label("lp", &store).unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(swept, 3);
    assert_eq!(store.children(&["EQ100", "S1"]).unwrap().len(), 1);
    assert!(store.children(&["EQ101", "S2"]).unwrap().is_empty());

    assert!(matches!(
        resolver.resolve(&project, "EQ100", "S1", &["lp"]),
        Err(Error::UnknownProcessingLabel { .. })
    ));
    // Removing a station filter never touches the cache.
    project
        .add_station_filter("all", tsprocess::StationFilter::default())
        .unwrap();
    project.remove_station_filter("all").unwrap();
    assert_eq!(store.children(&["EQ100", "S1"]).unwrap().len(), 1);
}

#[test]
fn resolves_from_files_on_disk() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir_all(data.join("EQ100")).unwrap();
    let n = 500;
    let values: Vec<String> = (0..n).map(|i| format!("{}", (i as f64 * 0.05).sin())).collect();
    let json = format!(
        r#"{{"delta_t":{DELTA_T},"start_time":0.0,"h1":[{v}],"h2":[{v}],"vertical":[{v}]}}"#,
        v = values.join(",")
    );
    std::fs::write(data.join("EQ100").join("S1.json"), json).unwrap();

    let store = open_store(&dir);
    let resolver = RecordResolver::new(&store, FileDataSource::new(&data));
    let project = sample_project();

    let record = resolver.resolve(&project, "EQ100", "S1", &["lp"]).unwrap();
    assert_eq!(record.h1.len(), n);
    assert_eq!(record.h2.orientation().azimuth(), Some(90.0));

    assert!(matches!(
        resolver.resolve(&project, "EQ100", "S2", &["lp"]),
        Err(Error::DataNotFound { .. })
    ));
}

#[test]
fn project_round_trips_through_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("project.json");
    let project = sample_project();
    project.save(&path).unwrap();
    let loaded = Project::load(&path).unwrap();
    assert_eq!(loaded, project);
    assert_eq!(
        key_for("S1", "EQ100", loaded.label("lp").unwrap()),
        key_for("S1", "EQ100", project.label("lp").unwrap())
    );
}

#[test]
fn non_finite_data_is_never_cached() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir_all(data.join("EQ100")).unwrap();
    std::fs::write(
        data.join("EQ100").join("S1.csv"),
        "delta_t,start_time,h1,h2,vertical\n0.01,0.0,1,2,3\n,,NaN,5,6\n,,7,8,9\n",
    )
    .unwrap();

    let store = open_store(&dir);
    let resolver = RecordResolver::new(&store, FileDataSource::new(&data));
    let project = sample_project();

    for _ in 0..2 {
        assert!(matches!(
            resolver.resolve(&project, "EQ100", "S1", &[]),
            Err(Error::Load { .. })
        ));
    }
    assert!(store.children(&[]).unwrap().is_empty());
}

#[test]
fn overflowing_pipeline_is_rejected_without_a_write() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let source = CountingSource::new();
    let resolver = RecordResolver::new(&store, &source);
    let mut project = sample_project();
    project
        .add_label(
            "blow_up",
            ProcessingTrail::new(vec![ProcessingStep::scale(1e300), ProcessingStep::scale(1e300)]),
        )
        .unwrap();

    for _ in 0..2 {
        let err = resolver.resolve(&project, "EQ100", "S1", &["blow_up"]).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidFilterParameters { ref operation, .. } if operation == "scale"
        ));
    }
    assert_eq!(source.calls(), 2);
    assert!(store.children(&[]).unwrap().is_empty());
}

#[test]
fn oversized_zero_pad_is_an_invalid_parameter() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let source = CountingSource::new();
    let resolver = RecordResolver::new(&store, &source);
    let mut project = sample_project();
    project
        .add_label(
            "pad_forever",
            ProcessingTrail::new(vec![ProcessingStep::new("zero_pad")
                .with("flag", "end")
                .with("seconds", 1e300)]),
        )
        .unwrap();

    let err = resolver.resolve(&project, "EQ100", "S1", &["pad_forever"]).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidFilterParameters { ref operation, .. } if operation == "zero_pad"
    ));
    assert!(store.children(&[]).unwrap().is_empty());
}

#[test]
fn parameters_equal_after_rounding_compute_the_same_record() {
    let reference = {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let source = CountingSource::new();
        RecordResolver::new(&store, &source)
            .resolve_entry(&sample_project(), "EQ100", "S1", &["lp"])
            .unwrap()
    };

    for fc in [10.0000001, 10.0000004] {
        let mut project = sample_project();
        // Written straight into the map, bypassing `add_label`.
        project.labels.insert(
            "near_lp".to_string(),
            ProcessingTrail::new(vec![ProcessingStep::lowpass(fc, 4)]),
        );
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let source = CountingSource::new();
        let entry = RecordResolver::new(&store, &source)
            .resolve_entry(&project, "EQ100", "S1", &["near_lp"])
            .unwrap();

        assert_eq!(entry.key, reference.key);
        assert_eq!(entry.trail, reference.trail);
        assert_eq!(entry.record, reference.record);
    }
}

#[test]
fn loading_a_project_canonicalizes_its_labels() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("project.json");
    let mut project = sample_project();
    project.labels.insert(
        "near_lp".to_string(),
        ProcessingTrail::new(vec![ProcessingStep::lowpass(10.0000004, 4)]),
    );
    project.save(&path).unwrap();

    let loaded = Project::load(&path).unwrap();
    assert_eq!(loaded.label("near_lp").unwrap(), loaded.label("lp").unwrap());
    assert_eq!(
        loaded.label("near_lp").unwrap(),
        &ProcessingTrail::new(vec![ProcessingStep::lowpass(10.0, 4)]).canonical()
    );
}
