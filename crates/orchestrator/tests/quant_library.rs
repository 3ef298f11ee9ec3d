#![forbid(unsafe_code)]

mod support;
use support::*;

use pq_core::JobId;
use pq_core::model::{
    JobParameters, JobParamsWithPointCount, JobPhase, JobStatus, JobSummary, QuantMode,
};
use pq_orchestrator::ErrorKind;
use pq_orchestrator::status::DatasetJobMap;
use pq_storage::{ObjectStoreExt, paths};

fn import(h: &Harness, owner: &str, name: &str) -> JobId {
    let csv = quant_csv(&[
        "11,1011,1.1,2.1,Normal_A",
        "10,1010,1.0,2.0,Normal_A",
        "10,1010,1.2,2.2,Normal_B",
    ]);
    h.service
        .import_csv(&user(owner), DATASET, name, "from the lab", &csv)
        .expect("import")
}

fn in_flight(owner: &str, name: &str, job_id: &str, phase: JobPhase) -> JobSummary {
    JobSummary {
        shared: false,
        params: JobParamsWithPointCount {
            pmcs_count: 3,
            params: JobParameters {
                name: name.to_string(),
                dataset_id: DATASET.to_string(),
                dataset_path: String::new(),
                detector_config: "PIXL/v5".to_string(),
                elements: vec!["Fe".to_string()],
                parameters: String::new(),
                run_time_sec: 60,
                cores_per_node: 6,
                start_unix_time: START + 50,
                creator: user(owner),
                roi_ids: Vec::new(),
                element_set_id: String::new(),
                piquant_version: ENGINE_VERSION.to_string(),
                quant_mode: QuantMode::CombinedDetector,
                comments: String::new(),
                include_dwells: false,
                command: Default::default(),
            },
        },
        elements: Vec::new(),
        status: JobStatus {
            status: phase,
            ..JobStatus::starting(JobId::try_new(job_id).expect("id"), "quants")
        },
    }
}

#[test]
fn imported_csv_becomes_a_complete_quant() {
    let h = Harness::new();
    let job_id = import(&h, "u1", "Lab import");
    assert_eq!(job_id.as_str(), "upload_t1");

    let summary = h
        .service
        .get_summary("u1", DATASET, "upload_t1")
        .expect("summary");
    assert_eq!(summary.status.status, JobPhase::Complete);
    assert_eq!(summary.status.end_unix_time, START);
    assert_eq!(summary.name(), "Lab import");
    assert_eq!(summary.params.params.piquant_version, "N/A");
    assert_eq!(summary.params.params.quant_mode, QuantMode::SeparateDetector);
    assert_eq!(summary.params.params.comments, "from the lab");
    assert_eq!(summary.params.pmcs_count, 2);
    assert_eq!(summary.elements, vec!["CaO", "FeO-T"]);

    let quant = h
        .service
        .read_quant("u1", DATASET, "upload_t1")
        .expect("binary");
    let a = quant.detector_set("A").expect("A set");
    let pmcs: Vec<i32> = a.location.iter().map(|loc| loc.pmc).collect();
    assert_eq!(pmcs, vec![10, 11]);
    assert_eq!(quant.detector_set("B").expect("B set").location.len(), 1);

    let err = h
        .service
        .import_csv(&user("u1"), DATASET, "Lab import", "", &quant_csv(&["1,1,1.0,1.0,Normal_A"]))
        .expect_err("name reused");
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn import_rejects_malformed_csv() {
    let h = Harness::new();
    let err = h
        .service
        .import_csv(&user("u1"), DATASET, "Bad", "", "title\nSCLK,CaO_%\n1,2.0\n")
        .expect_err("no PMC column");
    assert_eq!(err.kind(), ErrorKind::FormatFailure);
    assert!(h.store.keys(h.users()).iter().all(|k| !k.contains("upload_")));
}

#[test]
fn names_are_taken_by_summaries_and_unfinished_jobs() {
    let h = Harness::new();
    import(&h, "u1", "Stored name");

    let mut map = DatasetJobMap::new();
    map.insert(
        "run1".to_string(),
        in_flight("u1", "Running name", "run1", JobPhase::WorkersRunning),
    );
    map.insert(
        "done1".to_string(),
        in_flight("u1", "Finished name", "done1", JobPhase::Complete),
    );
    map.insert(
        "other".to_string(),
        in_flight("u2", "Their name", "other", JobPhase::Starting),
    );
    h.store
        .put_json(h.jobs(), &paths::job_status_map(DATASET), &map)
        .expect("seed map");

    let taken = |name: &str| h.service.is_name_taken("u1", DATASET, name).expect("name check");
    assert!(taken("Stored name"));
    assert!(taken("Running name"));
    assert!(!taken("Finished name"));
    assert!(!taken("Their name"));
    assert!(!taken("Fresh name"));
}

#[test]
fn listing_merges_own_shared_and_unfinished_jobs() {
    let h = Harness::new();
    import(&h, "u1", "First");
    h.clock.advance(10);
    import(&h, "u2", "Theirs");
    h.service.share("u2", DATASET, "upload_t2").expect("share");

    let mut map = DatasetJobMap::new();
    map.insert(
        "run1".to_string(),
        in_flight("u1", "Running", "run1", JobPhase::Aggregating),
    );
    map.insert(
        "run2".to_string(),
        in_flight("u2", "Not mine", "run2", JobPhase::Aggregating),
    );
    h.store
        .put_json(h.jobs(), &paths::job_status_map(DATASET), &map)
        .expect("seed map");

    let listed = h.service.list_jobs("u1", DATASET).expect("list");
    let ids: Vec<&str> = listed.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["run1", "shared-upload_t2", "upload_t1"]);
    assert!(listed[1].summary.shared);
    assert!(!listed[2].summary.shared);
}

#[test]
fn sharing_twice_leaves_one_shared_copy() {
    let h = Harness::new();
    import(&h, "u1", "Shared");
    h.service.share("u1", DATASET, "upload_t1").expect("share");
    h.service.share("u1", DATASET, "upload_t1").expect("share again");

    let shared_keys: Vec<String> = h
        .store
        .keys(h.users())
        .into_iter()
        .filter(|k| k.starts_with("quants/shared/"))
        .collect();
    assert_eq!(
        shared_keys,
        vec![
            "quants/shared/ds1/summary-upload_t1.json",
            "quants/shared/ds1/upload_t1.bin",
            "quants/shared/ds1/upload_t1.csv",
        ]
    );
    let summary = h
        .service
        .get_summary("anyone", DATASET, "shared-upload_t1")
        .expect("shared summary");
    assert!(summary.shared);
    let stored: JobSummary = h
        .store
        .get_json(h.users(), "quants/shared/ds1/summary-upload_t1.json")
        .expect("stored shared summary");
    assert!(stored.shared);
    let own: JobSummary = h
        .store
        .get_json(h.users(), "quants/u1/ds1/summary-upload_t1.json")
        .expect("owner summary");
    assert!(!own.shared);

    let err = h
        .service
        .share("u1", DATASET, "shared-upload_t1")
        .expect_err("already shared id");
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = h
        .service
        .share("u1", DATASET, "missing")
        .expect_err("no such quant");
    assert_eq!(err.kind(), ErrorKind::DependencyMissing);
}

#[test]
fn blessing_shares_first_and_versions_increase() {
    let h = Harness::new();
    import(&h, "u1", "Reference");
    import(&h, "u1", "Better reference");

    let first = h
        .service
        .bless(&user("u1"), DATASET, "upload_t1")
        .expect("bless");
    assert_eq!(first.version, 1);
    assert_eq!(first.job_id, "upload_t1");
    assert!(
        h.store
            .exists(h.users(), "quants/shared/ds1/summary-upload_t1.json")
            .expect("exists")
    );

    h.clock.advance(30);
    h.service
        .share("u1", DATASET, "upload_t2")
        .expect("share");
    let second = h
        .service
        .bless(&user("u1"), DATASET, "shared-upload_t2")
        .expect("bless shared");
    assert_eq!(second.version, 2);
    assert_eq!(second.blessed_at, START + 30);
    assert_eq!(second.user_name, "User u1");

    let view = h.service.blessed(DATASET).expect("blessed");
    assert_eq!(view.history.len(), 2);
    assert_eq!(view.bless_item, Some(second));
    assert!(view.issues.is_empty());

    let err = h
        .service
        .bless(&user("u1"), DATASET, "shared-nothing")
        .expect_err("not shared");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn publishing_requires_a_shared_quant() {
    let h = Harness::new();
    import(&h, "u1", "To publish");

    let err = h
        .service
        .publish(&user("u1"), DATASET, "upload_t1")
        .expect_err("not shared yet");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    h.service.share("u1", DATASET, "upload_t1").expect("share");
    let first = h
        .service
        .publish(&user("u1"), DATASET, "shared-upload_t1")
        .expect("publish");
    let second = h
        .service
        .publish(&user("u1"), DATASET, "upload_t1")
        .expect("publish again");
    assert_eq!((first.version, second.version), (1, 2));
    assert_eq!(second.publisher, "u1");
}

#[test]
fn deleting_removes_every_artifact_and_guards_shared_copies() {
    let h = Harness::with_workers(1);
    h.service
        .create_job(map_request("Disposable"), user("u1"))
        .expect("create")
        .wait()
        .expect("driver");
    h.service.share("u1", DATASET, "t1").expect("share");

    let err = h
        .service
        .delete_job("u2", DATASET, "shared-t1")
        .expect_err("not the creator");
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(err.http_status(), 403);

    h.service
        .delete_job("u1", DATASET, "shared-t1")
        .expect("creator deletes shared copy");
    h.service
        .delete_job("u1", DATASET, "t1")
        .expect("delete own");

    let left: Vec<String> = h
        .store
        .keys(h.users())
        .into_iter()
        .filter(|k| k.starts_with("quants/"))
        .collect();
    assert!(left.is_empty(), "{left:?}");

    let err = h
        .service
        .delete_job("u1", DATASET, "t1")
        .expect_err("already gone");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
