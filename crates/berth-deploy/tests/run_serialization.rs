//! Run serialization tests against a fixed canonical JSON snapshot.
//!
//! The snapshot pins the persisted format: a new format must keep reading
//! this document, so keep it up to date when fields change.

use chrono::{DateTime, Utc};

use berth_core::ApplicationId;
use berth_deploy::job_type::JobType;
use berth_deploy::run::{Run, RunId, RunStatus};
use berth_deploy::step::{Step, StepStatus};
use berth_deploy::versions::{ApplicationVersion, SourceRevision, Versions};

const RUN_FILE: &str = include_str!("testdata/run-status.json");

const PEM: &str = "-----BEGIN CERTIFICATE-----\n\
MIIBEzCBu6ADAgECAgEBMAoGCCqGSM49BAMEMBQxEjAQBgNVBAMTCW15c2Vydmlj\n\
ZTAeFw0xOTA5MDYwNzM3MDZaFw0xOTA5MDcwNzM3MDZaMBQxEjAQBgNVBAMTCW15\n\
c2VydmljZTBZMBMGByqGSM49AgEGCCqGSM49AwEHA0IABM0JhD8fV2DlAkjQOGX3\n\
Y50ryMBr3g2+v/uFiRoxJ1muuSOWYrW7HCQIGuzc04fa0QwtaX/voAZKCV51t6jF\n\
0fwwCgYIKoZIzj0EAwQDRwAwRAIgVbQ3Co1H4X0gmRrtXSyTU0HgBQu9PXHMmX20\n\
5MyyPSoCIBltOcmaPfdN03L3zqbqZ6PgUBWsvAHgiBzL3hrtJ+iy\n\
-----END CERTIFICATE-----";

fn snapshot_id() -> RunId {
    RunId::new(
        ApplicationId::new("tenant", "application", "default").unwrap(),
        JobType::ProductionUsEast3,
        112_358,
    )
}

fn snapshot_statuses() -> Vec<(Step, StepStatus)> {
    vec![
        (Step::DeployTester, StepStatus::Succeeded),
        (Step::InstallTester, StepStatus::Unfinished),
        (Step::DeployInitialReal, StepStatus::Unfinished),
        (Step::InstallInitialReal, StepStatus::Failed),
        (Step::DeployReal, StepStatus::Succeeded),
        (Step::InstallReal, StepStatus::Unfinished),
        (Step::StartTests, StepStatus::Succeeded),
        (Step::EndTests, StepStatus::Unfinished),
        (Step::CopyNodeLogs, StepStatus::Succeeded),
        (Step::DeactivateReal, StepStatus::Failed),
        (Step::DeactivateTester, StepStatus::Failed),
        (Step::Report, StepStatus::Failed),
    ]
}

#[test]
fn canonical_snapshot_reads_back() {
    let run: Run = serde_json::from_str(RUN_FILE).unwrap();

    for step in Step::ALL {
        assert!(run.steps().contains_key(&step), "{step} missing");
    }

    assert_eq!(run.id(), &snapshot_id());
    assert_eq!(
        run.start(),
        "2007-12-03T10:15:30Z".parse::<DateTime<Utc>>().unwrap()
    );
    assert!(!run.has_ended());
    assert_eq!(run.status(), RunStatus::Running);
    assert_eq!(run.last_test_log_entry(), 3);

    assert_eq!(run.versions().target_platform(), &"1.2.3".parse().unwrap());
    assert_eq!(
        run.versions().target_application(),
        &ApplicationVersion::from_full(
            SourceRevision::new("git@github.com:user/repo.git", "master", "f00bad"),
            123,
            "a@b",
            Some("6.3.1".parse().unwrap()),
            Some(DateTime::from_timestamp_millis(100).unwrap()),
        )
    );
    assert_eq!(
        run.versions().source_platform(),
        Some(&"1.2.2".parse().unwrap())
    );
    assert_eq!(
        run.versions().source_application(),
        Some(&ApplicationVersion::from(
            SourceRevision::new("git@github.com:user/repo.git", "master", "badb17"),
            122,
        ))
    );

    assert_eq!(run.tester_certificate(), Some(PEM));

    for (step, status) in snapshot_statuses() {
        assert_eq!(run.step_status(step), Some(status), "wrong status for {step}");
    }
}

#[test]
fn mutated_snapshot_round_trips() {
    let run: Run = serde_json::from_str(RUN_FILE).unwrap();

    let run = run.aborted().finished(Utc::now());
    assert_eq!(run.status(), RunStatus::Aborted);
    assert!(run.has_ended());

    let phoenix: Run = serde_json::from_str(&serde_json::to_string(&run).unwrap()).unwrap();
    assert_eq!(phoenix.id(), run.id());
    assert_eq!(phoenix.start(), run.start());
    assert_eq!(phoenix.end(), run.end());
    assert_eq!(phoenix.status(), run.status());
    assert_eq!(phoenix.last_test_log_entry(), run.last_test_log_entry());
    assert_eq!(phoenix.tester_certificate(), run.tester_certificate());
    assert_eq!(phoenix.versions(), run.versions());
    assert_eq!(phoenix.steps(), run.steps());
    assert_eq!(phoenix, run);
}

#[test]
fn initial_run_round_trips() {
    let initial = Run::initial(
        snapshot_id(),
        Versions::new(
            "1.2.3".parse().unwrap(),
            ApplicationVersion::from(
                SourceRevision::new("git@github.com:user/repo.git", "master", "f00bad"),
                123,
            ),
            None,
            None,
        ),
        Utc::now(),
    );
    let back: Run = serde_json::from_str(&serde_json::to_string(&initial).unwrap()).unwrap();
    assert_eq!(back, initial);
}
