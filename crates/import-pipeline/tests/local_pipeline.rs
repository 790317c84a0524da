//! End-to-end run wired from configuration: local source and staging,
//! in-memory locks and a mocked HTTP importer

use import_pipeline::config::{ImportDefinition, LockConfig, PipelineConfig, SourceConfig, StagingConfig};
use import_pipeline::coordinator::{ImportCoordinator, ImportOutcome};
use import_pipeline::importer::HttpImporterConfig;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn config(source_root: &std::path::Path, staging_root: &std::path::Path, importer_url: String) -> PipelineConfig {
    let mut config = PipelineConfig {
        source: SourceConfig::Local {
            root: source_root.to_path_buf(),
        },
        staging: StagingConfig::Local {
            root: staging_root.to_path_buf(),
        },
        lock: LockConfig::Memory,
        importer: HttpImporterConfig {
            base_url: importer_url,
            timeout_secs: 5,
        },
        ..PipelineConfig::default()
    };
    config.transfer.chunk_size = 16;
    config.imports.insert(
        "human".to_string(),
        ImportDefinition {
            source_path: "/exports/human.csv".to_string(),
            data_set_name: "infect-human".to_string(),
            domain: Some("infect.example".to_string()),
            tallied_fields: vec!["microorganism".to_string()],
            unit_suffixed_fields: vec![],
        },
    );
    config.report.secret = Some("s3cret".to_string());
    config
}

#[tokio::test]
async fn test_local_run_against_http_importer() {
    let source = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(source.path().join("exports")).unwrap();
    std::fs::write(
        source.path().join("exports/human.csv"),
        "microorganism,substance\ne. coli,amoxicillin\ns. aureus,penicillin\ne. coli,ceftriaxone\n",
    )
    .unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/imports"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "imp-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/imports/imp-1/samples"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "importedCount": 1,
            "validSamples": [{"originalValues": {"microorganism": "e. coli"}}],
            "invalidSamples": [{
                "failedValidationData": [
                    {"type": "unknown-value", "inputName": "substance", "inputValue": "x", "outputName": "substanceId"}
                ]
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/imports/imp-1/commit"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/imports/imp-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let config = config(source.path(), staging.path(), server.uri());
    config.validate().unwrap();
    let coordinator = ImportCoordinator::from_config(&config).unwrap();
    let settings = config.settings_for("human").unwrap();

    let outcome = coordinator.run(&settings).await.unwrap();
    let ImportOutcome::Imported { report, staged, .. } = &outcome else {
        panic!("expected an import");
    };

    let batches = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/imports/imp-1/samples")
        .count() as u64;
    assert!(batches >= 1);
    assert_eq!(report.imported, batches);
    assert_eq!(report.invalid, batches);
    assert_eq!(report.failures["unknown-value"]["substance"]["x"], batches);
    assert_eq!(report.tallies["microorganism"]["e. coli"], batches);
    assert!(report.links.is_some());
    assert!(staging.path().join(&staged.key).exists());

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["status"], "imported");
    assert_eq!(json["import_id"], "imp-1");

    // Same file version again: nothing to do
    let again = coordinator.run(&settings).await.unwrap();
    assert!(matches!(again, ImportOutcome::NoNewData { .. }));
}
