use engine_core::{Engine, EngineConfig, EngineError};
use std::io::Write;

#[test]
fn load_reads_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{ "sample_rate": 44100, "block_size": 128, "thread_name": "render" }}"#
    )
    .unwrap();
    let config = EngineConfig::load(file.path()).unwrap();
    assert_eq!(config.sample_rate, 44_100);
    assert_eq!(config.block_size, 128);
    assert_eq!(config.thread_name, "render");
    assert_eq!(config.transaction_queue_capacity, 1024);
}

#[test]
fn load_reports_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("engine.json");
    let err = EngineConfig::load(&missing).unwrap_err();
    assert!(format!("{err:#}").contains("engine.json"));
}

#[test]
fn engine_refuses_invalid_config() {
    let config = EngineConfig::default().with_thread_name("");
    assert!(matches!(
        Engine::new(config),
        Err(EngineError::InvalidConfig(_))
    ));
    assert!(matches!(
        EngineConfig::from_json_str("{ \"block_size\": \"big\" }"),
        Err(EngineError::Json(_))
    ));
}
