use anyhow::Result;
use std::path::Path;
use subrake::config::AppConfig;
use subrake::sources::Aggregator;

#[test]
fn missing_file_means_free_sources_only() -> Result<()> {
    let cfg = AppConfig::load(Path::new("/definitely/not/here/config.json"))?;
    let aggregator = Aggregator::from_config(&cfg)?;
    assert_eq!(
        aggregator.source_names(),
        vec!["crtsh", "rapiddns", "hackertarget"]
    );
    Ok(())
}

#[test]
fn malformed_file_is_fatal() -> Result<()> {
    let path = std::env::temp_dir().join(format!(
        "subrake-config-{}-broken.json",
        std::process::id()
    ));
    std::fs::write(&path, "{not json")?;
    assert!(AppConfig::load(&path).is_err());
    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[test]
fn fofa_block_enables_a_fourth_source() -> Result<()> {
    let cfg: AppConfig = serde_json::from_str(
        r#"{"fofa": {"enabled": true, "email": "a@b.example", "key": "secret"}}"#,
    )?;
    let aggregator = Aggregator::from_config(&cfg)?;
    let names = aggregator.source_names();
    assert!(names.contains(&"fofa"));
    assert_eq!(names.len(), 4);
    Ok(())
}

#[test]
fn keyed_source_without_credentials_is_skipped() -> Result<()> {
    let cfg: AppConfig =
        serde_json::from_str(r#"{"binaryedge": {"enabled": true, "api_key": ""}}"#)?;
    let aggregator = Aggregator::from_config(&cfg)?;
    assert!(!aggregator.source_names().contains(&"binaryedge"));
    Ok(())
}

#[test]
fn disabled_block_is_skipped_even_with_credentials() -> Result<()> {
    let cfg: AppConfig =
        serde_json::from_str(r#"{"virustotal": {"enabled": false, "api_key": "k"}}"#)?;
    let aggregator = Aggregator::from_config(&cfg)?;
    assert!(!aggregator.source_names().contains(&"virustotal"));
    Ok(())
}

#[test]
fn env_key_enables_virustotal_without_a_config_block() -> Result<()> {
    let mut cfg = AppConfig::default();
    cfg.apply_env(|key| (key == "VIRUSTOTAL_API_KEY").then(|| "xyz".to_string()));
    let aggregator = Aggregator::from_config(&cfg)?;
    assert!(aggregator.source_names().contains(&"virustotal"));
    assert!(!aggregator.source_names().contains(&"binaryedge"));
    Ok(())
}

#[test]
fn env_fills_an_empty_key_but_respects_disabled_blocks() -> Result<()> {
    let mut cfg: AppConfig =
        serde_json::from_str(r#"{"virustotal": {"enabled": false, "api_key": ""}}"#)?;
    cfg.apply_env(|_| Some("xyz".to_string()));
    let aggregator = Aggregator::from_config(&cfg)?;
    // the operator said no; the environment does not override that
    assert!(!aggregator.source_names().contains(&"virustotal"));
    Ok(())
}

#[test]
fn certspotter_runs_without_a_key() -> Result<()> {
    let cfg: AppConfig = serde_json::from_str(r#"{"certspotter": {"enabled": true}}"#)?;
    let aggregator = Aggregator::from_config(&cfg)?;
    assert!(aggregator.source_names().contains(&"certspotter"));
    Ok(())
}

#[test]
fn fofa_defaults_fill_in() -> Result<()> {
    let cfg: AppConfig = serde_json::from_str(
        r#"{"fofa": {"enabled": true, "email": "a@b.example", "key": "secret"}}"#,
    )?;
    let fofa = cfg.fofa.expect("fofa block parsed");
    assert_eq!(fofa.size, 1000);
    assert!(fofa.syntax.is_none());
    Ok(())
}
