//! ---
//! cosim_section: "15-testing-qa-runbook"
//! cosim_subsection: "integration-tests"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Configuration loading and I/O module construction from files."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use ot_cosim_common::config::AppConfig;
use ot_cosim_federate::DataType;
use ot_cosim_io::{IoModule, IoModuleError, UPDATES_ENDPOINT};

fn read(path: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let full = Path::new(manifest_dir).join("..").join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn sample_config_builds_every_module() -> anyhow::Result<()> {
    let config: AppConfig = read("configs/ot-cosim.toml").parse()?;
    assert!(config.broker.enabled);
    assert_eq!(config.federation.pacing, Duration::from_secs(1));
    assert_eq!(config.metrics.report_interval, Duration::from_secs(5));
    assert_eq!(config.io.len(), 1);

    let module = IoModule::from_config(&config.io[0])?;
    let federate = module.federate_config();
    assert_eq!(federate.name, "ot-sim-io");
    assert_eq!(
        federate.init_string(),
        "--federates=1 --broker=127.0.0.1 --loglevel=SUMMARY"
    );
    assert_eq!(federate.publications[0].data_type, DataType::Boolean);
    assert!(federate.publications[1].global);
    assert_eq!(federate.endpoints.len(), 1);
    assert_eq!(federate.endpoints[0].name, UPDATES_ENDPOINT);

    let router = module.router();
    assert_eq!(router.tag_for_key("plant/load_kw"), Some("load"));
    assert_eq!(router.tag_for_key("plant/bus_voltage"), Some("bus_voltage"));
    assert_eq!(router.key_for_tag("breaker"), Some("breaker_closed"));
    assert_eq!(
        router.tag_for_key("plant/generator_setpoint"),
        Some("generator_setpoint")
    );
    Ok(())
}

#[test]
fn config_file_is_loaded_from_candidates() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        r#"
[[io]]
name = "feeder"
end_time = 60

[[io.subscription]]
key = "grid/feeder_kw"
type = "double"
"#
    )?;

    let missing = file.path().with_extension("missing");
    let loaded = AppConfig::load_with_source(&[missing.as_path(), file.path()])?;
    assert_eq!(loaded.source, file.path());
    let io = loaded.config.io_module("feeder").expect("feeder module");
    assert_eq!(io.federate_name(), "feeder");
    assert_eq!(io.start_time, 1);
    assert_eq!(io.end_time, 60);
    assert_eq!(loaded.config.message_bus.pub_endpoint, "tcp://127.0.0.1:5678");
    Ok(())
}

#[test]
fn invalid_timing_and_duplicates_are_rejected() {
    let zero_step = r#"
[[io]]
name = "io"
step_time = 0
"#;
    assert!(zero_step.parse::<AppConfig>().is_err());

    let duplicated = r#"
[[io]]
name = "io"

[[io]]
name = "io"
"#;
    assert!(duplicated.parse::<AppConfig>().is_err());
}

#[test]
fn unknown_point_type_fails_module_startup() -> anyhow::Result<()> {
    let config: AppConfig = r#"
[[io]]
name = "io"

[[io.publication]]
key = "flux"
type = "quaternion"
"#
    .parse()?;
    assert!(matches!(
        IoModule::from_config(&config.io[0]),
        Err(IoModuleError::Config { .. })
    ));
    Ok(())
}

#[test]
fn release_profile_unwinds_so_handler_panics_stay_contained() -> anyhow::Result<()> {
    let manifest: toml::Value = read("Cargo.toml").parse()?;
    let panic = manifest
        .get("profile")
        .and_then(|profiles| profiles.get("release"))
        .and_then(|release| release.get("panic"))
        .and_then(toml::Value::as_str);
    assert_ne!(panic, Some("abort"));
    Ok(())
}
