use serde_yaml::Value;
use ytmconfig::Config;

#[test]
fn test_defaults_without_config_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = Config::load_config(temp_dir.path().to_str().unwrap()).unwrap();

    assert_eq!(config.get_bind_address(), "127.0.0.1");
    assert_eq!(config.get_http_port(), 8080);
    assert_eq!(config.get_expiry_hours(), 5);
    assert_eq!(config.get_max_concurrent_streams(), 10);
    assert_eq!(config.get_max_retries(), 3);
    assert_eq!(config.get_base_retry_delay_secs(), 1);
    assert_eq!(config.get_upstream_timeout_secs(), 30);
    assert_eq!(config.get_ytdlp_binary(), "yt-dlp");
    assert_eq!(config.get_log_min_level(), "INFO");
}

#[test]
fn test_external_file_overrides_defaults() {
    let temp_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        temp_dir.path().join("config.yaml"),
        "host:\n  http_port: 9999\nproxy:\n  max_concurrent_streams: 2\n",
    )
    .unwrap();

    let config = Config::load_config(temp_dir.path().to_str().unwrap()).unwrap();

    assert_eq!(config.get_http_port(), 9999);
    assert_eq!(config.get_max_concurrent_streams(), 2);
    // Untouched keys keep their embedded defaults
    assert_eq!(config.get_expiry_hours(), 5);
}

#[test]
fn test_merged_config_is_saved_back() {
    let temp_dir = tempfile::tempdir().unwrap();
    let _config = Config::load_config(temp_dir.path().to_str().unwrap()).unwrap();

    // Loading writes the merged config so users can discover the keys
    assert!(temp_dir.path().join("config.yaml").exists());
}

#[test]
fn test_get_db_path_creates_storage_dir() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = Config::load_config(temp_dir.path().to_str().unwrap()).unwrap();

    let db_path = config.get_db_path().unwrap();
    assert!(db_path.ends_with("tracks.db"));
    // Relative storage dir is resolved against the config dir and created
    assert!(temp_dir.path().join("data").is_dir());
}

#[test]
fn test_set_value_roundtrip() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = Config::load_config(temp_dir.path().to_str().unwrap()).unwrap();

    config
        .set_value(
            &["resolver", "ytdlp_binary"],
            Value::String("/usr/local/bin/yt-dlp".to_string()),
        )
        .unwrap();
    assert_eq!(config.get_ytdlp_binary(), "/usr/local/bin/yt-dlp");

    // The write must be visible to a fresh load
    let reloaded = Config::load_config(temp_dir.path().to_str().unwrap()).unwrap();
    assert_eq!(reloaded.get_ytdlp_binary(), "/usr/local/bin/yt-dlp");
}
