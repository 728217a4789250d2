use social_selling::config::ConfigLoader;
use std::{
    env, fs,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    unsafe {
        env::remove_var("SOCIAL_PROFILE");
        env::remove_var("SOCIAL_API_BIND_ADDR");
        env::remove_var("SOCIAL_LOG_LEVEL");
        env::remove_var("SOCIAL_INSTAGRAM_APP_SECRET");
        env::remove_var("SOCIAL_WEBHOOK_MAX_BODY_KB");
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();

    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.webhook_max_body_kb, 1024);
    assert!(cfg.webhook_allow_legacy_sha1);
    cfg.bind_addr().expect("default bind addr parses");
}

#[test]
fn process_env_overrides_env_files() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    write_env_file(&dir, ".env", "SOCIAL_LOG_LEVEL=debug\nSOCIAL_WEBHOOK_MAX_BODY_KB=64\n");

    unsafe {
        env::set_var("SOCIAL_WEBHOOK_MAX_BODY_KB", "128");
    }
    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .unwrap();
    clear_env();

    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.webhook_max_body_kb, 128);
}

#[test]
fn production_profile_requires_app_secret() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("SOCIAL_PROFILE", "prod");
    }
    let missing = ConfigLoader::with_base_dir(dir.path().to_path_buf()).load();

    unsafe {
        env::set_var("SOCIAL_INSTAGRAM_APP_SECRET", "s3cret");
    }
    let present = ConfigLoader::with_base_dir(dir.path().to_path_buf()).load();
    clear_env();

    assert!(missing.is_err());
    let cfg = present.unwrap();
    assert!(!cfg.redacted_json().unwrap().contains("s3cret"));
}
