use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use kindle_config::HostConfig;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const MANAGED_VARS: &[&str] = &[
    "KINDLE_CONFIG_PATH",
    "KINDLE_OPTIONS",
    "KINDLE_ICU_DATA",
    "KINDLE_CRYPTO_CONF",
    "KINDLE_EXTRA_CA_CERTS",
];

struct Harness {
    temp_dir: TempDir,
    saved: Vec<(&'static str, Option<OsString>)>,
    loaded: RefCell<Option<HostConfig>>,
    error: RefCell<Option<String>>,
    _guard: MutexGuard<'static, ()>,
}

impl Harness {
    fn new() -> Self {
        let guard = ENV_MUTEX
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        let saved = MANAGED_VARS
            .iter()
            .map(|key| (*key, std::env::var_os(key)))
            .collect();
        for key in MANAGED_VARS {
            // Environment mutation is serialised by `ENV_MUTEX` and undone in
            // `Drop`.
            unsafe { std::env::remove_var(key) };
        }
        Self {
            temp_dir,
            saved,
            loaded: RefCell::new(None),
            error: RefCell::new(None),
            _guard: guard,
        }
    }

    fn write_config(&self, options: &str) {
        let path = self.temp_dir.path().join("kindle.toml");
        if let Err(error) = fs::write(&path, format!("options = {options:?}\n")) {
            panic!("failed to write configuration: {error}");
        }
        self.set_env("KINDLE_CONFIG_PATH", path.as_os_str());
    }

    fn set_env(&self, key: &str, value: impl AsRef<std::ffi::OsStr>) {
        unsafe { std::env::set_var(key, value) };
    }

    fn load(&self) {
        if self.loaded.borrow().is_some() || self.error.borrow().is_some() {
            return;
        }
        match HostConfig::load_layers() {
            Ok(config) => *self.loaded.borrow_mut() = Some(config),
            Err(error) => *self.error.borrow_mut() = Some(error.to_string()),
        }
    }

    fn config(&self) -> HostConfig {
        self.load();
        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }
        match self.loaded.borrow().as_ref() {
            Some(config) => config.clone(),
            None => panic!("configuration was not loaded"),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..) {
            match value {
                Some(value) => unsafe { std::env::set_var(key, value) },
                None => unsafe { std::env::remove_var(key) },
            }
        }
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting options to \"{options}\"")]
fn given_configuration_file(harness: &Harness, options: String) {
    harness.write_config(&options);
}

#[given("the environment sets KINDLE_OPTIONS to \"{value}\"")]
fn given_options_env(harness: &Harness, value: String) {
    harness.set_env("KINDLE_OPTIONS", value);
}

#[given("the environment sets KINDLE_ICU_DATA to \"{value}\"")]
fn given_icu_env(harness: &Harness, value: String) {
    harness.set_env("KINDLE_ICU_DATA", value);
}

#[when("the configuration loads without overrides")]
fn when_load_without_overrides(harness: &Harness) {
    harness.load();
}

#[then("the options bundle is unset")]
fn then_bundle_unset(harness: &Harness) {
    assert_eq!(harness.config().options_bundle(), None);
}

#[then("the ICU data directory is unset")]
fn then_icu_unset(harness: &Harness) {
    assert_eq!(harness.config().icu_data_dir(), None);
}

#[then("loading the configuration resolves the options bundle to \"{expected}\"")]
fn then_bundle_resolved(harness: &Harness, expected: String) {
    assert_eq!(harness.config().options_bundle(), Some(expected.as_str()));
}

#[then("loading the configuration resolves the ICU data directory to \"{expected}\"")]
fn then_icu_resolved(harness: &Harness, expected: String) {
    let config = harness.config();
    assert_eq!(
        config.icu_data_dir().map(camino::Utf8Path::as_str),
        Some(expected.as_str())
    );
}

#[scenario(path = "tests/features/configuration_precedence.feature", index = 0)]
fn defaults_apply_without_overrides(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(path = "tests/features/configuration_precedence.feature", index = 1)]
fn file_supplies_options_bundle(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(path = "tests/features/configuration_precedence.feature", index = 2)]
fn environment_beats_file(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(path = "tests/features/configuration_precedence.feature", index = 3)]
fn environment_supplies_icu_directory(#[from(harness)] harness: Harness) {
    let _ = harness;
}
