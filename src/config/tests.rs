//! Tests for the configuration model and provider-independent validation.

use super::*;
use crate::state::DeploymentState;
use crate::test_helpers::EnvGuard;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct ProjectFixture {
    _tmp: TempDir,
    config: Configuration,
}

#[fixture]
fn project() -> ProjectFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    ProjectFixture {
        _tmp: tmp,
        config: Configuration::for_project(path, DEFAULT_PROVIDER),
    }
}

#[rstest]
fn default_configuration_is_valid(project: ProjectFixture) {
    let errors = project.config.validate();
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
}

#[rstest]
fn default_configuration_serves_editor_port(project: ProjectFixture) {
    assert_eq!(project.config.service_port(), EDITOR_PORT);
    assert!(project.config.upload_folder);
}

#[rstest]
fn validation_reports_every_problem_at_once(project: ProjectFixture) {
    let mut config = project.config;
    config.name = String::from("  ");
    config.ports.push(PortMapping {
        host: 0,
        container: EDITOR_PORT,
    });
    config.resources.cpus = Some(0);
    config
        .env
        .insert(String::from("BAD-NAME"), String::from("value"));

    let errors = config.validate();
    let fields: Vec<&str> = errors.iter().map(|err| err.field.as_str()).collect();

    assert!(fields.contains(&"name"), "{fields:?}");
    assert!(fields.contains(&"ports[1].host"), "{fields:?}");
    assert!(fields.contains(&"ports[1].container"), "{fields:?}");
    assert!(fields.contains(&"resources.cpus"), "{fields:?}");
    assert!(fields.contains(&"env.BAD-NAME"), "{fields:?}");
}

#[rstest]
fn validation_rejects_missing_project_directory(project: ProjectFixture) {
    let mut config = project.config;
    config.project_path = config.project_path.join("does-not-exist");

    let errors = config.validate();

    assert!(
        errors.iter().any(|err| err.field == "project_path"),
        "{errors:?}"
    );
}

#[rstest]
fn validation_rejects_relative_project_path(project: ProjectFixture) {
    let mut config = project.config;
    config.project_path = Utf8PathBuf::from("relative/project");

    let errors = config.validate();
    let error = errors
        .iter()
        .find(|err| err.field == "project_path")
        .expect("project_path error");
    assert!(error.message.contains("absolute"), "{}", error.message);
}

#[rstest]
fn validation_rejects_names_shared_by_env_and_secrets(project: ProjectFixture) {
    let mut config = project.config;
    config
        .env
        .insert(String::from("API_KEY"), String::from("plain"));
    config.secrets.insert(
        String::from("API_KEY"),
        SecretRef::Literal(String::from("x")),
    );

    let errors = config.validate();

    assert!(errors.iter().any(|err| err.field == "env.API_KEY"), "{errors:?}");
}

#[rstest]
fn validation_rejects_record_from_other_provider(project: ProjectFixture) {
    let mut config = project.config;
    config.deployment = Some(DeploymentRecord::new(
        "remote",
        "opencodespace-app-abc123",
        DeploymentState::Running,
    ));

    let errors = config.validate();

    assert!(
        errors.iter().any(|err| err.field == "deployment.provider"),
        "{errors:?}"
    );
    assert!(config.active_record().is_none());
}

#[rstest]
fn validation_rejects_duplicate_mount_targets(project: ProjectFixture) {
    let mut config = project.config;
    let mount = MountSpec {
        source: String::from("cache"),
        target: String::from("/cache"),
        read_only: false,
    };
    config.mounts = vec![mount.clone(), mount];

    let errors = config.validate();

    assert!(
        errors.iter().any(|err| err.field == "mounts[1].target"),
        "{errors:?}"
    );
}

#[tokio::test]
async fn env_backed_secrets_resolve_from_environment() {
    let _guard = EnvGuard::set_vars(&[("OPENCODESPACE_TEST_SECRET", "s3cret")]).await;
    let reference = SecretRef::FromEnv {
        from_env: String::from("OPENCODESPACE_TEST_SECRET"),
    };

    let value = reference.resolve("API_KEY").expect("secret should resolve");

    assert_eq!(secrecy::ExposeSecret::expose_secret(&value), "s3cret");
}

#[rstest]
fn unset_env_backed_secret_is_reported() {
    let reference = SecretRef::FromEnv {
        from_env: String::from("OPENCODESPACE_TEST_UNSET_SECRET"),
    };

    let err = reference
        .resolve("API_KEY")
        .expect_err("unset variable should fail");

    assert_eq!(
        err,
        SecretError::MissingEnv {
            key: String::from("API_KEY"),
            env_var: String::from("OPENCODESPACE_TEST_UNSET_SECRET"),
        }
    );
}

#[rstest]
fn literal_secret_debug_is_redacted() {
    let reference = SecretRef::Literal(String::from("hunter2"));
    let rendered = format!("{reference:?}");
    assert!(!rendered.contains("hunter2"), "{rendered}");
}

#[rstest]
fn legacy_platform_key_is_accepted() {
    let parsed: Configuration = ortho_config::toml::from_str(
        r#"
name = "demo"
platform = "local"
project_path = "/tmp/demo"
"#,
    )
    .expect("legacy config should parse");

    assert_eq!(parsed.provider, "local");
    assert!(parsed.upload_folder);
    assert_eq!(parsed.remote.region, DEFAULT_REGION);
}

#[rstest]
fn validation_rejects_host_port_claimed_twice(project: ProjectFixture) {
    let mut config = project.config;
    config.ports.push(PortMapping {
        host: EDITOR_PORT,
        container: 3000,
    });

    let errors = config.validate();
    let error = errors
        .iter()
        .find(|err| err.field == "ports[1].host")
        .unwrap_or_else(|| panic!("host port conflict expected: {errors:?}"));

    assert!(error.message.contains("ports[0]"), "{}", error.message);
}

#[tokio::test]
async fn editor_password_resolves_as_password_secret() {
    let _guard = EnvGuard::set_vars(&[("OPENCODESPACE_TEST_PASSWORD", "editor-pass")]).await;
    let mut config = Configuration::for_project("/tmp/project", DEFAULT_PROVIDER);
    config.editor.password = Some(SecretRef::FromEnv {
        from_env: String::from("OPENCODESPACE_TEST_PASSWORD"),
    });

    let secrets = config.resolve_secrets().expect("password should resolve");

    let password = secrets.get(PASSWORD_SECRET).expect("password entry");
    assert_eq!(secrecy::ExposeSecret::expose_secret(password), "editor-pass");
}

#[rstest]
#[case(SecretRef::Literal(String::new()), "must not be empty")]
#[case(
    SecretRef::FromEnv { from_env: String::from("OPENCODESPACE_TEST_UNSET_PASSWORD") },
    "not set"
)]
fn unusable_editor_password_is_reported(
    project: ProjectFixture,
    #[case] password: SecretRef,
    #[case] message: &str,
) {
    let mut config = project.config;
    config.editor.password = Some(password);

    let errors = config.validate();
    let error = errors
        .iter()
        .find(|err| err.field == "editor.password")
        .unwrap_or_else(|| panic!("password error expected: {errors:?}"));

    assert!(error.message.contains(message), "{}", error.message);
}

#[rstest]
fn editor_password_clashing_with_secret_is_reported(project: ProjectFixture) {
    let mut config = project.config;
    config.editor.password = Some(SecretRef::Literal(String::from("pw")));
    config.secrets.insert(
        String::from(PASSWORD_SECRET),
        SecretRef::Literal(String::from("other")),
    );

    let errors = config.validate();

    assert!(
        errors.iter().any(|err| err.field == "editor.password"),
        "{errors:?}"
    );
}
