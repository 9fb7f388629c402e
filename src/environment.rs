//! Runtime environment variables understood by the bundled entrypoint.

use std::collections::BTreeMap;

use crate::config::Configuration;

/// Workspace directory inside the environment.
pub const WORKSPACE_DIR: &str = "/home/coder/workspace";

/// Variable the entrypoint binds the editor server to.
pub const PORT_VAR: &str = "OPENCODESPACE_PORT";

/// Entries shared by every provider: git identity, clone source, extension
/// lists, the service port, and the configured plain variables.
///
/// Plain `[env]` values are applied last and win over derived ones.
#[must_use]
pub fn base_environment(config: &Configuration) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let git = &config.git;
    if let Some(name) = &git.user_name {
        env.insert(String::from("GIT_USER_NAME"), name.clone());
    }
    if let Some(email) = &git.user_email {
        env.insert(String::from("GIT_USER_EMAIL"), email.clone());
    }
    match &git.repo_url {
        Some(url) if !url.trim().is_empty() => {
            env.insert(String::from("GIT_REPO_URL"), url.clone());
            env.insert(String::from("SKIP_GIT_SETUP"), String::from("false"));
        }
        _ => {
            env.insert(String::from("SKIP_GIT_SETUP"), String::from("true"));
        }
    }
    insert_list(&mut env, "VSCODE_EXTENSIONS", &config.editor.vscode_extensions);
    insert_list(&mut env, "CURSOR_EXTENSIONS", &config.editor.cursor_extensions);
    env.insert(String::from(PORT_VAR), config.service_port().to_string());
    env.extend(
        config
            .env
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );
    env
}

fn insert_list(env: &mut BTreeMap<String, String>, key: &str, values: &[String]) {
    if !values.is_empty() {
        env.insert(key.to_owned(), values.join(","));
    }
}
