use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use crate::command::TestingType;
use crate::error::{ToolError, ToolResult};
use crate::sandbox::PathSandbox;
use crate::text_store;

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\-_]+").expect("valid regex"));
static REPEATED_DASHES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--+").expect("valid regex"));

pub const STORAGE_HELPER_SOURCE: &str = r#"Cypress.Commands.add("loadStorageState", (fixtureName = "storageState") => {
  cy.fixture(fixtureName).then((state) => {
    if (state.localStorage) {
      cy.window().then((win) => {
        Object.entries(state.localStorage).forEach(([key, value]) => {
          win.localStorage.setItem(key, value);
        });
      });
    }
    if (state.sessionStorage) {
      cy.window().then((win) => {
        Object.entries(state.sessionStorage).forEach(([key, value]) => {
          win.sessionStorage.setItem(key, value);
        });
      });
    }
    if (Array.isArray(state.cookies)) {
      state.cookies.forEach((cookie) => {
        cy.setCookie(cookie.name, cookie.value, cookie.options || {});
      });
    }
  });
});

Cypress.Commands.add("clearStorageState", () => {
  cy.clearCookies();
  cy.window().then((win) => {
    win.localStorage.clear();
    win.sessionStorage.clear();
  });
});
"#;

pub const DEFAULT_PLUGIN_SOURCE: &str =
    "module.exports = (on, config) => {\n  // register node event listeners here\n  return config;\n};\n";

/// Replaces every run of characters outside `[a-zA-Z0-9-_]` with `-`.
///
/// A name with nothing usable left is rejected, which also rules out `.` and `..`.
pub fn slug(name: &str) -> ToolResult<String> {
    let slugged = UNSAFE_NAME_CHARS.replace_all(name, "-").into_owned();
    if slugged.trim_matches('-').is_empty() {
        return Err(ToolError::invalid_args(format!(
            "name `{name}` has no usable file-name characters"
        )));
    }
    Ok(slugged)
}

/// [`slug`], then collapses repeated dashes and strips leading/trailing ones.
pub fn tidy_slug(name: &str) -> ToolResult<String> {
    let slugged = slug(name)?;
    Ok(REPEATED_DASHES
        .replace_all(&slugged, "-")
        .trim_matches('-')
        .to_owned())
}

/// `login-form` -> `LoginForm`. Dashes not followed by a lowercase letter become `_`.
pub fn class_name(slug: &str) -> String {
    let mut out = String::with_capacity(slug.len());
    let mut chars = slug.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '-' {
            match chars.next_if(char::is_ascii_lowercase) {
                Some(next) => out.push(next.to_ascii_uppercase()),
                None => out.push('_'),
            }
        } else if out.is_empty() {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}

pub struct Scaffolder {
    sandbox: PathSandbox,
    cypress_dir: String,
}

impl Scaffolder {
    pub fn new(sandbox: PathSandbox, cypress_dir: impl Into<String>) -> Self {
        Self {
            sandbox,
            cypress_dir: cypress_dir.into(),
        }
    }

    fn write(&self, segments: &[&str], content: &str) -> ToolResult<PathBuf> {
        let mut parts = vec![self.cypress_dir.as_str()];
        parts.extend_from_slice(segments);
        let path = self.sandbox.resolve(parts)?;
        text_store::write_text(&path, content)?;
        debug!(path = %path.display(), "scaffold written");
        Ok(path)
    }

    pub fn create_test_file(
        &self,
        testing_type: TestingType,
        name: &str,
        description: Option<&str>,
        content: Option<&str>,
    ) -> ToolResult<PathBuf> {
        let name = tidy_slug(&name.to_lowercase())?;
        let (folder, label) = match testing_type {
            TestingType::E2e => ("e2e", "e2e"),
            TestingType::Component => ("component", "component"),
        };
        let body = match content.filter(|content| !content.is_empty()) {
            Some(content) => content.to_owned(),
            None => {
                let title = description
                    .filter(|description| !description.is_empty())
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("{label} spec for {name}"));
                format!(
                    "describe({}, () => {{\n  it(\"runs\", () => {{\n    // add assertions\n  }});\n}});\n",
                    Value::String(title)
                )
            }
        };
        self.write(&[folder, &format!("{name}.cy.js")], &body)
    }

    pub fn create_page_object(&self, name: &str, content: Option<&str>) -> ToolResult<PathBuf> {
        let name = tidy_slug(name)?;
        let body = match content.filter(|content| !content.is_empty()) {
            Some(content) => content.to_owned(),
            None => format!(
                "export class {}Page {{\n  visit() {{\n    // navigate to the page\n  }}\n}}\n",
                class_name(&name)
            ),
        };
        self.write(&["pages", &format!("{name}.js")], &body)
    }

    /// Writes `content` as pretty JSON under `fixtures/`. Used for both add and update.
    pub fn write_fixture(&self, name: &str, content: &Value) -> ToolResult<PathBuf> {
        let name = slug(name)?;
        let text = serde_json::to_string_pretty(content)
            .map_err(|err| ToolError::invalid_args(format!("fixture content is not JSON: {err}")))?;
        self.write(&["fixtures", &format!("{name}.json")], &format!("{text}\n"))
    }

    pub fn create_storage_state(
        &self,
        name: &str,
        local_storage: Option<Value>,
        session_storage: Option<Value>,
        cookies: Option<Value>,
    ) -> ToolResult<PathBuf> {
        let payload = json!({
            "localStorage": local_storage.unwrap_or_else(|| json!({})),
            "sessionStorage": session_storage.unwrap_or_else(|| json!({})),
            "cookies": cookies.unwrap_or_else(|| json!([])),
        });
        self.write_fixture(name, &payload)
    }

    pub fn write_plugin(&self, name: &str, content: Option<&str>) -> ToolResult<PathBuf> {
        let name = slug(name)?;
        let body = content
            .filter(|content| !content.is_empty())
            .unwrap_or(DEFAULT_PLUGIN_SOURCE);
        self.write(&["plugins", &format!("{name}.js")], body)
    }

    /// Writes `.github/workflows/<workflow_name>` (outside the test directory).
    pub fn write_github_workflow(
        &self,
        workflow_name: &str,
        node_version: &str,
        install_command: &str,
        run_command: &str,
    ) -> ToolResult<PathBuf> {
        let workflow_name = workflow_name.trim();
        if workflow_name.is_empty() {
            return Err(ToolError::invalid_args("workflowName must not be empty"));
        }
        let path = self
            .sandbox
            .resolve([".github", "workflows", workflow_name])?;
        let content = format!(
            "name: Cypress Tests\n\non:\n  push:\n    branches: [main]\n  pull_request:\n    branches: [main]\n\njobs:\n  cypress:\n    runs-on: ubuntu-latest\n    steps:\n      - uses: actions/checkout@v4\n      - uses: actions/setup-node@v4\n        with:\n          node-version: {node_version}\n      - run: {install_command}\n      - run: {run_command}\n"
        );
        text_store::write_text(&path, &content)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{class_name, slug, tidy_slug, Scaffolder};
    use crate::command::TestingType;
    use crate::error::ToolErrorCode;
    use crate::sandbox::PathSandbox;

    fn scaffolder(root: &std::path::Path) -> Scaffolder {
        Scaffolder::new(PathSandbox::new(root).expect("sandbox"), "cypress")
    }

    #[test]
    fn slugs_replace_unsafe_runs_and_reject_empty_names() {
        assert_eq!(slug("user profile/v2").expect("slug"), "user-profile-v2");
        assert_eq!(slug("../../etc/passwd").expect("slug"), "-etc-passwd");
        assert_eq!(tidy_slug("  Checkout -- Flow!! ").expect("slug"), "Checkout-Flow");
        for bad in ["", "...", "///", "  "] {
            let err = slug(bad).expect_err(bad);
            assert_eq!(err.code, ToolErrorCode::InvalidArgs);
        }
    }

    #[test]
    fn class_names_are_pascal_cased() {
        assert_eq!(class_name("login-form"), "LoginForm");
        assert_eq!(class_name("cart"), "Cart");
        assert_eq!(class_name("Admin"), "Admin");
        assert_eq!(class_name("step-2"), "Step_2");
    }

    #[test]
    fn test_file_gets_default_suite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = scaffolder(dir.path())
            .create_test_file(TestingType::E2e, "Login Flow", None, None)
            .expect("create");
        assert!(path.ends_with("cypress/e2e/login-flow.cy.js"));
        let content = std::fs::read_to_string(&path).expect("read");
        assert!(content.starts_with("describe(\"e2e spec for login-flow\", () => {\n  it(\"runs\""));
    }

    #[test]
    fn page_object_and_fixtures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scaffolder = scaffolder(dir.path());
        let page = scaffolder.create_page_object("login-form", None).expect("page");
        assert!(std::fs::read_to_string(&page)
            .expect("read")
            .starts_with("export class LoginFormPage {"));

        let fixture = scaffolder
            .write_fixture("users", &json!({ "name": "Ada", "roles": ["admin"] }))
            .expect("fixture");
        assert_eq!(
            std::fs::read_to_string(&fixture).expect("read"),
            "{\n  \"name\": \"Ada\",\n  \"roles\": [\n    \"admin\"\n  ]\n}\n"
        );

        let state = scaffolder
            .create_storage_state("storageState", Some(json!({ "token": "t" })), None, None)
            .expect("state");
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&state).expect("read")).expect("json");
        assert_eq!(
            parsed,
            json!({ "localStorage": { "token": "t" }, "sessionStorage": {}, "cookies": [] })
        );
    }

    #[test]
    fn workflow_is_parameterised_and_sandboxed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scaffolder = scaffolder(dir.path());
        let path = scaffolder
            .write_github_workflow("cypress.yml", "22", "pnpm install", "pnpm cypress run")
            .expect("workflow");
        let content = std::fs::read_to_string(&path).expect("read");
        assert!(content.contains("node-version: 22\n"));
        assert!(content.contains("- run: pnpm install\n      - run: pnpm cypress run\n"));

        let err = scaffolder
            .write_github_workflow("../../../escape.yml", "20", "npm ci", "npx cypress run")
            .expect_err("escape");
        assert_eq!(err.code, ToolErrorCode::PathOutsideRoot);
    }
}
