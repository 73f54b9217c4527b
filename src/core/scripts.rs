//! Batch script generation. Templates live in the read-only install
//! directory; rendering is pure token substitution over a closed placeholder
//! set, and anything that still looks like a placeholder afterwards is an
//! error rather than a broken script.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::core::config::PipelineConfig;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::run::DEFAULT_ADAPTER_TYPE;
use crate::core::stage::Stage;

#[derive(Debug, Clone)]
pub struct ScriptGenerator {
    templates_dir: PathBuf,
    work_dir: PathBuf,
    generated_dir: PathBuf,
}

impl ScriptGenerator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            templates_dir: config.templates_dir(),
            work_dir: config.work_dir.clone(),
            generated_dir: config.generated_dir(),
        }
    }

    /// Render the stage template for one run. `extras` usually holds the run
    /// parameters; keys outside the placeholder set are ignored. Rendering is
    /// deterministic: identical inputs produce identical bytes.
    pub fn generate(
        &self,
        stage: Stage,
        run_id: &str,
        account: &str,
        extras: &BTreeMap<String, String>,
    ) -> PipelineResult<PathBuf> {
        if !self.templates_dir.is_dir() {
            return Err(PipelineError::Config(format!(
                "template directory missing: {}",
                self.templates_dir.display()
            )));
        }
        let template_path = self.templates_dir.join(stage.template_name());
        let template = fs::read_to_string(&template_path).map_err(|e| {
            PipelineError::Template(format!(
                "cannot read template {}: {e}",
                template_path.display()
            ))
        })?;

        let run_dir = self.work_dir.join("runs").join(run_id);
        let adapter_type = extras
            .get("adapter_type")
            .map(String::as_str)
            .unwrap_or(DEFAULT_ADAPTER_TYPE);

        let base_dir = self.work_dir.to_string_lossy().to_string();
        let run_dir = run_dir.to_string_lossy().to_string();
        let mut script = template;
        for (token, value) in [
            ("{RUN_ID}", run_id),
            ("{ACCOUNT}", account),
            ("{BASE_DIR}", base_dir.as_str()),
            ("{RUN_DIR}", run_dir.as_str()),
            ("{ADAPTER_TYPE}", adapter_type),
        ] {
            script = substitute(&script, token, value);
        }

        if let Some(token) = leftover_placeholder(&script) {
            return Err(PipelineError::Template(format!(
                "unknown placeholder {{{token}}} in {}",
                template_path.display()
            )));
        }

        fs::create_dir_all(&self.generated_dir)?;
        let script_path = self
            .generated_dir
            .join(format!("{}_{run_id}.script", stage.as_str()));
        fs::write(&script_path, &script)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
        }
        Ok(script_path)
    }

    /// Remove every generated script belonging to one run.
    pub fn cleanup_run_scripts(&self, run_id: &str) -> PipelineResult<()> {
        if !self.generated_dir.is_dir() {
            return Ok(());
        }
        let suffix = format!("_{run_id}.script");
        for entry in fs::read_dir(&self.generated_dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().ends_with(&suffix) {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

/// Replace every occurrence of `token` that is not preceded by `$`. The
/// templates assign a shell variable from the raw placeholder and then
/// dereference it as `${NAME}`; the dereference must survive rendering.
fn substitute(input: &str, token: &str, value: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find(token) {
        let prev = if pos > 0 {
            rest.as_bytes().get(pos - 1).copied()
        } else {
            out.as_bytes().last().copied()
        };
        out.push_str(&rest[..pos]);
        if prev == Some(b'$') {
            out.push_str(token);
        } else {
            out.push_str(value);
        }
        rest = &rest[pos + token.len()..];
    }
    out.push_str(rest);
    out
}

/// Find a `{NAME}` token that survived substitution. Placeholder names are
/// uppercase words; shell `${VAR}` expansions are exempt, mirroring the rule
/// `substitute` applies.
fn leftover_placeholder(script: &str) -> Option<String> {
    let bytes = script.as_bytes();
    let mut idx = 0;
    while let Some(open) = script[idx..].find('{').map(|off| idx + off) {
        let dollar_prefixed = open > 0 && bytes[open - 1] == b'$';
        if let Some(close) = script[open + 1..].find('}').map(|off| open + 1 + off) {
            let inner = &script[open + 1..close];
            if !dollar_prefixed
                && !inner.is_empty()
                && inner
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
            {
                return Some(inner.to_string());
            }
            idx = open + 1;
        } else {
            break;
        }
    }
    None
}
