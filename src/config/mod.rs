#[cfg(feature = "cli")]
pub mod args;
pub mod cli;
pub mod profile;
pub mod recipe;

use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Models checked when no path is given on the command line.
pub const DEFAULT_MODELS: [&str; 2] = [
    "assets/models/best_model.tflite",
    "assets/models/minimal_model.tflite",
];

/// 替換環境變數 (例如 ${MODEL_DIR})，未設定的變數保持原樣
pub(crate) fn substitute_env_vars(content: &str) -> String {
    static ENV_VAR: OnceLock<Regex> = OnceLock::new();
    let re = ENV_VAR.get_or_init(|| match Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(e) => unreachable!("env var pattern is valid: {}", e),
    });

    re.replace_all(content, |caps: &Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    })
    .into_owned()
}

#[cfg(feature = "cli")]
pub use args::{BuildArgs, BuildConfig, CheckConfig, CommonArgs, ConvertConfig, RecipeConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_variables_are_left_alone() {
        std::env::remove_var("TFLITE_COMPAT_SURELY_UNSET");
        let out = substitute_env_vars("path = \"${TFLITE_COMPAT_SURELY_UNSET}/m.tflite\"");
        assert_eq!(out, "path = \"${TFLITE_COMPAT_SURELY_UNSET}/m.tflite\"");
    }
}
