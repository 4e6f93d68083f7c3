//! Text printed for `--version`, `--help` and friends.

use kindle_config::{HostOptions, PROGRAM_NAME, option_names};

/// `v` followed by the package version.
#[must_use]
pub fn version() -> String {
    format!("v{}", env!("CARGO_PKG_VERSION"))
}

/// Host usage followed by a pointer to the engine options.
#[must_use]
pub fn help() -> String {
    format!(
        "{}\nEngine options are listed by --engine-options.\n",
        HostOptions::usage().trim_end()
    )
}

/// A bash completion script offering every host option.
#[must_use]
pub fn completion_bash() -> String {
    let words = option_names().join(" ");
    format!(
        "_{PROGRAM_NAME}_completions() {{\n  local cur_word options\n  cur_word=\"${{COMP_WORDS[COMP_CWORD]}}\"\n  if [[ \"${{cur_word}}\" == -* ]] ; then\n    options='{words}'\n    COMPREPLY=( $(compgen -W \"${{options}}\" -- \"${{cur_word}}\") )\n    return 0\n  else\n    COMPREPLY=( $(compgen -f \"${{cur_word}}\") )\n    return 0\n  fi\n}}\ncomplete -o filenames -o nospace -o bashdefault -F _{PROGRAM_NAME}_completions {PROGRAM_NAME}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn version_has_a_leading_v() {
        let text = version();
        assert!(text.starts_with('v'));
        assert!(!text.contains('\n'));
    }

    #[rstest]
    fn completion_lists_host_options() {
        let script = completion_bash();
        assert!(script.contains("--snapshot-blob"));
        assert!(script.contains("complete -o filenames"));
        assert!(script.ends_with("kindle\n"));
    }

    #[rstest]
    fn help_mentions_engine_options() {
        assert!(help().contains("--engine-options"));
    }
}
