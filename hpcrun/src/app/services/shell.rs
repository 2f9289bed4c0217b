// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub fn sh_escape(p: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}

/// Quote `value` only when the shell would otherwise split or expand it.
/// A leading `~` stays unquoted so the remote shell still expands it.
pub fn shell_word(value: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "_-./~:+@,=%".contains(c);
    if !value.is_empty() && value.chars().all(safe) {
        value.to_string()
    } else {
        sh_escape(value)
    }
}

/// Substitute `{key}` placeholders in a command template in one pass, so
/// substituted values are never scanned for placeholders themselves.
/// Unknown placeholders are left untouched.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let tail = &rest[open..];
        let value = tail.find('}').and_then(|close| {
            let key = &tail[1..close];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (close, *value))
        });
        match value {
            Some((close, value)) => {
                rendered.push_str(&shell_word(value));
                rest = &tail[close + 1..];
            }
            None => {
                rendered.push('{');
                rest = &tail[1..];
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sh_escape_wraps_and_escapes_quotes() {
        assert_eq!(sh_escape("a b"), "'a b'");
        assert_eq!(sh_escape("it's"), r"'it'\''s'");
    }

    #[test]
    fn shell_word_leaves_plain_paths_alone() {
        assert_eq!(shell_word("~/cuda-test/cuda.slurm"), "~/cuda-test/cuda.slurm");
        assert_eq!(shell_word("/lustre/home/run 1"), "'/lustre/home/run 1'");
        assert_eq!(shell_word(""), "''");
        assert_eq!(shell_word("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn render_template_substitutes_known_keys() {
        let cmd = render_template(
            "sbatch --chdir {remote_dir} {sbatch_script} # {unknown}",
            &[
                ("remote_dir", "/home/u/job dir"),
                ("sbatch_script", "/home/u/job dir/job.slurm"),
            ],
        );
        assert_eq!(
            cmd,
            "sbatch --chdir '/home/u/job dir' '/home/u/job dir/job.slurm' # {unknown}"
        );
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let cmd = render_template(
            "cd {remote_dir} && sbatch {sbatch_script}",
            &[
                ("remote_dir", "/work/{sbatch_script}"),
                ("sbatch_script", "job.slurm"),
            ],
        );
        assert_eq!(cmd, "cd '/work/{sbatch_script}' && sbatch job.slurm");
    }

    #[test]
    fn stray_braces_are_kept() {
        assert_eq!(
            render_template("awk '{print $1}' {job_id} }{", &[("job_id", "7")]),
            "awk '{print $1}' 7 }{"
        );
    }
}
