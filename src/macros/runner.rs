//! Scripts baked into built images: the base64 runner and the entrypoint.

use super::Macro;
use crate::env::container::{ENTRYPOINT_PATH, RUNNER_PATH};

/// Decodes its single base64 argument and runs it, forwarding the exit code.
///
/// Banners go to stderr so the script's stdout reaches the caller untouched.
pub const RUNNER_SCRIPT: &str = r#"#!/bin/sh
if [ "$#" -ne 1 ]; then
    echo "usage: $0 <base64 encoded script>" >&2
    exit 2
fi

script_file=$(mktemp /tmp/dockwright-script.XXXXXX) || exit 2
printf '%s' "$1" | base64 -d > "$script_file" || {
    echo "failed to decode script payload" >&2
    rm -f "$script_file"
    exit 2
}

if command -v bash >/dev/null 2>&1; then
    interpreter=bash
else
    interpreter=sh
fi

echo "====== dockwright: running script with $interpreter ======" >&2
"$interpreter" "$script_file"
exit_status=$?
rm -f "$script_file"
echo "====== dockwright: script exited with status $exit_status ======" >&2
exit $exit_status
"#;

/// Macro installing [`RUNNER_SCRIPT`] at its fixed path.
pub fn install_runner() -> Macro {
    Macro::inline_file(RUNNER_PATH, RUNNER_SCRIPT, true)
}

/// Render the entrypoint script running `scripts` in order, then the container command.
pub fn entrypoint_script(scripts: &[String]) -> String {
    format!(
        r#"#!/bin/sh
echo "====== dockwright: running entrypoint script ======" >&2
{}
echo "====== dockwright: finished entrypoint script ======" >&2
if [ "$#" -gt 0 ]; then
    exec "$@"
fi
"#,
        scripts.join("\n")
    )
}

/// Macro installing the entrypoint for `scripts` at its fixed path.
pub fn install_entrypoint(scripts: &[String]) -> Macro {
    Macro::inline_file(ENTRYPOINT_PATH, entrypoint_script(scripts), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entrypoint_joins_scripts_in_order() {
        let script = entrypoint_script(&["export A=1".to_string(), "echo $A".to_string()]);
        assert!(script.starts_with("#!/bin/sh\n"));
        let a = script.find("export A=1").unwrap();
        let b = script.find("echo $A").unwrap();
        assert!(a < b);
        assert!(script.contains("exec \"$@\""));
    }

    #[test]
    fn test_runner_forwards_exit_status() {
        assert!(RUNNER_SCRIPT.contains("base64 -d"));
        assert!(RUNNER_SCRIPT.trim_end().ends_with("exit $exit_status"));
    }

    #[tokio::test]
    async fn test_runner_script_runs_payload_on_host() {
        use crate::shell::{HostShell, ShellCommand, ShellExecutor};
        use base64::Engine;

        let dir = tempfile::tempdir().unwrap();
        let runner = dir.path().join("runner.sh");
        std::fs::write(&runner, RUNNER_SCRIPT).unwrap();

        let payload = base64::engine::general_purpose::STANDARD.encode("echo 'it''s here'\nexit 3\n");
        let output = HostShell::new()
            .capture(ShellCommand::new(format!("sh {} {}", runner.display(), payload)))
            .await
            .unwrap();

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "its here");
        assert!(output.stderr.contains("exited with status 3"));
    }
}
