//! Script transport.
//!
//! Scripts never travel as shell text. The full script is base64 encoded and
//! handed as one argument to the runner installed in every image, which
//! decodes it, runs it and exits with its exit code. The payload alphabet is
//! shell-safe, so no quoting of the script itself is ever needed.

use crate::container::RunOptions;
use crate::env::container::RUNNER_PATH;
use crate::error::Result;
use crate::mounts::DockerMount;
use crate::shell::{CommandOutput, quote};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Init scripts followed by the caller's script.
pub fn compose_script(init_scripts: &[String], script: &str) -> String {
    let mut full = String::new();
    for init in init_scripts {
        full.push_str(init);
        full.push('\n');
    }
    full.push_str(script);
    full.push('\n');
    full
}

/// Base64 payload for a script.
pub fn encode_payload(script: &str) -> String {
    STANDARD.encode(script.as_bytes())
}

/// Decode a payload back into script text.
pub fn decode_payload(payload: &str) -> Option<String> {
    STANDARD
        .decode(payload)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Command that runs `script` through the installed runner.
pub fn runner_command(script: &str) -> String {
    format!("sh {} {}", RUNNER_PATH, encode_payload(script))
}

/// Arguments for `docker run` after the subcommand itself.
pub fn run_args(
    options: &RunOptions,
    mounts: &[DockerMount],
    lifecycle: &[String],
    image: &str,
    command: &str,
) -> String {
    let mut args = options.leading_args();
    args.extend(mounts.iter().map(DockerMount::volume_arg));
    args.extend(options.trailing_args());
    args.extend(lifecycle.iter().cloned());
    args.push(quote(image));
    args.push(command.to_string());
    args.join(" ")
}

/// Map a finished runner invocation onto the error taxonomy.
///
/// `label` identifies the script in the error; the exit code, stdout and
/// stderr are those of the script itself.
pub fn interpret(output: CommandOutput, label: &str) -> Result<CommandOutput> {
    output.check(label)
}

/// Short, single-line label for a script used in logs and errors.
pub fn script_label(script: &str) -> String {
    let first = script.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    let mut label: String = first.chars().take(60).collect();
    if first.chars().count() > 60 || script.trim().lines().count() > 1 {
        label.push_str(" ...");
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DockwrightError;

    #[test]
    fn test_compose_prepends_init_scripts() {
        let full = compose_script(&["export A=1".to_string()], "echo $A");
        assert_eq!(full, "export A=1\necho $A\n");
        assert_eq!(compose_script(&[], "true"), "true\n");
    }

    #[test]
    fn test_payload_is_shell_safe() {
        let script = "echo \"quotes 'and' $vars\"\nprintf '%s\\n' `date`\n";
        let payload = encode_payload(script);
        assert_eq!(quote(&payload), payload);
        assert_eq!(decode_payload(&payload).as_deref(), Some(script));
    }

    #[test]
    fn test_runner_command() {
        let command = runner_command("echo hi");
        assert_eq!(
            command,
            format!("sh /usr/local/bin/base64_runner.sh {}", encode_payload("echo hi"))
        );
    }

    #[test]
    fn test_run_args_order() {
        let options = RunOptions {
            gpus: Some("all".to_string()),
            network: Some("host".to_string()),
            shm_size: Some("10g".to_string()),
            extra: Vec::new(),
        };
        let mounts = vec![DockerMount::new("/h/a", "/a")];
        let args = run_args(&options, &mounts, &["--rm".to_string()], "repo/img", "sh x");
        assert_eq!(
            args,
            "--gpus all --net=host -v '/h/a:/a' --shm-size=10g --rm repo/img sh x"
        );
    }

    #[test]
    fn test_interpret_keeps_script_exit_code() {
        let err = interpret(CommandOutput::failed(7, "bad"), "exit 7").unwrap_err();
        match err {
            DockwrightError::CommandFailure {
                command, exit_code, ..
            } => {
                assert_eq!(command, "exit 7");
                assert_eq!(exit_code, 7);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_script_label() {
        assert_eq!(script_label("echo hi"), "echo hi");
        assert_eq!(script_label("\ncd /app\nmake\n"), "cd /app ...");
    }
}
