//! Shell scripts that mimic the translation engine's command-line contract.
//!
//! Every script records its arguments (one per line) and the value of
//! `OPENAI_API_KEY` it was started with, so tests can inspect the invocation.

#![allow(dead_code)]

use std::path::Path;

/// What a fake engine does once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeEngine {
    /// Writes `<input stem>.<lang_out>.mono.pdf` into the workspace.
    Translate,
    /// Like `Translate`, but also reports progress on stderr.
    TranslateNoisy,
    /// Prints a message on stderr and exits with status 3.
    Crash,
    /// Exits cleanly without writing anything.
    NoOutput,
    /// Writes one output whose name leaves no room for the job id prefix.
    LongOutputName,
}

/// Parses the engine arguments into `files`, `out` and `lang_out`.
const PARSE_ARGS: &str = r#"
files=""
out=""
lang_out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --files) files="$2"; shift 2 ;;
    --output) out="$2"; shift 2 ;;
    --lang-out) lang_out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
"#;

const TRANSLATE: &str = r#"
stem=$(basename "$files" .pdf)
echo "Translating $stem to $lang_out"
cp "$files" "$out/$stem.$lang_out.mono.pdf"
echo "Done"
"#;

const TRANSLATE_NOISY: &str = r#"
stem=$(basename "$files" .pdf)
echo "progress 50%" >&2
cp "$files" "$out/$stem.$lang_out.mono.pdf"
echo "progress 100%" >&2
"#;

const CRASH: &str = r#"
echo "starting"
echo "boom: model not reachable" >&2
exit 3
"#;

const NO_OUTPUT: &str = r#"
echo "nothing to translate"
exit 0
"#;

const LONG_OUTPUT_NAME: &str = r#"
name=$(printf '%0240d' 0)
cp "$files" "$out/$name.pdf"
echo "Done"
"#;

/// Renders the script text.
///
/// With `gate`, the script waits for that file to exist before doing
/// anything else, which keeps the job `running` until the test releases it.
pub fn render(
    engine: FakeEngine,
    args_file: &Path,
    env_file: &Path,
    gate: Option<&Path>,
) -> String {
    let mut script = String::from("#!/bin/sh\n");
    script.push_str(&format!(
        "printf '%s\\n' \"$@\" > '{}'\n",
        args_file.display()
    ));
    script.push_str(&format!(
        "printf '%s' \"${{OPENAI_API_KEY:-}}\" > '{}'\n",
        env_file.display()
    ));
    if let Some(gate) = gate {
        script.push_str("echo \"waiting for gate\"\n");
        script.push_str(&format!(
            "while [ ! -f '{}' ]; do sleep 0.05; done\n",
            gate.display()
        ));
    }
    script.push_str(PARSE_ARGS);
    script.push_str(match engine {
        FakeEngine::Translate => TRANSLATE,
        FakeEngine::TranslateNoisy => TRANSLATE_NOISY,
        FakeEngine::Crash => CRASH,
        FakeEngine::NoOutput => NO_OUTPUT,
        FakeEngine::LongOutputName => LONG_OUTPUT_NAME,
    });
    script
}
