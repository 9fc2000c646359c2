//! System clipboard access through the platform's clipboard utilities.

use std::io::Write;
use std::process::{Command, Stdio};

use credvault_common::{Error, Result, SecretString};
use credvault_lifecycle::ClipboardBackend;

/// Clipboard driven by external copy/paste programs.
#[derive(Debug, Clone, Copy)]
pub struct CommandClipboard {
    copy: (&'static str, &'static [&'static str]),
    paste: (&'static str, &'static [&'static str]),
}

const CANDIDATES: &[CommandClipboard] = &[
    CommandClipboard {
        copy: ("pbcopy", &[]),
        paste: ("pbpaste", &[]),
    },
    CommandClipboard {
        copy: ("wl-copy", &[]),
        paste: ("wl-paste", &["--no-newline"]),
    },
    CommandClipboard {
        copy: ("xclip", &["-selection", "clipboard"]),
        paste: ("xclip", &["-selection", "clipboard", "-o"]),
    },
    CommandClipboard {
        copy: ("xsel", &["--clipboard", "--input"]),
        paste: ("xsel", &["--clipboard", "--output"]),
    },
];

impl CommandClipboard {
    /// Find the first clipboard program available on this system.
    pub fn detect() -> Option<CommandClipboard> {
        CANDIDATES.iter().find(|c| is_available(c.copy.0)).copied()
    }

    /// Name of the copy program in use.
    pub fn program(&self) -> &'static str {
        self.copy.0
    }
}

impl ClipboardBackend for CommandClipboard {
    fn set_text(&self, text: &str) -> Result<()> {
        let (program, args) = self.copy;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Clipboard(format!("Failed to start {}: {}", program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .map_err(|e| Error::Clipboard(format!("Failed to write to {}: {}", program, e)))?;
        }

        let status = child
            .wait()
            .map_err(|e| Error::Clipboard(format!("{} did not finish: {}", program, e)))?;
        if !status.success() {
            return Err(Error::Clipboard(format!("{} exited with {}", program, status)));
        }
        Ok(())
    }

    fn read_text(&self) -> Result<SecretString> {
        let (program, args) = self.paste;
        let output = Command::new(program)
            .args(args)
            .stderr(Stdio::null())
            .output()
            .map_err(|e| Error::Clipboard(format!("Failed to start {}: {}", program, e)))?;
        let text = String::from_utf8(output.stdout)
            .map_err(|_| Error::Clipboard("Clipboard content is not UTF-8".to_string()))?;
        Ok(SecretString::new(text))
    }
}

fn is_available(program: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
}
