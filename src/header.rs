//! Pre-include header for C and C++ targets.
//!
//! The header is passed to the compiler ahead of every translation unit of the
//! target (`-include noexit.h`). It renames the target's `main` and sends
//! `exit`/`_exit` to [`noexit_exit`](crate::noexit_exit), without touching the
//! target's sources. Targets have to be built with `-fexceptions` so the
//! termination can unwind through their frames.

use std::{fmt::Write as _, fs, path::Path};

use crate::error::{Error, Result};

/// Symbol the header redirects `exit` and `_exit` to
pub const EXIT_SYMBOL: &str = "noexit_exit";
/// Default name `main` is renamed to
pub const DEFAULT_ENTRY_SYMBOL: &str = "noexit_main";

/// How the target's `main` is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MainSignature {
    /// `main(...)` becomes `ENTRY(int argc, char **argv)` whatever parameter
    /// list the target wrote. The renamed symbol gets C linkage in C++ too.
    #[default]
    Normalized,
    /// `main` becomes `ENTRY` and keeps its own parameter list. In C++ the
    /// renamed function keeps C++ linkage, so it can only be reached by a
    /// harness compiled into the same program, not through `dlsym`.
    Preserve,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderOptions {
    pub entry_symbol: String,
    pub signature: MainSignature,
    /// Also declare the `noexit_run_main` family for a C harness
    pub harness_api: bool,
}

impl Default for HeaderOptions {
    fn default() -> Self {
        Self {
            entry_symbol: DEFAULT_ENTRY_SYMBOL.to_owned(),
            signature: MainSignature::default(),
            harness_api: false,
        }
    }
}

fn is_c_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }

    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

impl HeaderOptions {
    pub fn entry_symbol(mut self, name: impl Into<String>) -> Self {
        self.entry_symbol = name.into();

        self
    }

    pub fn signature(mut self, signature: MainSignature) -> Self {
        self.signature = signature;

        self
    }

    pub fn harness_api(mut self, enabled: bool) -> Self {
        self.harness_api = enabled;

        self
    }

    /// Produces the header text.
    pub fn render(&self) -> Result<String> {
        let entry = &self.entry_symbol;
        if !is_c_identifier(entry)
            || entry == "main"
            || entry == "exit"
            || entry == "_exit"
            || entry == EXIT_SYMBOL
        {
            return Err(Error::InvalidSymbol(entry.clone()));
        }

        // Writing to a String cannot fail
        let mut out = String::new();
        let guard = format!("NOEXIT_{}_H", entry.to_ascii_uppercase());

        let _ = writeln!(out, "/* Generated by noexit. Pass with `-include`. */");
        let _ = writeln!(out, "#ifndef {guard}");
        let _ = writeln!(out, "#define {guard}");
        out.push('\n');
        // The real declarations have to be seen before the macros below exist
        out.push_str("#include <stdlib.h>\n");
        out.push_str("#if defined(__has_include)\n");
        out.push_str("#if __has_include(<unistd.h>)\n");
        out.push_str("#include <unistd.h>\n");
        out.push_str("#endif\n");
        out.push_str("#endif\n");
        out.push('\n');
        out.push_str("#ifdef __cplusplus\n");
        out.push_str("extern \"C\" {\n");
        out.push_str("#endif\n");
        out.push('\n');
        let _ = writeln!(out, "__attribute__((noreturn)) void {EXIT_SYMBOL}(int status);");
        if self.signature == MainSignature::Normalized {
            let _ = writeln!(out, "int {entry}(int argc, char **argv);");
        }

        if self.harness_api {
            out.push('\n');
            out.push_str("typedef int (*noexit_main_fn)(int argc, char **argv);\n");
            out.push_str(
                "int noexit_run_main(noexit_main_fn entry, int argc, char **argv, int *status);\n",
            );
            out.push_str("int noexit_set_unguarded_policy(int policy);\n");
            out.push_str("void noexit_set_capture_backtrace(int enabled);\n");
        }

        out.push('\n');
        out.push_str("#ifdef __cplusplus\n");
        out.push_str("}\n");
        // <cstdlib> already ran `using ::exit;` above, so `std::exit` would
        // otherwise name a member that does not exist
        let _ = writeln!(out, "namespace std {{ using ::{EXIT_SYMBOL}; }}");
        out.push_str("#endif\n");
        out.push('\n');
        match self.signature {
            MainSignature::Normalized => {
                let _ = writeln!(out, "#define main(...) {entry}(int argc, char **argv)");
            }
            MainSignature::Preserve => {
                let _ = writeln!(out, "#define main {entry}");
            }
        }
        let _ = writeln!(out, "#define _exit {EXIT_SYMBOL}");
        let _ = writeln!(out, "#define exit {EXIT_SYMBOL}");
        out.push('\n');
        let _ = writeln!(out, "#endif /* {guard} */");

        Ok(out)
    }

    /// Renders the header and writes it to `path`, e.g. from a build script.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let header = self.render()?;
        fs::write(path, header)?;

        Ok(())
    }
}
