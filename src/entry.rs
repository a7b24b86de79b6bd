use std::{
    ffi::CString,
    fmt,
    os::raw::{c_char, c_int},
    os::unix::ffi::OsStringExt,
    ptr,
    str::FromStr,
};

use libc::c_void;

use crate::{
    boundary::catch_termination,
    error::{Error, Result},
    termination::Outcome,
};

/// `int main(void)`
pub type MainNoArgs = unsafe extern "C-unwind" fn() -> c_int;
/// `int main(int argc, char **argv)`
pub type MainArgv = unsafe extern "C-unwind" fn(c_int, *mut *mut c_char) -> c_int;
/// `int main(int argc, char **argv, char **envp)`
pub type MainEnvp =
    unsafe extern "C-unwind" fn(c_int, *mut *mut c_char, *mut *mut c_char) -> c_int;

/// The parameter list a renamed entry point was defined with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    NoArgs,
    Argv,
    Envp,
}

impl FromStr for Signature {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" | "void" => Ok(Signature::NoArgs),
            "argv" => Ok(Signature::Argv),
            "envp" => Ok(Signature::Envp),
            other => Err(format!(
                "unknown signature `{other}`, expected `none`, `argv` or `envp`"
            )),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Signature::NoArgs => "none",
            Signature::Argv => "argv",
            Signature::Envp => "envp",
        })
    }
}

/// A target's renamed `main`.
#[derive(Clone, Copy)]
pub enum EntryPoint {
    NoArgs(MainNoArgs),
    Argv(MainArgv),
    Envp(MainEnvp),
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = match self {
            EntryPoint::NoArgs(main) => *main as *const (),
            EntryPoint::Argv(main) => *main as *const (),
            EntryPoint::Envp(main) => *main as *const (),
        };

        f.debug_struct("EntryPoint")
            .field("signature", &self.signature())
            .field("address", &address)
            .finish()
    }
}

impl EntryPoint {
    /// Looks up `symbol` among everything loaded into the process. A symbol in
    /// the main executable is only visible if it was linked with `-rdynamic`.
    ///
    /// # Safety
    /// `signature` must match how the symbol was actually defined.
    pub unsafe fn resolve(symbol: &str, signature: Signature) -> Result<Self> {
        let name = CString::new(symbol)?;
        let address = libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr());
        if address.is_null() {
            return Err(Error::SymbolNotFound(symbol.to_owned()));
        }

        Ok(match signature {
            Signature::NoArgs => {
                EntryPoint::NoArgs(std::mem::transmute::<*mut c_void, MainNoArgs>(address))
            }
            Signature::Argv => {
                EntryPoint::Argv(std::mem::transmute::<*mut c_void, MainArgv>(address))
            }
            Signature::Envp => {
                EntryPoint::Envp(std::mem::transmute::<*mut c_void, MainEnvp>(address))
            }
        })
    }

    pub fn signature(&self) -> Signature {
        match self {
            EntryPoint::NoArgs(_) => Signature::NoArgs,
            EntryPoint::Argv(_) => Signature::Argv,
            EntryPoint::Envp(_) => Signature::Envp,
        }
    }

    /// Calls the entry point directly, without a catch boundary.
    ///
    /// # Safety
    /// Calls into the target, which is assumed to be buggy. If it reaches a
    /// termination primitive outside of a boundary the unguarded policy
    /// applies.
    pub unsafe fn invoke(&self, args: &mut Args) -> c_int {
        match self {
            EntryPoint::NoArgs(main) => main(),
            EntryPoint::Argv(main) => main(args.argc(), args.argv()),
            EntryPoint::Envp(main) => main(args.argc(), args.argv(), args.envp()),
        }
    }

    /// Calls the entry point under a fresh catch boundary.
    ///
    /// # Safety
    /// See [`EntryPoint::invoke`].
    pub unsafe fn run(&self, args: &mut Args) -> Outcome {
        catch_termination(|| self.invoke(args)).into()
    }
}

fn argc_for(len: usize) -> Result<c_int> {
    c_int::try_from(len).map_err(|_| Error::TooManyArguments(len))
}

/// C-style `argv`/`envp` arrays.
///
/// The strings are handed to the target as mutable buffers it owns for the
/// duration of the call, as a real `main` gets them. Build a new `Args` for
/// every run so nothing the target writes survives into the next one.
pub struct Args {
    argc: c_int,
    /// Every string we allocated, for freeing. Kept as whole buffers since the
    /// target may move the terminating NUL.
    owned: Vec<*mut [u8]>,
    argv: Vec<*mut c_char>,
    envp: Vec<*mut c_char>,
}

impl Args {
    pub fn new<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<Vec<u8>>,
    {
        let mut this = Args {
            argc: 0,
            owned: Vec::new(),
            argv: Vec::new(),
            envp: vec![ptr::null_mut()],
        };

        for arg in args {
            let arg = this.alloc(arg)?;
            this.argv.push(arg);
        }
        this.argc = argc_for(this.argv.len())?;
        this.argv.push(ptr::null_mut());

        Ok(this)
    }

    /// Replaces the environment passed to `Envp` entry points with `vars`.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        let mut envp = Vec::new();
        for (key, value) in vars {
            let mut entry = key.into();
            entry.push(b'=');
            entry.extend(value.into());
            envp.push(self.alloc(entry)?);
        }
        envp.push(ptr::null_mut());
        self.envp = envp;

        Ok(self)
    }

    /// Passes this process' environment to `Envp` entry points.
    pub fn with_current_env(self) -> Result<Self> {
        self.with_env(
            std::env::vars_os().map(|(key, value)| (key.into_vec(), value.into_vec())),
        )
    }

    fn alloc(&mut self, s: impl Into<Vec<u8>>) -> Result<*mut c_char> {
        let buffer = CString::new(s)?.into_bytes_with_nul().into_boxed_slice();
        let raw = Box::into_raw(buffer);
        self.owned.push(raw);

        Ok(raw.cast::<c_char>())
    }

    pub fn argc(&self) -> c_int {
        self.argc
    }

    /// NULL-terminated `argv`. The target may permute or overwrite entries.
    pub fn argv(&mut self) -> *mut *mut c_char {
        self.argv.as_mut_ptr()
    }

    /// NULL-terminated `envp`
    pub fn envp(&mut self) -> *mut *mut c_char {
        self.envp.as_mut_ptr()
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("argc", &self.argc())
            .field("envc", &(self.envp.len() - 1))
            .finish()
    }
}

impl Drop for Args {
    fn drop(&mut self) {
        for raw in self.owned.drain(..) {
            unsafe {
                drop(Box::from_raw(raw));
            }
        }
    }
}
