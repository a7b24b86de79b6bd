use std::{
    ffi::CStr,
    os::raw::{c_char, c_int},
};

use noexit::{Args, EntryPoint, Outcome};

/// Stands in for a C program whose `main` was renamed by the pre-include
/// header. It bails out with `exit` on anything it does not like.
unsafe extern "C-unwind" fn target_main(argc: c_int, argv: *mut *mut c_char) -> c_int {
    if argc < 2 {
        noexit::exit(2);
    }

    let input = CStr::from_ptr(*argv.add(1)).to_bytes();
    if input.starts_with(b"bad") {
        noexit::exit(1);
    }

    input.len() as c_int
}

fn main() {
    let entry = EntryPoint::Argv(target_main);

    for input in ["good input", "bad input", "another"] {
        let mut args = Args::new(["target", input]).expect("input contains a NUL byte");
        match unsafe { entry.run(&mut args) } {
            Outcome::Returned(code) => println!("{input:?}: returned {code}"),
            Outcome::Terminated(termination) => println!("{input:?}: intercepted {termination}"),
        }
    }

    println!("still running");
}
