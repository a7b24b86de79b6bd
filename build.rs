fn main() {
    // Targets the tests compile and dlopen resolve noexit_exit and the
    // interposed libc symbols against the test binary itself
    println!("cargo:rustc-link-arg-tests=-rdynamic");
    println!("cargo:rerun-if-changed=build.rs");
}
