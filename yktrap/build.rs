use rerun_except::rerun_except;
use std::env;

fn main() {
    let mut c_build = cc::Build::new();

    // `setjmp` on Windows does not take a "save signal mask" argument, so the C code needs to know
    // which flavour of the jump buffer API to use.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("windows") {
        c_build.define("YKTRAP_WINDOWS", None);
    }

    c_build.file("src/boundary.c");
    c_build.compile("yktrap_c");

    // Additional circumstances under which to re-run this build.rs.
    rerun_except(&["README.md", "LICENSE-*", "COPYRIGHT", "tests/*"]).unwrap();
}
