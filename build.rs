use std::env;
use std::process::Command;

/// Prints `<major>.<minor>.<micro>` and `LIBDIR` on separate lines.
const QUERY: &str = "import platform, sysconfig\n\
                     print(platform.python_version())\n\
                     print(sysconfig.get_config_var('LIBDIR'))";

fn main() {
    // pyo3's own build script links libpython; this adds LIBDIR for
    // installs where it sits outside the default linker directories.
    println!("cargo:rerun-if-env-changed=PYO3_PYTHON");
    let python = env::var("PYO3_PYTHON").unwrap_or_else(|_| "python3".to_string());

    let Some(stdout) = run(&python, &["-c", QUERY]) else {
        println!("cargo:warning=could not query {python}; relying on pyo3 defaults");
        return;
    };
    let mut lines = stdout.lines().map(str::trim);

    if let Some(version) = lines.next().filter(|v| !v.is_empty()) {
        println!("cargo:rustc-env=PYHOST_PYTHON_VERSION={version}");
    }
    if let Some(libdir) = lines.next().filter(|d| !d.is_empty() && *d != "None") {
        println!("cargo:rustc-link-search=native={libdir}");
    }
}

fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
}
