use std::env;

fn main() {
  if cfg!(feature = "pydrofoil") {
    println!(
      "cargo:rustc-link-lib=dylib={}",
      env::var("PYDROFOIL_LIB").unwrap_or_else(|_| "pydrofoil".to_string())
    );
    if let Ok(dir) = env::var("PYDROFOIL_LIB_DIR") {
      println!("cargo:rustc-link-search=native={dir}");
    }
    println!("cargo:rerun-if-env-changed=PYDROFOIL_LIB");
    println!("cargo:rerun-if-env-changed=PYDROFOIL_LIB_DIR");
  }
}
